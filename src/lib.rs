//! HOPPER, an automated multi-asset rotation trading engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod registry;
pub mod ratios;
pub mod exchange;
pub mod notify;
pub mod engine;
pub mod storage;
pub mod backtest;
