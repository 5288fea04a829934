//! Backtesting: replay the engine over recorded price history.

pub mod runner;

pub use runner::{BacktestReport, ReplayRunner};
