//! Core engine: the scout, jump and flush rotation loop.

pub mod executor;
pub mod scout;

pub use executor::{ConversionOutcome, TradeExecutor};
pub use scout::{ScoutEngine, ScoutSummary};
