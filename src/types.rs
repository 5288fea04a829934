//! Shared types for the HOPPER engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that exchange, engine,
//! and storage modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Trade lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a two-leg conversion through the reserve asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeState {
    /// Record created, no order placed yet.
    Started,
    /// Sell leg filled, buy leg pending.
    Ordered,
    /// Both legs filled.
    Complete,
    /// A leg was rejected; the conversion is abandoned.
    Failed,
}

impl TradeState {
    /// Whether no further transitions are possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeState::Complete | TradeState::Failed)
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Started => write!(f, "STARTED"),
            TradeState::Ordered => write!(f, "ORDERED"),
            TradeState::Complete => write!(f, "COMPLETE"),
            TradeState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Full record of one conversion attempt from one coin to another.
///
/// Balances and amounts are filled in as the conversion progresses:
/// the ORDERED transition captures where funds stood after the sell leg,
/// the COMPLETE transition captures what the buy leg actually filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub from_symbol: String,
    pub to_symbol: String,
    /// True when the record tracks a plain liquidation rather than a jump.
    pub selling: bool,
    pub state: TradeState,
    /// Reserve balance right after the sell leg filled.
    pub reserve_starting_balance: Option<f64>,
    /// From-coin balance before the sell leg.
    pub from_starting_balance: Option<f64>,
    /// To-coin quantity the buy estimate promised.
    pub expected_amount: Option<f64>,
    /// To-coin quantity the buy leg actually filled.
    pub filled_amount: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Open a new record in STARTED.
    pub fn new(from_symbol: &str, to_symbol: &str, selling: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_symbol: from_symbol.to_string(),
            to_symbol: to_symbol.to_string(),
            selling,
            state: TradeState::Started,
            reserve_starting_balance: None,
            from_starting_balance: None,
            expected_amount: None,
            filled_amount: None,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Record the sell-leg fill: STARTED → ORDERED.
    pub fn set_ordered(
        &mut self,
        reserve_starting_balance: f64,
        from_starting_balance: f64,
        expected_amount: f64,
    ) {
        self.reserve_starting_balance = Some(reserve_starting_balance);
        self.from_starting_balance = Some(from_starting_balance);
        self.expected_amount = Some(expected_amount);
        self.state = TradeState::Ordered;
        self.updated_at = Utc::now();
    }

    /// Record the buy-leg fill: ORDERED → COMPLETE.
    pub fn set_complete(&mut self, filled_amount: f64) {
        self.filled_amount = Some(filled_amount);
        self.state = TradeState::Complete;
        self.updated_at = Utc::now();
    }

    /// Abandon the conversion from any non-terminal state.
    pub fn set_failed(&mut self) {
        self.state = TradeState::Failed;
        self.updated_at = Utc::now();
    }

    #[cfg(test)]
    pub fn sample() -> Self {
        let mut record = TradeRecord::new("XMR", "DOGE", false);
        record.set_ordered(110.0, 30.0, 60.0);
        record.set_complete(20.0);
        record
    }
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}] expected={} filled={}",
            self.from_symbol,
            self.to_symbol,
            self.state,
            self.expected_amount
                .map_or_else(|| "-".to_string(), |v| format!("{v:.8}")),
            self.filled_amount
                .map_or_else(|| "-".to_string(), |v| format!("{v:.8}")),
        )
    }
}

// ---------------------------------------------------------------------------
// Order execution
// ---------------------------------------------------------------------------

/// Fill report returned by a venue after an order executes.
///
/// `cumulative_quote_qty` is the gross quote amount moved by the fill;
/// fees are deducted from the credited side, not from this figure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub market: String,
    pub price: f64,
    pub cumulative_filled_quantity: f64,
    pub cumulative_quote_qty: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for OrderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:.8} @ {:.8} (quote {:.8}) [{}]",
            self.market,
            self.cumulative_filled_quantity,
            self.price,
            self.cumulative_quote_qty,
            self.order_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Scout history
// ---------------------------------------------------------------------------

/// One evaluated pair within a scout pass.
///
/// `ratio_diff` is the fee-adjusted improvement over the pair's baseline;
/// positive means the pair beat its threshold at this instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutRecord {
    pub pair_id: i64,
    pub from_symbol: String,
    pub to_symbol: String,
    pub ratio_diff: f64,
    pub target_ratio: f64,
    /// Sell price of the held coin into the reserve.
    pub current_price: f64,
    /// Buy price of the candidate coin from the reserve.
    pub other_price: f64,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for ScoutRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} diff={:+.6} target={:.6}",
            self.from_symbol, self.to_symbol, self.ratio_diff, self.target_ratio,
        )
    }
}

// ---------------------------------------------------------------------------
// Portfolio valuation
// ---------------------------------------------------------------------------

/// Point-in-time valuation of one holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetValue {
    pub symbol: String,
    pub balance: f64,
    /// Price of one unit in the reserve asset, absent when no quote exists.
    pub reserve_price: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl AssetValue {
    /// Holding value in reserve terms, absent without a quote.
    pub fn reserve_value(&self) -> Option<f64> {
        self.reserve_price.map(|p| p * self.balance)
    }
}

impl fmt::Display for AssetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reserve_value() {
            Some(v) => write!(f, "{}: {:.8} (= {:.2})", self.symbol, self.balance, v),
            None => write!(f, "{}: {:.8} (no quote)", self.symbol, self.balance),
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of a single scout-flush cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub assets_scouted: u64,
    pub pairs_evaluated: u64,
    pub jumps: u64,
    pub cells_flushed: u64,
    pub current_symbol: Option<String>,
    /// Portfolio value collated in the reserve asset, when priceable.
    pub portfolio_value: Option<f64>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle #{}: scouted={} pairs={} jumps={} flushed={} holding={} value={}",
            self.cycle_number,
            self.assets_scouted,
            self.pairs_evaluated,
            self.jumps,
            self.cells_flushed,
            self.current_symbol.as_deref().unwrap_or("-"),
            self.portfolio_value
                .map_or_else(|| "-".to_string(), |v| format!("{v:.2}")),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for HOPPER.
#[derive(Debug, thiserror::Error)]
pub enum HopperError {
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Pair references asset outside the current registry generation: {symbol}")]
    InconsistentAsset { symbol: String },

    #[error("Matrix access out of range: ({from}, {to}) with {size} assets")]
    OutOfRange { from: usize, to: usize, size: usize },

    #[error("Price violation on {market}: limit {limit:.8} above market {market_price:.8}")]
    PriceViolation {
        market: String,
        limit: f64,
        market_price: f64,
    },

    #[error("Clock interval must be positive, got {minutes} minutes")]
    InvalidInterval { minutes: i64 },

    #[error("No quote available for {market}")]
    NoQuote { market: String },

    #[error("Insufficient balance: need {needed:.8} {symbol}, have {available:.8}")]
    InsufficientBalance {
        symbol: String,
        needed: f64,
        available: f64,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
