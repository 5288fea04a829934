//! Venue integrations.
//!
//! Defines the `PriceSource` trait and provides implementations for:
//! - Replay: deterministic venue over recorded prices (backtests, dry runs)
//! - Live: Binance-style REST spot venue
//!
//! Markets are addressed by concatenated symbol, e.g. `XLMUSDT` for
//! selling XLM into USDT.

pub mod history;
pub mod live;
pub mod replay;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::OrderResult;

/// Concatenated market symbol for a base/quote pair.
pub fn market_symbol(base: &str, quote: &str) -> String {
    format!("{base}{quote}")
}

// ---------------------------------------------------------------------------
// Quantization
// ---------------------------------------------------------------------------

/// Largest multiple of 10^-decimals not exceeding `balance`.
///
/// Pure and deterministic; both venues quantize order quantities through
/// these before a fill.
pub fn sell_quantity(balance: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (balance * scale).floor() / scale
}

/// Largest multiple of 10^-decimals not exceeding `quote_balance / price`.
pub fn buy_quantity(quote_balance: f64, price: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (quote_balance * scale / price).floor() / scale
}

/// Estimated outcome of selling a fixed base quantity at market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SellEstimate {
    pub price: f64,
    /// Gross quote proceeds before fees.
    pub quote_proceeds: f64,
}

/// Estimated outcome of spending a fixed quote amount at market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyEstimate {
    pub price: f64,
    /// Base quantity obtainable before fees.
    pub base_quantity: f64,
}

/// Abstraction over trading venues.
///
/// Price reads return `Ok(None)` when the venue has no quote for the
/// market; that is an expected condition the caller skips over, not an
/// error. Execution methods return domain errors (price violation,
/// insufficient balance) that the executor maps to a failed conversion.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest traded price for a market.
    async fn ticker_price(&self, market: &str) -> Result<Option<f64>>;

    /// Price and gross quote proceeds of selling `quantity` at market.
    async fn market_sell_estimate(
        &self,
        market: &str,
        quantity: f64,
    ) -> Result<Option<SellEstimate>>;

    /// Price and base quantity obtainable for `quote_amount` at market.
    async fn market_buy_estimate(
        &self,
        market: &str,
        quote_amount: f64,
    ) -> Result<Option<BuyEstimate>>;

    /// Taker fee rate for one leg in the given direction.
    async fn fee(&self, base: &str, quote: &str, is_sell: bool) -> Result<f64>;

    /// Minimum quote notional the venue accepts for the market.
    async fn min_notional(&self, base: &str, quote: &str) -> Result<f64>;

    /// Free balance for a symbol; 0.0 for symbols never held.
    async fn balance(&self, symbol: &str) -> Result<f64>;

    /// Sell `base` into `quote` at up to `limit_price`.
    /// A limit of 0.0 places a market order.
    async fn execute_sell(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult>;

    /// Buy `base` with the full free `quote` balance at up to `limit_price`.
    /// A limit of 0.0 places a market order.
    async fn execute_buy(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult>;

    /// Venue time used to stamp engine records. Replay venues report
    /// their simulated clock instead of the wall clock.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Venue name for logging and identification.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
