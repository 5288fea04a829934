//! Deterministic replay venue backed by recorded prices.
//!
//! Holds an in-memory portfolio and a simulated clock; every quote is the
//! most recent recorded sample at or before the clock. Fills are computed
//! with the same quantization and fee rules on every run, so a backtest
//! over the same data always produces the same trades.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::exchange::history::PriceHistory;
use crate::exchange::{
    buy_quantity, market_symbol, sell_quantity, BuyEstimate, PriceSource, SellEstimate,
};
use crate::types::{HopperError, OrderResult};

pub const VENUE_NAME: &str = "replay";

/// Taker fee per leg; mirrors the flat spot rate on the modelled venue.
pub const DEFAULT_FEE_RATE: f64 = 0.001;

/// Minimum quote notional per order.
pub const DEFAULT_MIN_NOTIONAL: f64 = 10.0;

/// Decimal places quantities are floored to before a fill.
pub const DEFAULT_QUANTITY_DECIMALS: i32 = 2;

// ---------------------------------------------------------------------------
// Portfolio state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub balances: HashMap<String, f64>,
    pub clock: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ReplayPriceSource
// ---------------------------------------------------------------------------

pub struct ReplayPriceSource {
    history: Arc<dyn PriceHistory>,
    reserve_symbol: String,
    state: Mutex<PortfolioState>,
    fee_rate: f64,
    min_notional: f64,
    quantity_decimals: i32,
    order_seq: AtomicU64,
}

impl ReplayPriceSource {
    pub fn new(
        history: Arc<dyn PriceHistory>,
        reserve_symbol: &str,
        balances: HashMap<String, f64>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            history,
            reserve_symbol: reserve_symbol.to_string(),
            state: Mutex::new(PortfolioState {
                balances,
                clock: start,
            }),
            fee_rate: DEFAULT_FEE_RATE,
            min_notional: DEFAULT_MIN_NOTIONAL,
            quantity_decimals: DEFAULT_QUANTITY_DECIMALS,
            order_seq: AtomicU64::new(0),
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: f64) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn with_min_notional(mut self, min_notional: f64) -> Self {
        self.min_notional = min_notional;
        self
    }

    pub fn with_quantity_decimals(mut self, decimals: i32) -> Self {
        self.quantity_decimals = decimals;
        self
    }

    /// Move the simulated clock forward and return the new instant.
    pub fn advance_clock(&self, minutes: i64) -> Result<DateTime<Utc>, HopperError> {
        if minutes <= 0 {
            return Err(HopperError::InvalidInterval { minutes });
        }
        let mut state = self.state.lock().unwrap();
        state.clock += Duration::minutes(minutes);
        Ok(state.clock)
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().clock
    }

    /// Overwrite one balance. Used by fixtures and state restoration.
    pub fn set_balance(&self, symbol: &str, amount: f64) {
        let mut state = self.state.lock().unwrap();
        state.balances.insert(symbol.to_string(), amount);
    }

    pub fn balances(&self) -> HashMap<String, f64> {
        self.state.lock().unwrap().balances.clone()
    }

    fn quote_at_clock(&self, market: &str) -> Option<f64> {
        let clock = self.state.lock().unwrap().clock;
        self.history.price_at(market, clock)
    }

    fn next_order_id(&self) -> String {
        format!("SIM-{}", self.order_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Portfolio value expressed in `target`.
    ///
    /// The target's own units count at rate 1; every other holding
    /// converts through its reserve market, then through the target's
    /// reserve market when the target is not the reserve itself.
    /// Holdings with no usable quote are skipped.
    pub fn collate_value(&self, target: &str) -> f64 {
        let state = self.state.lock().unwrap();
        let clock = state.clock;
        let mut total = 0.0;

        for (symbol, &balance) in &state.balances {
            if balance == 0.0 {
                continue;
            }
            if symbol == target {
                total += balance;
                continue;
            }

            let in_reserve = if symbol == &self.reserve_symbol {
                balance
            } else {
                let market = market_symbol(symbol, &self.reserve_symbol);
                match self.history.price_at(&market, clock) {
                    Some(price) => balance * price,
                    None => continue,
                }
            };

            if target == self.reserve_symbol {
                total += in_reserve;
            } else {
                let market = market_symbol(target, &self.reserve_symbol);
                match self.history.price_at(&market, clock) {
                    Some(price) => total += in_reserve / price,
                    None => continue,
                }
            }
        }
        total
    }

    fn check_limit(&self, market: &str, limit_price: f64, price: f64) -> Result<(), HopperError> {
        if limit_price > 0.0 && limit_price > price * (1.0 + f64::EPSILON) {
            return Err(HopperError::PriceViolation {
                market: market.to_string(),
                limit: limit_price,
                market_price: price,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PriceSource for ReplayPriceSource {
    async fn ticker_price(&self, market: &str) -> Result<Option<f64>> {
        Ok(self.quote_at_clock(market))
    }

    async fn market_sell_estimate(
        &self,
        market: &str,
        quantity: f64,
    ) -> Result<Option<SellEstimate>> {
        Ok(self.quote_at_clock(market).map(|price| SellEstimate {
            price,
            quote_proceeds: price * quantity,
        }))
    }

    async fn market_buy_estimate(
        &self,
        market: &str,
        quote_amount: f64,
    ) -> Result<Option<BuyEstimate>> {
        Ok(self.quote_at_clock(market).map(|price| BuyEstimate {
            price,
            base_quantity: quote_amount / price,
        }))
    }

    async fn fee(&self, _base: &str, _quote: &str, _is_sell: bool) -> Result<f64> {
        Ok(self.fee_rate)
    }

    async fn min_notional(&self, _base: &str, _quote: &str) -> Result<f64> {
        Ok(self.min_notional)
    }

    async fn balance(&self, symbol: &str) -> Result<f64> {
        let state = self.state.lock().unwrap();
        Ok(*state.balances.get(symbol).unwrap_or(&0.0))
    }

    async fn execute_sell(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult> {
        let market = market_symbol(base, quote);
        let mut state = self.state.lock().unwrap();

        let price = self
            .history
            .price_at(&market, state.clock)
            .ok_or_else(|| HopperError::NoQuote {
                market: market.clone(),
            })?;
        self.check_limit(&market, limit_price, price)?;

        let held = *state.balances.get(base).unwrap_or(&0.0);
        let quantity = sell_quantity(held, self.quantity_decimals);
        if quantity <= 0.0 {
            return Err(HopperError::InsufficientBalance {
                symbol: base.to_string(),
                needed: 10f64.powi(-self.quantity_decimals),
                available: held,
            }
            .into());
        }

        *state.balances.entry(base.to_string()).or_insert(0.0) -= quantity;
        *state.balances.entry(quote.to_string()).or_insert(0.0) +=
            quantity * price * (1.0 - self.fee_rate);

        let result = OrderResult {
            order_id: self.next_order_id(),
            market,
            price,
            cumulative_filled_quantity: quantity,
            cumulative_quote_qty: quantity * price,
            timestamp: state.clock,
        };
        debug!(order = %result, "Replay sell filled");
        Ok(result)
    }

    async fn execute_buy(
        &self,
        base: &str,
        quote: &str,
        limit_price: f64,
    ) -> Result<OrderResult> {
        let market = market_symbol(base, quote);
        let mut state = self.state.lock().unwrap();

        let price = self
            .history
            .price_at(&market, state.clock)
            .ok_or_else(|| HopperError::NoQuote {
                market: market.clone(),
            })?;
        self.check_limit(&market, limit_price, price)?;

        let quote_held = *state.balances.get(quote).unwrap_or(&0.0);
        let quantity = buy_quantity(quote_held, price, self.quantity_decimals);
        if quantity <= 0.0 {
            return Err(HopperError::InsufficientBalance {
                symbol: quote.to_string(),
                needed: price * 10f64.powi(-self.quantity_decimals),
                available: quote_held,
            }
            .into());
        }

        *state.balances.entry(quote.to_string()).or_insert(0.0) -= quantity * price;
        *state.balances.entry(base.to_string()).or_insert(0.0) +=
            quantity * (1.0 - self.fee_rate);

        let result = OrderResult {
            order_id: self.next_order_id(),
            market,
            price,
            cumulative_filled_quantity: quantity,
            cumulative_quote_qty: quantity * price,
            timestamp: state.clock,
        };
        debug!(order = %result, "Replay buy filled");
        Ok(result)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock()
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::history::MemoryPriceHistory;
    use chrono::TimeZone;

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
    }

    fn make_source(prices: &[(&str, f64)]) -> ReplayPriceSource {
        let mut history = MemoryPriceHistory::new();
        for (market, price) in prices {
            history.insert(market, start_time(), *price);
        }
        let balances = HashMap::from([
            ("XLM".to_string(), 100.0),
            ("DOGE".to_string(), 101.0),
            ("USDT".to_string(), 1000.0),
        ]);
        ReplayPriceSource::new(Arc::new(history), "USDT", balances, start_time())
    }

    // -- Clock tests --

    #[test]
    fn test_advance_clock() {
        let source = make_source(&[]);
        let after = source.advance_clock(10).unwrap();
        assert_eq!(after, start_time() + Duration::minutes(10));
        assert_eq!(source.clock(), after);
    }

    #[test]
    fn test_advance_clock_rejects_non_positive() {
        let source = make_source(&[]);
        assert!(matches!(
            source.advance_clock(0),
            Err(HopperError::InvalidInterval { minutes: 0 })
        ));
        assert!(matches!(
            source.advance_clock(-10),
            Err(HopperError::InvalidInterval { minutes: -10 })
        ));
        assert_eq!(source.clock(), start_time());
    }

    // -- Quote tests --

    #[tokio::test]
    async fn test_ticker_price_present_and_absent() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        assert_eq!(
            source.ticker_price("XLMUSDT").await.unwrap(),
            Some(0.30)
        );
        assert_eq!(source.ticker_price("GHOSTUSDT").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ticker_uses_latest_at_or_before_clock() {
        let mut history = MemoryPriceHistory::new();
        history.insert("XLMUSDT", start_time(), 0.30);
        history.insert("XLMUSDT", start_time() + Duration::minutes(5), 0.35);
        let source = ReplayPriceSource::new(
            Arc::new(history),
            "USDT",
            HashMap::new(),
            start_time(),
        );

        assert_eq!(source.ticker_price("XLMUSDT").await.unwrap(), Some(0.30));
        source.advance_clock(5).unwrap();
        assert_eq!(source.ticker_price("XLMUSDT").await.unwrap(), Some(0.35));
    }

    #[tokio::test]
    async fn test_sell_estimate_math() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        let estimate = source
            .market_sell_estimate("XLMUSDT", 20.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(estimate.price, 0.30);
        assert!((estimate.quote_proceeds - 6.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_buy_estimate_math() {
        let source = make_source(&[("DOGEUSDT", 0.25)]);
        let estimate = source
            .market_buy_estimate("DOGEUSDT", 100.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(estimate.price, 0.25);
        assert!((estimate.base_quantity - 400.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_fee_is_flat_both_directions() {
        let source = make_source(&[]);
        assert_eq!(source.fee("XLM", "USDT", true).await.unwrap(), 0.001);
        assert_eq!(source.fee("XLM", "USDT", false).await.unwrap(), 0.001);
    }

    #[tokio::test]
    async fn test_balance_unknown_symbol_is_zero() {
        let source = make_source(&[]);
        assert_eq!(source.balance("GHOST").await.unwrap(), 0.0);
        assert_eq!(source.balance("XLM").await.unwrap(), 100.0);
    }

    // -- Execution tests --

    #[tokio::test]
    async fn test_sell_at_market_price_fills() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        let order = source.execute_sell("XLM", "USDT", 0.30).await.unwrap();

        assert_eq!(order.price, 0.30);
        assert_eq!(order.cumulative_filled_quantity, 100.0);
        assert!((order.cumulative_quote_qty - 30.0).abs() < 1e-10);

        let balances = source.balances();
        assert_eq!(balances["XLM"], 0.0);
        assert!((balances["USDT"] - (1000.0 + 30.0 * 0.999)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_above_market_violates() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        let err = source
            .execute_sell("XLM", "USDT", 0.30 + 1e-14)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HopperError>(),
            Some(HopperError::PriceViolation { .. })
        ));
        // Nothing moved.
        assert_eq!(source.balances()["XLM"], 100.0);
    }

    #[tokio::test]
    async fn test_sell_market_order_fills() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        let order = source.execute_sell("XLM", "USDT", 0.0).await.unwrap();
        assert_eq!(order.cumulative_filled_quantity, 100.0);
    }

    #[tokio::test]
    async fn test_buy_at_market_price_fills_all_in() {
        let source = make_source(&[("DOGEUSDT", 0.25)]);
        let order = source.execute_buy("DOGE", "USDT", 0.25).await.unwrap();

        assert_eq!(order.price, 0.25);
        assert_eq!(order.cumulative_filled_quantity, 4000.0);
        assert!((order.cumulative_quote_qty - 1000.0).abs() < 1e-9);

        let balances = source.balances();
        assert!((balances["USDT"] - 0.0).abs() < 1e-9);
        assert!((balances["DOGE"] - (101.0 + 4000.0 * 0.999)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_buy_above_market_violates() {
        let source = make_source(&[("DOGEUSDT", 0.25)]);
        let err = source
            .execute_buy("DOGE", "USDT", 0.25 + 1e-14)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HopperError>(),
            Some(HopperError::PriceViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_buy_market_order_fills() {
        let source = make_source(&[("DOGEUSDT", 0.25)]);
        assert!(source.execute_buy("DOGE", "USDT", 0.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_without_quote_is_no_quote() {
        let source = make_source(&[]);
        let err = source.execute_sell("XLM", "USDT", 0.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HopperError>(),
            Some(HopperError::NoQuote { .. })
        ));
    }

    #[tokio::test]
    async fn test_sell_with_empty_balance_is_insufficient() {
        let source = make_source(&[("XLMUSDT", 0.30)]);
        source.set_balance("XLM", 0.0);
        let err = source.execute_sell("XLM", "USDT", 0.0).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HopperError>(),
            Some(HopperError::InsufficientBalance { .. })
        ));
    }

    // -- Collation tests --

    #[test]
    fn test_collate_single_holding_in_own_units() {
        let mut history = MemoryPriceHistory::new();
        history.insert("XMRUSDT", start_time(), 250.0);
        let source = ReplayPriceSource::new(
            Arc::new(history),
            "USDT",
            HashMap::from([("XMR".to_string(), 300.0)]),
            start_time(),
        );
        assert!((source.collate_value("XMR") - 300.0).abs() < 1e-10);
    }

    #[test]
    fn test_collate_mixed_holdings_in_reserve() {
        let mut history = MemoryPriceHistory::new();
        history.insert("XMRUSDT", start_time(), 250.0);
        history.insert("BTTUSDT", start_time(), 0.003);
        let source = ReplayPriceSource::new(
            Arc::new(history),
            "USDT",
            HashMap::from([("XMR".to_string(), 400.0), ("BTT".to_string(), 500.0)]),
            start_time(),
        );
        let expected = 400.0 * 250.0 + 500.0 * 0.003;
        assert!((source.collate_value("USDT") - expected).abs() < 1e-9);
    }

    #[test]
    fn test_collate_reserve_holding_at_rate_one() {
        let source = ReplayPriceSource::new(
            Arc::new(MemoryPriceHistory::new()),
            "BTT",
            HashMap::from([("BTT".to_string(), 400.0)]),
            start_time(),
        );
        assert!((source.collate_value("BTT") - 400.0).abs() < 1e-10);
    }

    #[test]
    fn test_collate_skips_unpriced_holdings() {
        let mut history = MemoryPriceHistory::new();
        history.insert("XMRUSDT", start_time(), 250.0);
        let source = ReplayPriceSource::new(
            Arc::new(history),
            "USDT",
            HashMap::from([("XMR".to_string(), 2.0), ("BAD".to_string(), 103.0)]),
            start_time(),
        );
        assert!((source.collate_value("USDT") - 500.0).abs() < 1e-9);
    }
}
