//! Trade executor.
//!
//! Converts the held asset into a rotation target through the reserve:
//! a sell leg into the reserve followed by a buy leg out of it, with a
//! full TradeRecord lifecycle wrapped around both legs. Leg failures
//! are normal outcomes the scout recovers from, not errors.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::exchange::{market_symbol, PriceSource};
use crate::notify::{EngineEvent, Notifier};
use crate::ratios::RatioMatrix;
use crate::registry::AssetRegistry;
use crate::types::{OrderResult, TradeRecord, TradeState};

// ---------------------------------------------------------------------------
// Conversion outcome
// ---------------------------------------------------------------------------

/// Result of one attempted conversion, successful or abandoned.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub record: TradeRecord,
    pub sell_order: Option<OrderResult>,
    pub buy_order: Option<OrderResult>,
}

impl ConversionOutcome {
    pub fn completed(&self) -> bool {
        self.record.state == TradeState::Complete
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Executes two-leg conversions against a venue.
pub struct TradeExecutor {
    venue: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    reserve_symbol: String,
}

impl TradeExecutor {
    pub fn new(
        venue: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        reserve_symbol: &str,
    ) -> Self {
        Self {
            venue,
            notifier,
            reserve_symbol: reserve_symbol.to_string(),
        }
    }

    /// Convert the asset at `from_index` into the one at `to_index`.
    ///
    /// A failed sell leg abandons the trade with the wallet untouched;
    /// a failed buy leg abandons it with the proceeds parked in the
    /// reserve for a later bridge sweep. Either way the record ends
    /// FAILED inside an `Ok` outcome and the caller keeps scouting. On
    /// success the matrix pairs touching the target are re-baselined
    /// and the achieved ratio lands in the (from, to) cell.
    pub async fn convert_through_reserve(
        &self,
        registry: &AssetRegistry,
        matrix: &mut RatioMatrix,
        from_index: usize,
        to_index: usize,
        sell_price: f64,
        buy_price: f64,
    ) -> Result<ConversionOutcome> {
        let from_symbol = registry.by_index(from_index)?.to_string();
        let to_symbol = registry.by_index(to_index)?.to_string();

        let mut record = TradeRecord::new(&from_symbol, &to_symbol, true);
        info!(
            trade_id = %record.id,
            from = %from_symbol,
            to = %to_symbol,
            sell_price = sell_price,
            buy_price = buy_price,
            "Converting through reserve"
        );

        let from_starting = self.venue.balance(&from_symbol).await?;
        let reserve_starting = self.venue.balance(&self.reserve_symbol).await?;

        // Sell leg
        let sell_order = match self
            .venue
            .execute_sell(&from_symbol, &self.reserve_symbol, sell_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    from = %from_symbol,
                    error = %e,
                    "Sell leg failed, back to scouting"
                );
                record.set_failed();
                self.notify_failed(&from_symbol, &to_symbol, &e.to_string());
                return Ok(ConversionOutcome {
                    record,
                    sell_order: None,
                    buy_order: None,
                });
            }
        };

        let buy_market = market_symbol(&to_symbol, &self.reserve_symbol);
        let reserve_after_sell = self.venue.balance(&self.reserve_symbol).await?;
        let expected_amount = match self
            .venue
            .market_buy_estimate(&buy_market, reserve_after_sell)
            .await?
        {
            Some(estimate) => estimate.base_quantity,
            None if buy_price > 0.0 => reserve_after_sell / buy_price,
            None => 0.0,
        };
        record.set_ordered(reserve_starting, from_starting, expected_amount);
        debug!(
            trade_id = %record.id,
            proceeds = sell_order.cumulative_quote_qty,
            expected = expected_amount,
            "Sell leg filled"
        );

        // Buy leg
        let buy_order = match self
            .venue
            .execute_buy(&to_symbol, &self.reserve_symbol, buy_price)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(
                    to = %to_symbol,
                    error = %e,
                    "Buy leg failed, proceeds parked in reserve"
                );
                record.set_failed();
                self.notify_failed(&from_symbol, &to_symbol, &e.to_string());
                return Ok(ConversionOutcome {
                    record,
                    sell_order: Some(sell_order),
                    buy_order: None,
                });
            }
        };

        record.set_complete(buy_order.cumulative_filled_quantity);
        self.rebaseline_after_jump(
            registry,
            matrix,
            from_index,
            to_index,
            sell_order.price,
            buy_order.price,
        )
        .await?;

        info!(
            trade_id = %record.id,
            from = %from_symbol,
            to = %to_symbol,
            filled = buy_order.cumulative_filled_quantity,
            price = buy_order.price,
            "Conversion complete"
        );
        self.notifier.notify(EngineEvent::TradeCompleted {
            from_symbol,
            to_symbol,
            filled_amount: buy_order.cumulative_filled_quantity,
        });

        Ok(ConversionOutcome {
            record,
            sell_order: Some(sell_order),
            buy_order: Some(buy_order),
        })
    }

    /// Rewrite baselines for every pair touching the freshly-bought
    /// asset. The fill prices stand in for the from and to tickers, so
    /// the (from, to) cell receives exactly the achieved ratio and its
    /// mirror cell the inverse.
    async fn rebaseline_after_jump(
        &self,
        registry: &AssetRegistry,
        matrix: &mut RatioMatrix,
        from_index: usize,
        to_index: usize,
        from_fill_price: f64,
        to_fill_price: f64,
    ) -> Result<()> {
        for other in registry.indices() {
            if other == to_index {
                continue;
            }
            let other_price = if other == from_index {
                from_fill_price
            } else {
                let symbol = registry.by_index(other)?;
                let market = market_symbol(symbol, &self.reserve_symbol);
                match self.venue.ticker_price(&market).await? {
                    Some(price) => price,
                    None => {
                        debug!(
                            symbol = %symbol,
                            "No ticker during re-baseline, pair left untouched"
                        );
                        continue;
                    }
                }
            };
            matrix.set(to_index, other, to_fill_price / other_price)?;
            matrix.set(other, to_index, other_price / to_fill_price)?;
        }
        Ok(())
    }

    fn notify_failed(&self, from_symbol: &str, to_symbol: &str, reason: &str) {
        self.notifier.notify(EngineEvent::TradeFailed {
            from_symbol: from_symbol.to_string(),
            to_symbol: to_symbol.to_string(),
            reason: reason.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
