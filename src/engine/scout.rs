//! Scout engine.
//!
//! Drives the rotation decision each cycle: for every held asset,
//! compare the current fee-adjusted exchange ratio against each pair's
//! baseline and jump to the best candidate that beats it. When nothing
//! beats its baseline the observed ratios become the new baselines, so
//! drifting prices keep thresholds honest and static prices never
//! trigger a jump.

use std::sync::Arc;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::engine::executor::TradeExecutor;
use crate::exchange::{market_symbol, PriceSource};
use crate::notify::{EngineEvent, Notifier};
use crate::ratios::RatioMatrix;
use crate::registry::AssetRegistry;
use crate::storage::Store;
use crate::types::{AssetValue, CycleReport, ScoutRecord, TradeRecord};

// ---------------------------------------------------------------------------
// Scout results
// ---------------------------------------------------------------------------

/// One candidate target evaluated against the held asset.
#[derive(Debug, Clone, Copy)]
struct RatioDiff {
    to_index: usize,
    pair_id: i64,
    /// Fee-adjusted improvement over the baseline; positive beats it.
    diff: f64,
    /// Raw observed ratio, sell price over candidate buy price.
    cur_ratio: f64,
    buy_price: f64,
}

/// Counters from one scout pass.
#[derive(Debug, Clone, Default)]
pub struct ScoutSummary {
    pub assets_scouted: u64,
    pub pairs_evaluated: u64,
    pub jumps: u64,
    /// Asset swept into from leftover reserve, when the bridge scout fired.
    pub swept: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Rotation engine: registry, ratio matrix, venue, persistence and the
/// executor, driven through `run_cycle`.
pub struct ScoutEngine {
    settings: EngineSettings,
    registry: AssetRegistry,
    matrix: RatioMatrix,
    venue: Arc<dyn PriceSource>,
    executor: TradeExecutor,
    store: Store,
    notifier: Arc<dyn Notifier>,
    current_index: Option<usize>,
    cycle_count: u64,
}

impl ScoutEngine {
    pub fn new(
        settings: EngineSettings,
        registry: AssetRegistry,
        matrix: RatioMatrix,
        venue: Arc<dyn PriceSource>,
        store: Store,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor = TradeExecutor::new(
            venue.clone(),
            notifier.clone(),
            &settings.reserve_symbol,
        );
        Self {
            settings,
            registry,
            matrix,
            venue,
            executor,
            store,
            notifier,
            current_index: None,
            cycle_count: 0,
        }
    }

    /// The engine can scout only with a non-empty tracked set.
    pub fn is_ready(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn current_symbol(&self) -> Option<&str> {
        self.current_index
            .and_then(|index| self.registry.by_index(index).ok())
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn matrix(&self) -> &RatioMatrix {
        &self.matrix
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn save_state(&mut self) -> Result<()> {
        self.store.save()
    }

    // -- Initialisation ---------------------------------------------------

    /// Baseline uninitialised pairs and restore or choose the held
    /// asset. Must run once before the first cycle.
    pub async fn initialize(&mut self) -> Result<()> {
        if !self.is_ready() {
            anyhow::bail!("No tracked assets configured, engine cannot scout");
        }
        self.initialize_trade_thresholds().await?;
        self.initialize_current_asset().await?;
        self.store.save()?;
        Ok(())
    }

    /// Fill every unbaselined pair from current tickers. Pairs with a
    /// persisted baseline keep it; assets without a quote are left for
    /// a later pass.
    pub async fn initialize_trade_thresholds(&mut self) -> Result<()> {
        let mut prices: Vec<Option<f64>> = Vec::with_capacity(self.registry.len());
        for index in self.registry.indices() {
            let symbol = self.registry.by_index(index)?;
            let market = market_symbol(symbol, &self.settings.reserve_symbol);
            prices.push(self.venue.ticker_price(&market).await?);
        }

        let mut initialized = 0usize;
        for from in self.registry.indices() {
            for to in self.registry.indices() {
                if from == to || self.matrix.get(from, to)?.is_some() {
                    continue;
                }
                if let (Some(from_price), Some(to_price)) = (prices[from], prices[to]) {
                    self.matrix.set(from, to, from_price / to_price)?;
                    initialized += 1;
                }
            }
        }

        info!(
            assets = self.registry.len(),
            pairs = initialized,
            "Trade thresholds initialised"
        );
        Ok(())
    }

    /// Restore the persisted current-asset pointer, or fall back to the
    /// configured symbol, or pick a random tracked asset.
    pub async fn initialize_current_asset(&mut self) -> Result<()> {
        if let Some(symbol) = self.store.current_symbol() {
            if let Ok(index) = self.registry.by_symbol(symbol) {
                info!(symbol = %symbol, "Restored current asset from state");
                self.current_index = Some(index);
                return Ok(());
            }
            warn!(symbol = %symbol, "Persisted current asset no longer tracked");
        }

        let choice = match &self.settings.current_asset {
            Some(symbol) if self.registry.contains(symbol) => symbol.clone(),
            _ => self
                .registry
                .symbols()
                .choose(&mut rand::thread_rng())
                .cloned()
                .context("No tracked assets to choose a current asset from")?,
        };
        let index = self.registry.by_symbol(&choice)?;
        self.current_index = Some(index);
        self.store.set_current_symbol(&choice);
        info!(symbol = %choice, "Current asset initialised");
        Ok(())
    }

    // -- Scouting ---------------------------------------------------------

    /// One scout pass over every held asset, followed by the bridge
    /// sweep.
    pub async fn scout(&mut self) -> Result<ScoutSummary> {
        let mut summary = ScoutSummary::default();

        for index in self.registry.indices() {
            let symbol = self.registry.by_index(index)?.to_string();
            let balance = self.venue.balance(&symbol).await?;
            if balance <= 0.0 {
                continue;
            }

            let market = market_symbol(&symbol, &self.settings.reserve_symbol);
            let estimate = match self.venue.market_sell_estimate(&market, balance).await? {
                Some(estimate) => estimate,
                None => {
                    info!(market = %market, "Skipping scout, no ticker for held asset");
                    continue;
                }
            };

            let min_notional = self
                .venue
                .min_notional(&symbol, &self.settings.reserve_symbol)
                .await?;
            if estimate.price * balance < min_notional {
                debug!(
                    symbol = %symbol,
                    value = estimate.price * balance,
                    min_notional = min_notional,
                    "Holding below minimum notional, skipped"
                );
                continue;
            }

            summary.assets_scouted += 1;
            let (diffs, records) = self
                .ratio_diffs(index, estimate.price, estimate.quote_proceeds)
                .await?;
            summary.pairs_evaluated += diffs.len() as u64;
            self.store.append_scout_records(records);

            let best = diffs
                .iter()
                .filter(|d| d.diff > 0.0)
                .max_by(|a, b| a.diff.total_cmp(&b.diff))
                .copied();

            match best {
                Some(best) => {
                    if self.jump_to_best(index, best, estimate.price).await? {
                        summary.jumps += 1;
                    }
                }
                None => {
                    // Nothing beats its baseline: the observations
                    // become the new baselines.
                    for d in &diffs {
                        self.matrix.set(index, d.to_index, d.cur_ratio)?;
                    }
                }
            }
        }

        summary.swept = self.bridge_scout().await?;
        Ok(summary)
    }

    /// Fee-adjusted improvement of every candidate over its baseline,
    /// plus the scout history rows for this evaluation. A pair seen
    /// without a baseline is baselined from the observation itself.
    async fn ratio_diffs(
        &mut self,
        from_index: usize,
        sell_price: f64,
        spendable: f64,
    ) -> Result<(Vec<RatioDiff>, Vec<ScoutRecord>)> {
        let from_symbol = self.registry.by_index(from_index)?.to_string();
        let sell_fee = self
            .venue
            .fee(&from_symbol, &self.settings.reserve_symbol, true)
            .await?;
        let recorded_at = self.venue.now();

        let mut diffs = Vec::new();
        let mut records = Vec::new();

        for to_index in self.registry.indices() {
            if to_index == from_index {
                continue;
            }
            let to_symbol = self.registry.by_index(to_index)?.to_string();
            let market = market_symbol(&to_symbol, &self.settings.reserve_symbol);
            let buy = match self.venue.market_buy_estimate(&market, spendable).await? {
                Some(estimate) => estimate,
                None => {
                    debug!(market = %market, "No quote for candidate, pair skipped");
                    continue;
                }
            };

            let buy_fee = self
                .venue
                .fee(&to_symbol, &self.settings.reserve_symbol, false)
                .await?;
            let fee_total = sell_fee + buy_fee;
            let cur_ratio = sell_price / buy.price;

            let baseline = match self.matrix.get(from_index, to_index)? {
                Some(baseline) => baseline,
                None => {
                    self.matrix.set(from_index, to_index, cur_ratio)?;
                    cur_ratio
                }
            };

            let diff = if self.settings.use_margin {
                cur_ratio * (1.0 - fee_total) / baseline
                    - 1.0
                    - self.settings.scout_margin_percent / 100.0
            } else {
                cur_ratio * (1.0 - fee_total * self.settings.scout_multiplier) - baseline
            };

            diffs.push(RatioDiff {
                to_index,
                pair_id: self.matrix.pair_id(from_index, to_index)?.unwrap_or(0),
                diff,
                cur_ratio,
                buy_price: buy.price,
            });
            records.push(ScoutRecord {
                pair_id: self.matrix.pair_id(from_index, to_index)?.unwrap_or(0),
                from_symbol: from_symbol.clone(),
                to_symbol,
                ratio_diff: diff,
                target_ratio: baseline,
                current_price: sell_price,
                other_price: buy.price,
                recorded_at,
            });
        }

        Ok((diffs, records))
    }

    /// Hand the winning candidate to the executor and move the pointer
    /// when the conversion completes.
    async fn jump_to_best(
        &mut self,
        from_index: usize,
        best: RatioDiff,
        sell_price: f64,
    ) -> Result<bool> {
        let from_symbol = self.registry.by_index(from_index)?.to_string();
        let to_symbol = self.registry.by_index(best.to_index)?.to_string();
        info!(
            from = %from_symbol,
            to = %to_symbol,
            diff = best.diff,
            pair_id = best.pair_id,
            "Jumping to better asset"
        );
        self.notifier.notify(EngineEvent::JumpSelected {
            from_symbol,
            to_symbol: to_symbol.clone(),
            ratio_diff: best.diff,
        });

        let outcome = self
            .executor
            .convert_through_reserve(
                &self.registry,
                &mut self.matrix,
                from_index,
                best.to_index,
                sell_price,
                best.buy_price,
            )
            .await?;
        self.store.record_trade(&outcome.record);

        if outcome.completed() {
            self.current_index = Some(best.to_index);
            self.store.set_current_symbol(&to_symbol);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Sweep leftover reserve into an asset no candidate currently
    /// beats, so stranded funds rejoin the rotation. A negative reserve
    /// balance reports nothing swept and touches nothing.
    pub async fn bridge_scout(&mut self) -> Result<Option<String>> {
        let reserve = self.settings.reserve_symbol.clone();
        let reserve_balance = self.venue.balance(&reserve).await?;
        if reserve_balance < 0.0 {
            warn!(
                balance = reserve_balance,
                "Reserve balance negative, nothing swept"
            );
            return Ok(None);
        }

        // Nothing to sweep while the held asset is still worth trading.
        if let Some(current) = self.current_index {
            let symbol = self.registry.by_index(current)?.to_string();
            let balance = self.venue.balance(&symbol).await?;
            let market = market_symbol(&symbol, &reserve);
            if let Some(estimate) = self.venue.market_sell_estimate(&market, balance).await? {
                let min_notional = self.venue.min_notional(&symbol, &reserve).await?;
                if estimate.price * balance > min_notional {
                    return Ok(None);
                }
            }
        }

        for index in self.registry.indices() {
            let symbol = self.registry.by_index(index)?.to_string();
            let market = market_symbol(&symbol, &reserve);
            let price = match self.venue.ticker_price(&market).await? {
                Some(price) => price,
                None => continue,
            };

            let (diffs, _) = self.ratio_diffs(index, price, reserve_balance).await?;
            if diffs.iter().any(|d| d.diff > 0.0) {
                continue;
            }
            // No candidate beats this asset right now; it is the one we
            // would not immediately rotate out of.
            if reserve_balance <= self.venue.min_notional(&symbol, &reserve).await? {
                continue;
            }

            info!(
                symbol = %symbol,
                reserve_balance = reserve_balance,
                "Sweeping leftover reserve into asset"
            );
            let mut record = TradeRecord::new(&reserve, &symbol, false);
            match self.venue.execute_buy(&symbol, &reserve, price).await {
                Ok(order) => {
                    record.set_ordered(reserve_balance, reserve_balance, reserve_balance / price);
                    record.set_complete(order.cumulative_filled_quantity);
                    self.store.record_trade(&record);
                    self.current_index = Some(index);
                    self.store.set_current_symbol(&symbol);
                    return Ok(Some(symbol));
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Bridge sweep buy failed");
                    record.set_failed();
                    self.store.record_trade(&record);
                    return Ok(None);
                }
            }
        }

        Ok(None)
    }

    // -- Valuation --------------------------------------------------------

    /// Largest single-holding value in reserve terms.
    pub async fn max_value_in_wallet(&self) -> Result<f64> {
        let mut max_value = self.venue.balance(&self.settings.reserve_symbol).await?;
        for index in self.registry.indices() {
            let symbol = self.registry.by_index(index)?;
            let balance = self.venue.balance(symbol).await?;
            if balance <= 0.0 {
                continue;
            }
            let market = market_symbol(symbol, &self.settings.reserve_symbol);
            if let Some(price) = self.venue.ticker_price(&market).await? {
                max_value = max_value.max(balance * price);
            }
        }
        Ok(max_value)
    }

    /// Record each holding's balance and reserve value, returning the
    /// collated portfolio total when anything was priceable.
    pub async fn record_value_snapshot(&mut self) -> Result<Option<f64>> {
        let recorded_at = self.venue.now();
        let mut values = Vec::new();

        let reserve_balance = self.venue.balance(&self.settings.reserve_symbol).await?;
        if reserve_balance > 0.0 {
            values.push(AssetValue {
                symbol: self.settings.reserve_symbol.clone(),
                balance: reserve_balance,
                reserve_price: Some(1.0),
                recorded_at,
            });
        }

        for index in self.registry.indices() {
            let symbol = self.registry.by_index(index)?.to_string();
            let balance = self.venue.balance(&symbol).await?;
            if balance <= 0.0 {
                continue;
            }
            let market = market_symbol(&symbol, &self.settings.reserve_symbol);
            let reserve_price = self.venue.ticker_price(&market).await?;
            values.push(AssetValue {
                symbol,
                balance,
                reserve_price,
                recorded_at,
            });
        }

        let mut total = None;
        for value in &values {
            if let Some(v) = value.reserve_value() {
                *total.get_or_insert(0.0) += v;
            }
        }
        self.store.record_values(values);
        Ok(total)
    }

    // -- Cycle ------------------------------------------------------------

    /// One full engine cycle: scout, flush dirty ratios, prune history,
    /// snapshot values, persist.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle_count += 1;
        let summary = self.scout().await?;
        let flushed = self.store.flush_ratios(&self.registry, &mut self.matrix)?;
        let pruned = self
            .store
            .prune_scout_history(self.settings.history_hours, self.venue.now());
        if pruned > 0 {
            debug!(records = pruned, "Scout history pruned");
        }
        let portfolio_value = self.record_value_snapshot().await?;
        self.store.save()?;

        Ok(CycleReport {
            cycle_number: self.cycle_count,
            timestamp: self.venue.now(),
            assets_scouted: summary.assets_scouted,
            pairs_evaluated: summary.pairs_evaluated,
            jumps: summary.jumps,
            cells_flushed: flushed as u64,
            current_symbol: self.current_symbol().map(str::to_string),
            portfolio_value,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
