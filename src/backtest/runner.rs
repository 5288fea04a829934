//! Historical replay engine.
//!
//! Drives the rotation loop over recorded ticker prices to evaluate
//! how the scout behaves across a date range: jumps taken, reserve
//! sweeps, portfolio value, and where the engine ends up holding.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::config::{EngineSettings, ReplaySettings};
use crate::engine::ScoutEngine;
use crate::exchange::history::MemoryPriceHistory;
use crate::exchange::replay::ReplayPriceSource;
use crate::notify::NullNotifier;
use crate::ratios::RatioMatrix;
use crate::registry::AssetRegistry;
use crate::storage::Store;
use crate::types::{HopperError, TradeRecord, TradeState};

// ---------------------------------------------------------------------------
// Replay results
// ---------------------------------------------------------------------------

/// Complete replay performance report.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cycles: u64,
    pub jumps: u64,
    pub sweeps: u64,
    pub failed_trades: u64,
    /// Portfolio value in the reserve at the first tick.
    pub start_value: f64,
    /// Portfolio value in the reserve at the last replayed tick.
    pub end_value: f64,
    pub return_pct: f64,
    /// Asset the engine is holding when the window closes.
    pub final_symbol: Option<String>,
    /// Non-zero balances at the end of the run, sorted by symbol.
    pub final_holdings: Vec<(String, f64)>,
    /// Portfolio value at each cycle for charting.
    pub value_history: Vec<(DateTime<Utc>, f64)>,
    /// Per-trade log.
    pub trade_log: Vec<TradeRecord>,
}

impl fmt::Display for BacktestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Replay {} to {}",
            self.start_time.format("%Y-%m-%d %H:%M"),
            self.end_time.format("%Y-%m-%d %H:%M")
        )?;
        writeln!(f, "  cycles:        {}", self.cycles)?;
        writeln!(f, "  jumps:         {}", self.jumps)?;
        writeln!(f, "  sweeps:        {}", self.sweeps)?;
        writeln!(f, "  failed trades: {}", self.failed_trades)?;
        writeln!(f, "  start value:   {:.2}", self.start_value)?;
        writeln!(f, "  end value:     {:.2}", self.end_value)?;
        writeln!(f, "  return:        {:+.2}%", self.return_pct)?;
        match &self.final_symbol {
            Some(symbol) => writeln!(f, "  holding:       {symbol}")?,
            None => writeln!(f, "  holding:       none")?,
        }
        for (symbol, amount) in &self.final_holdings {
            writeln!(f, "    {symbol}: {amount:.8}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct ReplayRunner {
    engine_settings: EngineSettings,
    replay_settings: ReplaySettings,
}

impl ReplayRunner {
    pub fn new(engine_settings: EngineSettings, replay_settings: ReplaySettings) -> Self {
        Self {
            engine_settings,
            replay_settings,
        }
    }

    /// Load the configured price file and replay the full window.
    pub async fn run(&self) -> Result<BacktestReport> {
        let path = Path::new(&self.replay_settings.history_file);
        let history = MemoryPriceHistory::load_csv(path)?;
        self.run_with_history(history).await
    }

    /// Replay against an already loaded history. Lets callers seed
    /// prices without a file on disk.
    pub async fn run_with_history(&self, history: MemoryPriceHistory) -> Result<BacktestReport> {
        if history.is_empty() {
            bail!("Price history is empty, nothing to replay");
        }

        let start = self.replay_settings.start()?;
        let end = self.replay_settings.end()?;
        if end <= start {
            bail!(
                "Replay end {} is not after start {}",
                self.replay_settings.end_date,
                self.replay_settings.start_date
            );
        }
        let step = self.replay_settings.step_minutes;
        if step <= 0 {
            return Err(HopperError::InvalidInterval { minutes: step }.into());
        }

        let venue = Arc::new(ReplayPriceSource::new(
            Arc::new(history),
            &self.engine_settings.reserve_symbol,
            self.replay_settings.starting_balances.clone(),
            start,
        ));

        let mut registry = AssetRegistry::new();
        let mut store = Store::ephemeral();
        let pairs = store.set_assets(&mut registry, &self.engine_settings.assets);
        let matrix = RatioMatrix::build(&registry, &pairs)?;

        let mut engine = ScoutEngine::new(
            self.engine_settings.clone(),
            registry,
            matrix,
            venue.clone(),
            store,
            Arc::new(NullNotifier),
        );
        engine.initialize().await?;

        let reserve = &self.engine_settings.reserve_symbol;
        let start_value = venue.collate_value(reserve);
        info!(
            start = %start,
            end = %end,
            step_minutes = step,
            start_value = start_value,
            "Replay started"
        );

        let mut value_history = vec![(start, start_value)];
        let mut cycles = 0u64;
        let mut jumps = 0u64;

        loop {
            let report = engine.run_cycle().await?;
            cycles += 1;
            jumps += report.jumps;
            if let Some(value) = report.portfolio_value {
                value_history.push((report.timestamp, value));
            }

            // The clock stays on the last tick inside the window, so
            // the closing mark uses replayed prices only.
            if venue.clock() + Duration::minutes(step) > end {
                break;
            }
            venue.advance_clock(step)?;
        }

        let end_value = venue.collate_value(reserve);
        let return_pct = if start_value > 0.0 {
            (end_value - start_value) / start_value * 100.0
        } else {
            0.0
        };

        let trade_log: Vec<TradeRecord> = engine.store().trade_history().to_vec();
        let failed_trades = trade_log
            .iter()
            .filter(|t| t.state == TradeState::Failed)
            .count() as u64;
        let sweeps = trade_log
            .iter()
            .filter(|t| !t.selling && t.state == TradeState::Complete)
            .count() as u64;

        let mut final_holdings: Vec<(String, f64)> = venue
            .balances()
            .into_iter()
            .filter(|(_, amount)| *amount > 0.0)
            .collect();
        final_holdings.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            cycles = cycles,
            jumps = jumps,
            end_value = end_value,
            "Replay finished"
        );

        Ok(BacktestReport {
            start_time: start,
            end_time: end,
            cycles,
            jumps,
            sweeps,
            failed_trades,
            start_value,
            end_value,
            return_pct,
            final_symbol: engine.current_symbol().map(str::to_string),
            final_holdings,
            value_history,
            trade_log,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn make_settings(current: Option<&str>) -> (EngineSettings, ReplaySettings) {
        let engine = EngineSettings {
            reserve_symbol: "USDT".to_string(),
            assets: vec!["XLM".to_string(), "DOGE".to_string()],
            current_asset: current.map(str::to_string),
            use_margin: true,
            scout_margin_percent: 0.5,
            ..EngineSettings::default()
        };
        let replay = ReplaySettings {
            start_date: "2021-06-01 00:00:00".to_string(),
            end_date: "2021-06-01 01:00:00".to_string(),
            step_minutes: 10,
            starting_balances: HashMap::from([
                ("XLM".to_string(), 100.0),
                ("USDT".to_string(), 0.0),
            ]),
            ..ReplaySettings::default()
        };
        (engine, replay)
    }

    fn flat_history() -> MemoryPriceHistory {
        let mut history = MemoryPriceHistory::new();
        history.insert("XLMUSDT", t(0), 0.30);
        history.insert("DOGEUSDT", t(0), 0.05);
        history
    }

    #[tokio::test]
    async fn flat_prices_hold_the_starting_asset() {
        let (engine, replay) = make_settings(Some("XLM"));
        let runner = ReplayRunner::new(engine, replay);

        let report = runner.run_with_history(flat_history()).await.unwrap();

        // Ticks at 0, 10, .., 60 minutes.
        assert_eq!(report.cycles, 7);
        assert_eq!(report.jumps, 0);
        assert_eq!(report.sweeps, 0);
        assert!(report.trade_log.is_empty());
        assert_eq!(report.final_symbol.as_deref(), Some("XLM"));
        assert!((report.start_value - 30.0).abs() < 1e-10);
        assert!((report.end_value - report.start_value).abs() < 1e-10);
        assert_eq!(report.final_holdings, vec![("XLM".to_string(), 100.0)]);
        // Opening mark plus one snapshot per cycle.
        assert_eq!(report.value_history.len(), 8);
    }

    #[tokio::test]
    async fn price_drop_triggers_exactly_one_jump() {
        let (engine, replay) = make_settings(Some("XLM"));
        let runner = ReplayRunner::new(engine, replay);

        let mut history = flat_history();
        history.insert("DOGEUSDT", t(30), 0.049);

        let report = runner.run_with_history(history).await.unwrap();

        assert_eq!(report.cycles, 7);
        assert_eq!(report.jumps, 1);
        assert_eq!(report.final_symbol.as_deref(), Some("DOGE"));
        assert_eq!(report.trade_log.len(), 1);
        let trade = &report.trade_log[0];
        assert!(trade.selling);
        assert_eq!(trade.from_symbol, "XLM");
        assert_eq!(trade.to_symbol, "DOGE");
        assert_eq!(trade.state, TradeState::Complete);
        // Two legs of fees came out of the portfolio.
        assert!(report.end_value < report.start_value);
        assert_eq!(report.failed_trades, 0);
    }

    #[tokio::test]
    async fn stranded_reserve_is_swept_back_in() {
        let (engine, mut replay) = make_settings(Some("XLM"));
        replay.starting_balances = HashMap::from([
            ("XLM".to_string(), 0.01),
            ("USDT".to_string(), 50.0),
        ]);
        let runner = ReplayRunner::new(engine, replay);

        let report = runner.run_with_history(flat_history()).await.unwrap();

        assert_eq!(report.sweeps, 1);
        assert_eq!(report.jumps, 0);
        assert_eq!(report.trade_log.len(), 1);
        let trade = &report.trade_log[0];
        assert!(!trade.selling);
        assert_eq!(trade.from_symbol, "USDT");
        assert_eq!(trade.state, TradeState::Complete);
        assert_eq!(report.final_symbol.as_deref(), Some("DOGE"));
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let (engine, replay) = make_settings(Some("XLM"));
        let runner = ReplayRunner::new(engine, replay);

        let err = runner
            .run_with_history(MemoryPriceHistory::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing to replay"));
    }

    #[tokio::test]
    async fn empty_asset_list_is_rejected() {
        let (mut engine, replay) = make_settings(None);
        engine.assets.clear();
        let runner = ReplayRunner::new(engine, replay);

        let err = runner.run_with_history(flat_history()).await.unwrap_err();
        assert!(err.to_string().contains("No tracked assets"));
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let (engine, mut replay) = make_settings(Some("XLM"));
        replay.end_date = replay.start_date.clone();
        let runner = ReplayRunner::new(engine, replay);

        let err = runner.run_with_history(flat_history()).await.unwrap_err();
        assert!(err.to_string().contains("is not after start"));
    }

    #[tokio::test]
    async fn zero_step_is_rejected() {
        let (engine, mut replay) = make_settings(Some("XLM"));
        replay.step_minutes = 0;
        let runner = ReplayRunner::new(engine, replay);

        let err = runner.run_with_history(flat_history()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HopperError>(),
            Some(HopperError::InvalidInterval { minutes: 0 })
        ));
    }

    #[tokio::test]
    async fn runs_from_a_csv_file() {
        let path = std::env::temp_dir().join(format!("hopper-replay-{}.csv", uuid::Uuid::new_v4()));
        let csv = "\
timestamp,market,price
2021-06-01 00:00:00,XLMUSDT,0.30
2021-06-01 00:00:00,DOGEUSDT,0.05
";
        std::fs::write(&path, csv).unwrap();

        let (engine, mut replay) = make_settings(Some("XLM"));
        replay.history_file = path.to_string_lossy().into_owned();
        let runner = ReplayRunner::new(engine, replay);

        let report = runner.run().await.unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(report.cycles, 7);
        assert_eq!(report.final_symbol.as_deref(), Some("XLM"));
    }

    #[test]
    fn report_formats_a_summary() {
        let report = BacktestReport {
            start_time: t(0),
            end_time: t(60),
            cycles: 7,
            jumps: 1,
            sweeps: 0,
            failed_trades: 0,
            start_value: 30.0,
            end_value: 29.94,
            return_pct: -0.2,
            final_symbol: Some("DOGE".to_string()),
            final_holdings: vec![("DOGE".to_string(), 611.01837)],
            value_history: vec![(t(0), 30.0)],
            trade_log: Vec::new(),
        };

        let rendered = report.to_string();
        assert!(rendered.contains("jumps:         1"));
        assert!(rendered.contains("return:        -0.20%"));
        assert!(rendered.contains("holding:       DOGE"));
        assert!(rendered.contains("DOGE: 611.01837000"));
    }
}
