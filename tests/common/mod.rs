//! Shared fixtures for integration tests.
//!
//! Builds deterministic replay venues and engines with known prices
//! and balances, so each scenario controls every quote the scout sees.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use hopper::config::EngineSettings;
use hopper::engine::ScoutEngine;
use hopper::exchange::history::MemoryPriceHistory;
use hopper::exchange::replay::ReplayPriceSource;
use hopper::notify::NullNotifier;
use hopper::ratios::RatioMatrix;
use hopper::registry::AssetRegistry;
use hopper::storage::Store;

/// Clock origin shared by every scenario.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap()
}

/// Ticker prices for the scenario universe at the clock origin. BAD is
/// tracked by some scenarios but never has a market.
pub fn seeded_history() -> MemoryPriceHistory {
    let t0 = start_time();
    let mut history = MemoryPriceHistory::new();
    history.insert("XLMUSDT", t0, 0.30);
    history.insert("DOGEUSDT", t0, 0.05);
    history.insert("ADAUSDT", t0, 2.0);
    history.insert("BTTUSDT", t0, 0.0013);
    history.insert("EOSUSDT", t0, 5.0);
    history
}

/// Margin-mode settings over the given universe.
pub fn margin_settings(assets: &[&str], current: Option<&str>) -> EngineSettings {
    EngineSettings {
        reserve_symbol: "USDT".to_string(),
        assets: assets.iter().map(|s| s.to_string()).collect(),
        current_asset: current.map(str::to_string),
        use_margin: true,
        scout_margin_percent: 0.5,
        ..EngineSettings::default()
    }
}

/// Engine over an ephemeral store and a replay venue seeded with the
/// given history and balances.
pub fn make_engine(
    history: MemoryPriceHistory,
    balances: &[(&str, f64)],
    settings: EngineSettings,
) -> (ScoutEngine, Arc<ReplayPriceSource>) {
    let balances: HashMap<String, f64> = balances
        .iter()
        .map(|(symbol, amount)| (symbol.to_string(), *amount))
        .collect();
    let venue = Arc::new(ReplayPriceSource::new(
        Arc::new(history),
        "USDT",
        balances,
        start_time(),
    ));

    let mut registry = AssetRegistry::new();
    let mut store = Store::ephemeral();
    let pairs = store.set_assets(&mut registry, &settings.assets);
    let matrix = RatioMatrix::build(&registry, &pairs).unwrap();

    let engine = ScoutEngine::new(
        settings,
        registry,
        matrix,
        venue.clone(),
        store,
        Arc::new(NullNotifier),
    );
    (engine, venue)
}
