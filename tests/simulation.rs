//! End-to-end rotation scenarios over the replay venue.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use common::{make_engine, margin_settings, seeded_history, start_time};
use hopper::backtest::ReplayRunner;
use hopper::config::ReplaySettings;
use hopper::engine::ScoutEngine;
use hopper::exchange::history::MemoryPriceHistory;
use hopper::exchange::replay::ReplayPriceSource;
use hopper::notify::NullNotifier;
use hopper::ratios::RatioMatrix;
use hopper::registry::AssetRegistry;
use hopper::storage::{delete_state, Store};
use hopper::types::TradeState;

#[tokio::test]
async fn rotation_follows_sustained_price_moves() {
    let mut history = seeded_history();
    // DOGE cheapens 2% an hour in, XLM cheapens back an hour later.
    history.insert("DOGEUSDT", start_time() + Duration::minutes(60), 0.049);
    history.insert("XLMUSDT", start_time() + Duration::minutes(120), 0.294);

    let settings = margin_settings(&["XLM", "DOGE", "ADA", "BTT", "EOS", "BAD"], Some("XLM"));
    let replay = ReplaySettings {
        start_date: "2021-06-01 00:00:00".to_string(),
        end_date: "2021-06-01 03:00:00".to_string(),
        step_minutes: 10,
        starting_balances: HashMap::from([
            ("XLM".to_string(), 100.0),
            ("USDT".to_string(), 0.0),
        ]),
        ..ReplaySettings::default()
    };

    let report = ReplayRunner::new(settings, replay)
        .run_with_history(history)
        .await
        .unwrap();

    assert_eq!(report.cycles, 19);
    assert_eq!(report.jumps, 2);
    assert_eq!(report.sweeps, 0);
    assert_eq!(report.failed_trades, 0);

    assert_eq!(report.trade_log.len(), 2);
    let first = &report.trade_log[0];
    assert_eq!(first.from_symbol, "XLM");
    assert_eq!(first.to_symbol, "DOGE");
    assert_eq!(first.state, TradeState::Complete);
    let second = &report.trade_log[1];
    assert_eq!(second.from_symbol, "DOGE");
    assert_eq!(second.to_symbol, "XLM");
    assert_eq!(second.state, TradeState::Complete);

    assert_eq!(report.final_symbol.as_deref(), Some("XLM"));
    // Four legs of fees came out across the two conversions.
    assert!(report.end_value < report.start_value);
    assert_eq!(report.value_history.len(), 20);
}

#[tokio::test]
async fn negative_reserve_freezes_the_bridge() {
    let settings = margin_settings(&["XLM", "DOGE"], Some("XLM"));
    let (mut engine, venue) = make_engine(
        seeded_history(),
        &[("XLM", 0.01), ("USDT", -1.0)],
        settings,
    );
    engine.initialize().await.unwrap();

    for _ in 0..3 {
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.jumps, 0);
    }

    assert_eq!(venue.balances()["USDT"], -1.0);
    assert!(engine.store().trade_history().is_empty());
    assert_eq!(engine.current_symbol(), Some("XLM"));
}

#[tokio::test]
async fn unpriced_asset_never_trades() {
    let settings = margin_settings(&["XLM", "DOGE", "BAD"], Some("BAD"));
    let (mut engine, _venue) = make_engine(
        seeded_history(),
        &[("BAD", 103.0), ("USDT", 0.0)],
        settings,
    );
    engine.initialize().await.unwrap();

    for _ in 0..2 {
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.assets_scouted, 0);
        assert_eq!(report.jumps, 0);
    }

    assert_eq!(engine.current_symbol(), Some("BAD"));
    assert!(engine.store().trade_history().is_empty());

    let registry = engine.registry();
    let bad = registry.by_symbol("BAD").unwrap();
    let xlm = registry.by_symbol("XLM").unwrap();
    let doge = registry.by_symbol("DOGE").unwrap();
    let matrix = engine.matrix();
    // Pairs touching the unpriced asset keep no baseline, priced
    // pairs were baselined at startup.
    assert!(matrix.get(bad, xlm).unwrap().is_none());
    assert!(matrix.get(xlm, bad).unwrap().is_none());
    let baseline = matrix.get(xlm, doge).unwrap().unwrap();
    assert!((baseline - 0.30 / 0.05).abs() < 1e-10);
}

#[tokio::test]
async fn scouting_resumes_when_history_begins() {
    let mut history = MemoryPriceHistory::new();
    // First samples arrive twenty minutes after the engine starts.
    history.insert("XLMUSDT", start_time() + Duration::minutes(20), 0.30);
    history.insert("DOGEUSDT", start_time() + Duration::minutes(20), 0.05);

    let settings = margin_settings(&["XLM", "DOGE"], Some("XLM"));
    let (mut engine, venue) = make_engine(history, &[("XLM", 100.0), ("USDT", 0.0)], settings);
    engine.initialize().await.unwrap();

    let before = engine.run_cycle().await.unwrap();
    assert_eq!(before.assets_scouted, 0);
    assert_eq!(before.portfolio_value, None);
    assert_eq!(engine.current_symbol(), Some("XLM"));

    venue.advance_clock(20).unwrap();
    let after = engine.run_cycle().await.unwrap();
    assert_eq!(after.assets_scouted, 1);
    assert_eq!(after.pairs_evaluated, 1);
    assert!((after.portfolio_value.unwrap() - 30.0).abs() < 1e-10);
    assert!(engine.store().trade_history().is_empty());
}

#[tokio::test]
async fn static_prices_never_rotate() {
    let settings = margin_settings(&["XLM", "DOGE", "ADA", "BTT", "EOS"], Some("XLM"));
    let (mut engine, venue) = make_engine(
        seeded_history(),
        &[("XLM", 100.0), ("USDT", 0.0)],
        settings,
    );
    engine.initialize().await.unwrap();

    for _ in 0..30 {
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.jumps, 0);
        venue.advance_clock(1).unwrap();
    }

    assert!(engine.store().trade_history().is_empty());
    assert_eq!(engine.current_symbol(), Some("XLM"));
    assert_eq!(venue.balances()["XLM"], 100.0);
}

#[tokio::test]
async fn state_survives_an_engine_restart() {
    let path = std::env::temp_dir()
        .join(format!("hopper-sim-{}.json", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();

    let balances: HashMap<String, f64> =
        HashMap::from([("XLM".to_string(), 100.0), ("USDT".to_string(), 0.0)]);
    let venue = Arc::new(ReplayPriceSource::new(
        Arc::new(seeded_history()),
        "USDT",
        balances,
        start_time(),
    ));

    // First run: configured to start from XLM, persists to disk.
    {
        let mut registry = AssetRegistry::new();
        let mut store = Store::open(Some(&path)).unwrap();
        let pairs = store.set_assets(&mut registry, &["XLM".to_string(), "DOGE".to_string()]);
        let matrix = RatioMatrix::build(&registry, &pairs).unwrap();
        let mut engine = ScoutEngine::new(
            margin_settings(&["XLM", "DOGE"], Some("XLM")),
            registry,
            matrix,
            venue.clone(),
            store,
            Arc::new(NullNotifier),
        );
        engine.initialize().await.unwrap();
        engine.run_cycle().await.unwrap();
        engine.save_state().unwrap();
    }

    // Second run: no configured starting asset, everything comes back
    // from the state file.
    let mut registry = AssetRegistry::new();
    let mut store = Store::open(Some(&path)).unwrap();
    assert_eq!(store.current_symbol(), Some("XLM"));

    let pairs = store.set_assets(&mut registry, &["XLM".to_string(), "DOGE".to_string()]);
    let matrix = RatioMatrix::build(&registry, &pairs).unwrap();
    let xlm = registry.by_symbol("XLM").unwrap();
    let doge = registry.by_symbol("DOGE").unwrap();
    let restored = matrix.get(xlm, doge).unwrap().unwrap();
    assert!((restored - 0.30 / 0.05).abs() < 1e-10);

    let mut engine = ScoutEngine::new(
        margin_settings(&["XLM", "DOGE"], None),
        registry,
        matrix,
        venue,
        store,
        Arc::new(NullNotifier),
    );
    engine.initialize().await.unwrap();
    assert_eq!(engine.current_symbol(), Some("XLM"));

    delete_state(Some(&path)).unwrap();
}
