//! HOPPER, an automated multi-asset rotation trading engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! then either replays recorded price history or runs the live
//! scout→jump loop against the exchange with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use hopper::backtest::ReplayRunner;
use hopper::config::AppConfig;
use hopper::engine::ScoutEngine;
use hopper::exchange::live::BinanceClient;
use hopper::exchange::PriceSource;
use hopper::notify::{log_notifications, ChannelNotifier, Notifier, NullNotifier};
use hopper::ratios::RatioMatrix;
use hopper::registry::AssetRegistry;
use hopper::storage::Store;
use hopper::types::CycleReport;

const BANNER: &str = r#"
 _   _  ___  ____  ____  _____ ____
| | | |/ _ \|  _ \|  _ \| ____|  _ \
| |_| | | | | |_) | |_) |  _| | |_) |
|  _  | |_| |  __/|  __/| |___|  _ <
|_| |_|\___/|_|   |_|   |_____|_| \_\

  Multi-Asset Rotation Trading Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        mode = %cfg.mode,
        reserve = %cfg.engine.reserve_symbol,
        assets = cfg.engine.assets.len(),
        scout_interval_secs = cfg.engine.scout_interval_secs,
        "HOPPER starting up"
    );

    match cfg.mode.as_str() {
        "replay" => run_replay(&cfg).await,
        "live" => run_live(&cfg).await,
        other => anyhow::bail!("Unknown mode {other:?}, expected \"live\" or \"replay\""),
    }
}

/// Replay the engine over the configured history window and print the
/// resulting report.
async fn run_replay(cfg: &AppConfig) -> Result<()> {
    let runner = ReplayRunner::new(cfg.engine.clone(), cfg.replay.clone());
    let report = runner.run().await?;
    println!("{report}");
    Ok(())
}

/// Run the live scout loop until Ctrl+C.
async fn run_live(cfg: &AppConfig) -> Result<()> {
    let venue: Arc<dyn PriceSource> = Arc::new(BinanceClient::new(
        cfg.exchange.base_url.clone(),
        cfg.exchange.api_key()?,
        cfg.exchange.api_secret()?,
    )?);

    let notifier: Arc<dyn Notifier> = if cfg.alerts.enabled {
        let (notifier, receiver) = ChannelNotifier::new(true);
        tokio::spawn(log_notifications(receiver));
        Arc::new(notifier)
    } else {
        Arc::new(NullNotifier)
    };

    // -- Restore or create state -----------------------------------------

    let mut store = Store::open(cfg.storage.state_file.as_deref())?;
    let mut registry = AssetRegistry::new();
    let pairs = store.set_assets(&mut registry, &cfg.engine.assets);
    let matrix = RatioMatrix::build(&registry, &pairs)?;

    let mut engine = ScoutEngine::new(
        cfg.engine.clone(),
        registry,
        matrix,
        venue,
        store,
        notifier,
    );
    engine.initialize().await?;

    // -- Main loop -------------------------------------------------------

    let scout_interval = Duration::from_secs(cfg.engine.scout_interval_secs);
    let mut interval = tokio::time::interval(scout_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.scout_interval_secs,
        "Entering scout loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.run_cycle().await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) => {
                        error!(error = %e, "Cycle failed, continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final state
    engine.save_state()?;
    info!(
        holding = engine.current_symbol().unwrap_or("none"),
        trades = engine.store().trade_history().len(),
        "HOPPER shut down cleanly."
    );

    Ok(())
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    let value = report
        .portfolio_value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string());
    info!(
        cycle = report.cycle_number,
        scouted = report.assets_scouted,
        pairs = report.pairs_evaluated,
        jumps = report.jumps,
        flushed = report.cells_flushed,
        holding = report.current_symbol.as_deref().unwrap_or("none"),
        value = value,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hopper=info"));

    let json_logging = std::env::var("HOPPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
