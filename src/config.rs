//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults so a partial file works. Secrets (API
//! credentials) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

/// Timestamp format accepted in replay date fields, matching the
/// historical price CSV.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    /// "live" trades against the exchange; "replay" runs a backtest.
    pub mode: String,
    pub engine: EngineSettings,
    pub exchange: ExchangeSettings,
    pub replay: ReplaySettings,
    pub storage: StorageSettings,
    pub alerts: AlertsSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: "replay".to_string(),
            engine: EngineSettings::default(),
            exchange: ExchangeSettings::default(),
            replay: ReplaySettings::default(),
            storage: StorageSettings::default(),
            alerts: AlertsSettings::default(),
        }
    }
}

/// Rotation engine knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    /// Reserve (bridge) asset every conversion routes through.
    pub reserve_symbol: String,
    /// Tracked assets eligible for rotation.
    pub assets: Vec<String>,
    /// Starting asset; a random tracked asset when unset and no state
    /// file names one.
    pub current_asset: Option<String>,
    pub scout_interval_secs: u64,
    /// Selects the margin formula over the fee-multiplier formula.
    pub use_margin: bool,
    /// Required improvement over baseline, in percent, when `use_margin`.
    pub scout_margin_percent: f64,
    /// Fee weighting applied to the ratio when not using the margin.
    pub scout_multiplier: f64,
    /// Scout history retention window.
    pub history_hours: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reserve_symbol: "USDT".to_string(),
            assets: Vec::new(),
            current_asset: None,
            scout_interval_secs: 5,
            use_margin: false,
            scout_margin_percent: 0.8,
            scout_multiplier: 5.0,
            history_hours: 24,
        }
    }
}

/// Live exchange connection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Override for the exchange base URL (testnet, mirrors).
    pub base_url: Option<String>,
    pub api_key_env: String,
    pub api_secret_env: String,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: "HOPPER_API_KEY".to_string(),
            api_secret_env: "HOPPER_API_SECRET".to_string(),
        }
    }
}

impl ExchangeSettings {
    pub fn api_key(&self) -> Result<String> {
        AppConfig::resolve_env(&self.api_key_env)
    }

    pub fn api_secret(&self) -> Result<SecretString> {
        Ok(SecretString::new(AppConfig::resolve_env(
            &self.api_secret_env,
        )?))
    }
}

/// Backtest window and portfolio seed.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplaySettings {
    pub start_date: String,
    pub end_date: String,
    pub step_minutes: i64,
    /// CSV of historical prices: timestamp, market, price.
    pub history_file: String,
    pub starting_balances: HashMap<String, f64>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            start_date: "2021-06-01 00:00:00".to_string(),
            end_date: "2021-06-02 00:00:00".to_string(),
            step_minutes: 1,
            history_file: "prices.csv".to_string(),
            starting_balances: HashMap::new(),
        }
    }
}

impl ReplaySettings {
    pub fn start(&self) -> Result<DateTime<Utc>> {
        parse_date(&self.start_date)
    }

    pub fn end(&self) -> Result<DateTime<Utc>> {
        parse_date(&self.end_date)
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
        .with_context(|| format!("Invalid date {raw:?}, expected {DATE_FORMAT}"))?;
    Ok(naive.and_utc())
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// State file path; the built-in default next to the binary when unset.
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AlertsSettings {
    pub enabled: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.mode, "replay");
        assert_eq!(config.engine.reserve_symbol, "USDT");
        assert_eq!(config.engine.scout_interval_secs, 5);
        assert!(!config.engine.use_margin);
        assert_eq!(config.engine.scout_multiplier, 5.0);
        assert!(!config.alerts.enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            mode = "live"

            [engine]
            reserve_symbol = "BUSD"
            assets = ["XLM", "DOGE", "ADA"]
            current_asset = "XLM"
            use_margin = true
            scout_margin_percent = 0.5

            [replay]
            start_date = "2021-06-01 00:00:00"
            step_minutes = 10

            [replay.starting_balances]
            USDT = 1000.0
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, "live");
        assert_eq!(config.engine.reserve_symbol, "BUSD");
        assert_eq!(config.engine.assets.len(), 3);
        assert_eq!(config.engine.current_asset.as_deref(), Some("XLM"));
        assert!(config.engine.use_margin);
        assert_eq!(config.engine.scout_margin_percent, 0.5);
        // Untouched sections keep their defaults.
        assert_eq!(config.engine.scout_interval_secs, 5);
        assert_eq!(config.exchange.api_key_env, "HOPPER_API_KEY");
        assert_eq!(config.replay.step_minutes, 10);
        assert_eq!(config.replay.starting_balances["USDT"], 1000.0);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.mode, "replay");
        assert!(config.engine.assets.is_empty());
    }

    #[test]
    fn test_replay_date_parsing() {
        let replay = ReplaySettings::default();
        let start = replay.start().unwrap();
        assert_eq!(start.to_rfc3339(), "2021-06-01T00:00:00+00:00");
        assert!(replay.end().unwrap() > start);
    }

    #[test]
    fn test_invalid_date_rejected() {
        let replay = ReplaySettings {
            start_date: "June 1st 2021".to_string(),
            ..ReplaySettings::default()
        };
        assert!(replay.start().is_err());
    }

    #[test]
    fn test_resolve_env() {
        std::env::set_var("HOPPER_TEST_RESOLVE_VAR", "value-123");
        assert_eq!(
            AppConfig::resolve_env("HOPPER_TEST_RESOLVE_VAR").unwrap(),
            "value-123"
        );
        std::env::remove_var("HOPPER_TEST_RESOLVE_VAR");
        assert!(AppConfig::resolve_env("HOPPER_TEST_RESOLVE_VAR").is_err());
    }
}
