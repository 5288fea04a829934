//! Historical price store backing the replay venue.
//!
//! Samples are keyed (market, timestamp); lookups select the most recent
//! sample at or before the requested instant. Series load from CSV files
//! with a `timestamp,market,price` header or are built programmatically.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

/// Timestamp layout used in price CSV files.
const CSV_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read access to recorded market prices.
pub trait PriceHistory: Send + Sync {
    /// Most recent sample at or before `at`; `None` when the market has
    /// no sample up to that instant.
    fn price_at(&self, market: &str, at: DateTime<Utc>) -> Option<f64>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryPriceHistory {
    series: BTreeMap<String, BTreeMap<DateTime<Utc>, f64>>,
}

impl MemoryPriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, market: &str, at: DateTime<Utc>, price: f64) {
        self.series
            .entry(market.to_string())
            .or_default()
            .insert(at, price);
    }

    /// Load a whole store from one CSV file.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read price file: {}", path.display()))?;

        let mut store = Self::new();
        let mut reader = csv::Reader::from_reader(content.as_bytes());

        for (line, record) in reader.records().enumerate() {
            let record = record
                .with_context(|| format!("CSV parse error in {}", path.display()))?;

            let raw_time = record
                .get(0)
                .with_context(|| format!("Missing timestamp column at row {line}"))?;
            let at = NaiveDateTime::parse_from_str(raw_time, CSV_TIME_FORMAT)
                .with_context(|| format!("Invalid timestamp {raw_time:?} at row {line}"))?
                .and_utc();

            let market = record
                .get(1)
                .with_context(|| format!("Missing market column at row {line}"))?;

            let price: f64 = record
                .get(2)
                .with_context(|| format!("Missing price column at row {line}"))?
                .parse()
                .with_context(|| format!("Invalid price at row {line}"))?;

            store.insert(market, at, price);
        }

        debug!(
            markets = store.series.len(),
            samples = store.sample_count(),
            file = %path.display(),
            "Price history loaded"
        );
        Ok(store)
    }

    /// Total number of samples across all markets.
    pub fn sample_count(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PriceHistory for MemoryPriceHistory {
    fn price_at(&self, market: &str, at: DateTime<Utc>) -> Option<f64> {
        self.series
            .get(market)?
            .range(..=at)
            .next_back()
            .map(|(_, &price)| price)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
