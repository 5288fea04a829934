//! Persistence layer.
//!
//! Saves and loads engine state to/from a JSON file: the tracked asset
//! list, pair baselines with their persistent ids, the current-asset
//! pointer, and the trade/scout/value histories. The `Store` wraps the
//! snapshot with the reconciliation and flush logic the engine uses
//! each cycle.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::ratios::{PairSnapshot, RatioMatrix};
use crate::registry::AssetRegistry;
use crate::types::{AssetValue, ScoutRecord, TradeRecord};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "hopper_state.json";

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One tracked asset row. Disabled assets keep their history but drop
/// out of the registry and the enabled-pairs view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetEntry {
    pub symbol: String,
    pub enabled: bool,
}

/// Everything the engine persists between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub assets: Vec<AssetEntry>,
    pub pairs: Vec<PairSnapshot>,
    pub current_symbol: Option<String>,
    pub next_pair_id: i64,
    pub trade_history: Vec<TradeRecord>,
    pub scout_history: Vec<ScoutRecord>,
    pub value_history: Vec<AssetValue>,
    pub saved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// File operations
// ---------------------------------------------------------------------------

/// Save an engine snapshot to a JSON file.
pub fn save_state(snapshot: &EngineSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise engine state")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write state to {path}"))?;

    debug!(path, pairs = snapshot.pairs.len(), "State saved");
    Ok(())
}

/// Load an engine snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<EngineSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let snapshot: EngineSnapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        assets = snapshot.assets.len(),
        pairs = snapshot.pairs.len(),
        trades = snapshot.trade_history.len(),
        current = snapshot.current_symbol.as_deref().unwrap_or("-"),
        "State loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Working state the engine reads and mutates each cycle, persisted to
/// a single JSON file.
pub struct Store {
    snapshot: EngineSnapshot,
    path: Option<String>,
    persist: bool,
}

impl Store {
    /// Open the store, loading existing state from `path` when present.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let snapshot = load_state(path)?.unwrap_or_default();
        Ok(Self {
            snapshot,
            path: path.map(str::to_string),
            persist: true,
        })
    }

    /// An in-memory store that never touches disk. Used by backtests.
    pub fn ephemeral() -> Self {
        Self {
            snapshot: EngineSnapshot::default(),
            path: None,
            persist: false,
        }
    }

    pub fn snapshot(&self) -> &EngineSnapshot {
        &self.snapshot
    }

    /// Write the snapshot out. A no-op for ephemeral stores.
    pub fn save(&mut self) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        self.snapshot.saved_at = Some(Utc::now());
        save_state(&self.snapshot, self.path.as_deref())
    }

    // -- Asset reconciliation --------------------------------------------

    /// Reconcile the configured asset list against the persisted one:
    /// disable assets no longer listed, enable listed ones, rebuild the
    /// registry over the enabled set in sorted order, and make sure a
    /// pair row exists for every ordered combination. Pair ids assigned
    /// here are stable across restarts.
    ///
    /// Returns the enabled-pairs snapshot a `RatioMatrix` builds from.
    pub fn set_assets(
        &mut self,
        registry: &mut AssetRegistry,
        symbols: &[String],
    ) -> Vec<PairSnapshot> {
        for entry in &mut self.snapshot.assets {
            entry.enabled = false;
        }
        for symbol in symbols {
            match self
                .snapshot
                .assets
                .iter_mut()
                .find(|e| &e.symbol == symbol)
            {
                Some(entry) => entry.enabled = true,
                None => self.snapshot.assets.push(AssetEntry {
                    symbol: symbol.clone(),
                    enabled: true,
                }),
            }
        }

        let mut enabled: Vec<String> = self
            .snapshot
            .assets
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.symbol.clone())
            .collect();
        enabled.sort();

        registry.reset();
        for symbol in &enabled {
            registry.create(symbol);
        }

        for from in &enabled {
            for to in &enabled {
                if from == to {
                    continue;
                }
                let exists = self
                    .snapshot
                    .pairs
                    .iter()
                    .any(|p| &p.from_symbol == from && &p.to_symbol == to);
                if !exists {
                    self.snapshot.next_pair_id += 1;
                    self.snapshot.pairs.push(PairSnapshot {
                        id: self.snapshot.next_pair_id,
                        from_symbol: from.clone(),
                        to_symbol: to.clone(),
                        ratio: None,
                    });
                }
            }
        }

        info!(
            assets = enabled.len(),
            generation = registry.generation(),
            "Asset list reconciled"
        );
        self.enabled_pairs(registry)
    }

    /// Pair rows whose both endpoints are in the registry's current
    /// generation.
    pub fn enabled_pairs(&self, registry: &AssetRegistry) -> Vec<PairSnapshot> {
        self.snapshot
            .pairs
            .iter()
            .filter(|p| registry.contains(&p.from_symbol) && registry.contains(&p.to_symbol))
            .cloned()
            .collect()
    }

    // -- Current asset ----------------------------------------------------

    pub fn current_symbol(&self) -> Option<&str> {
        self.snapshot.current_symbol.as_deref()
    }

    pub fn set_current_symbol(&mut self, symbol: &str) {
        self.snapshot.current_symbol = Some(symbol.to_string());
    }

    // -- Ratio flushing ---------------------------------------------------

    /// Flush dirty matrix cells into the pair rows and persist.
    ///
    /// Captures the dirty set, copies each captured cell's ratio into
    /// its pair row, saves, then commits the capture. A cell written
    /// while the save is in flight stays dirty for the next flush.
    pub fn flush_ratios(
        &mut self,
        registry: &AssetRegistry,
        matrix: &mut RatioMatrix,
    ) -> Result<usize> {
        let captured = matrix.dirty_cells();
        if captured.is_empty() {
            return Ok(0);
        }

        for &(from, to) in &captured {
            let ratio = matrix.get(from, to)?;
            let from_symbol = registry.by_index(from)?;
            let to_symbol = registry.by_index(to)?;
            if let Some(pair) = self
                .snapshot
                .pairs
                .iter_mut()
                .find(|p| p.from_symbol == from_symbol && p.to_symbol == to_symbol)
            {
                pair.ratio = ratio;
            }
        }

        self.save()?;
        matrix.commit();
        debug!(cells = captured.len(), "Ratio cells flushed");
        Ok(captured.len())
    }

    // -- Histories --------------------------------------------------------

    /// Insert or update a trade record by id.
    pub fn record_trade(&mut self, record: &TradeRecord) {
        match self
            .snapshot
            .trade_history
            .iter_mut()
            .find(|r| r.id == record.id)
        {
            Some(existing) => *existing = record.clone(),
            None => self.snapshot.trade_history.push(record.clone()),
        }
    }

    pub fn trade_history(&self) -> &[TradeRecord] {
        &self.snapshot.trade_history
    }

    pub fn append_scout_records(&mut self, records: Vec<ScoutRecord>) {
        self.snapshot.scout_history.extend(records);
    }

    /// Drop scout records older than `hours` before `now`. Returns the
    /// number removed.
    pub fn prune_scout_history(&mut self, hours: i64, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(hours);
        let before = self.snapshot.scout_history.len();
        self.snapshot
            .scout_history
            .retain(|r| r.recorded_at >= cutoff);
        before - self.snapshot.scout_history.len()
    }

    pub fn record_values(&mut self, values: Vec<AssetValue>) {
        self.snapshot.value_history.extend(values);
    }

    pub fn value_history(&self) -> &[AssetValue] {
        &self.snapshot.value_history
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
