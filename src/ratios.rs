//! Baseline ratio matrix with dirty-cell tracking.
//!
//! An N×N cache of the last accepted exchange ratio for every ordered
//! asset pair, indexed by registry indices, with a parallel array of
//! persistent pair identifiers. Writes mark cells dirty; a persistence
//! drainer captures the dirty set with [`RatioMatrix::dirty_cells`] and
//! acknowledges it with [`RatioMatrix::commit`].
//!
//! The capture/commit handshake is monotonic: `commit` clears only cells
//! captured by the preceding `dirty_cells` call. A cell written after the
//! capture point stays dirty and is picked up by the next capture, so no
//! write can be acknowledged without having been handed to the drainer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::registry::AssetRegistry;
use crate::types::HopperError;

// ---------------------------------------------------------------------------
// Pair snapshot
// ---------------------------------------------------------------------------

/// Persisted form of one ordered pair: identifier plus last known ratio.
///
/// Storage owns the canonical list; the matrix is built from it and the
/// drainer writes changed ratios back into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSnapshot {
    pub id: i64,
    pub from_symbol: String,
    pub to_symbol: String,
    pub ratio: Option<f64>,
}

// ---------------------------------------------------------------------------
// RatioMatrix
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RatioMatrix {
    size: usize,
    generation: u64,
    /// Row-major N×N ratios; NaN marks a cell never baselined.
    cells: Vec<f64>,
    pair_ids: Vec<Option<i64>>,
    /// Dirty coordinates with the write sequence that last touched them.
    dirty: HashMap<(usize, usize), u64>,
    write_seq: u64,
    captured_seq: u64,
}

impl RatioMatrix {
    /// Build a matrix sized to the registry's current generation from a
    /// pair snapshot.
    ///
    /// Fails with `InconsistentAsset` when a snapshot entry references a
    /// symbol the registry does not hold; callers are expected to rebuild
    /// the snapshot (see storage asset reconciliation) rather than skip
    /// entries.
    pub fn build(
        registry: &AssetRegistry,
        pairs: &[PairSnapshot],
    ) -> Result<Self, HopperError> {
        let size = registry.len();
        let mut cells = vec![f64::NAN; size * size];
        let mut pair_ids = vec![None; size * size];

        for pair in pairs {
            let from = registry.by_symbol(&pair.from_symbol).map_err(|_| {
                HopperError::InconsistentAsset {
                    symbol: pair.from_symbol.clone(),
                }
            })?;
            let to = registry.by_symbol(&pair.to_symbol).map_err(|_| {
                HopperError::InconsistentAsset {
                    symbol: pair.to_symbol.clone(),
                }
            })?;
            let offset = from * size + to;
            pair_ids[offset] = Some(pair.id);
            if let Some(ratio) = pair.ratio {
                cells[offset] = ratio;
            }
        }

        Ok(Self {
            size,
            generation: registry.generation(),
            cells,
            pair_ids,
            dirty: HashMap::new(),
            write_seq: 0,
            captured_seq: 0,
        })
    }

    fn offset(&self, from: usize, to: usize) -> Result<usize, HopperError> {
        if from >= self.size || to >= self.size {
            return Err(HopperError::OutOfRange {
                from,
                to,
                size: self.size,
            });
        }
        Ok(from * self.size + to)
    }

    /// Baseline ratio for (from, to); `None` when never set.
    pub fn get(&self, from: usize, to: usize) -> Result<Option<f64>, HopperError> {
        let cell = self.cells[self.offset(from, to)?];
        Ok(if cell.is_nan() { None } else { Some(cell) })
    }

    /// Write a baseline ratio and mark the cell dirty.
    pub fn set(&mut self, from: usize, to: usize, ratio: f64) -> Result<(), HopperError> {
        let offset = self.offset(from, to)?;
        self.cells[offset] = ratio;
        self.write_seq += 1;
        self.dirty.insert((from, to), self.write_seq);
        Ok(())
    }

    /// Persistent identifier of the pair at (from, to), when one exists.
    pub fn pair_id(&self, from: usize, to: usize) -> Result<Option<i64>, HopperError> {
        Ok(self.pair_ids[self.offset(from, to)?])
    }

    /// Dense row of ratios out of `from`; NaN cells are unset.
    pub fn row_for(&self, from: usize) -> Result<&[f64], HopperError> {
        if from >= self.size {
            return Err(HopperError::OutOfRange {
                from,
                to: 0,
                size: self.size,
            });
        }
        Ok(&self.cells[from * self.size..(from + 1) * self.size])
    }

    /// Snapshot the dirty coordinates without clearing them, and record
    /// the capture point the next [`commit`](Self::commit) acknowledges.
    ///
    /// Returned coordinates are sorted for deterministic persistence.
    pub fn dirty_cells(&mut self) -> Vec<(usize, usize)> {
        self.captured_seq = self.write_seq;
        let mut cells: Vec<(usize, usize)> = self.dirty.keys().copied().collect();
        cells.sort_unstable();
        cells
    }

    /// Acknowledge the last capture: clears exactly the cells whose latest
    /// write was at or before the capture point. Later writes stay dirty.
    pub fn commit(&mut self) {
        let captured = self.captured_seq;
        self.dirty.retain(|_, seq| *seq > captured);
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Generation of the registry this matrix was built against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the registry has moved on since this matrix was built.
    pub fn is_stale(&self, registry: &AssetRegistry) -> bool {
        self.generation != registry.generation()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
