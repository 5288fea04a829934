//! Asset registry: symbol to dense-index bijection.
//!
//! Scout loops and the ratio matrix run on integer indices; symbols appear
//! only at the boundaries (config parsing, persistence, logging). The
//! registry owns the mapping and tags it with a generation counter so that
//! structures built against an older asset set are detectably stale.
//!
//! The registry is a plain owned value, wired through constructors. There
//! is deliberately no global instance.

use std::collections::HashMap;

use crate::types::HopperError;

// ---------------------------------------------------------------------------
// AssetRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AssetRegistry {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
    generation: u64,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            index: HashMap::new(),
            generation: 0,
        }
    }

    /// Register a symbol and return its dense index.
    ///
    /// Idempotent within a generation: re-creating an existing symbol
    /// returns the index it already holds.
    pub fn create(&mut self, symbol: &str) -> usize {
        if let Some(&idx) = self.index.get(symbol) {
            return idx;
        }
        let idx = self.symbols.len();
        self.symbols.push(symbol.to_string());
        self.index.insert(symbol.to_string(), idx);
        idx
    }

    /// Drop every symbol and start a new generation.
    ///
    /// Matrices built against the previous generation report stale via
    /// [`generation`](Self::generation) mismatch and must be rebuilt.
    pub fn reset(&mut self) -> u64 {
        self.symbols.clear();
        self.index.clear();
        self.generation += 1;
        self.generation
    }

    pub fn by_symbol(&self, symbol: &str) -> Result<usize, HopperError> {
        self.index
            .get(symbol)
            .copied()
            .ok_or_else(|| HopperError::AssetNotFound(symbol.to_string()))
    }

    pub fn by_index(&self, index: usize) -> Result<&str, HopperError> {
        self.symbols
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| HopperError::AssetNotFound(format!("#{index}")))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Registered symbols in index order.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Iterate all valid indices, `0..len`.
    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.symbols.len()
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_dense_indices() {
        let mut registry = AssetRegistry::new();
        assert_eq!(registry.create("XLM"), 0);
        assert_eq!(registry.create("ADA"), 1);
        assert_eq!(registry.create("DOGE"), 2);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.symbols(), &["XLM", "ADA", "DOGE"]);
    }

    #[test]
    fn test_create_is_idempotent() {
        let mut registry = AssetRegistry::new();
        let first = registry.create("XLM");
        registry.create("ADA");
        let again = registry.create("XLM");
        assert_eq!(first, again);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_lookup_round_trip() {
        let mut registry = AssetRegistry::new();
        registry.create("XLM");
        registry.create("ADA");

        assert_eq!(registry.by_symbol("ADA").unwrap(), 1);
        assert_eq!(registry.by_index(0).unwrap(), "XLM");
    }

    #[test]
    fn test_unknown_symbol_and_index_fail() {
        let mut registry = AssetRegistry::new();
        registry.create("XLM");

        assert!(matches!(
            registry.by_symbol("XYZ"),
            Err(HopperError::AssetNotFound(_))
        ));
        assert!(matches!(
            registry.by_index(7),
            Err(HopperError::AssetNotFound(_))
        ));
    }

    #[test]
    fn test_reset_clears_and_bumps_generation() {
        let mut registry = AssetRegistry::new();
        registry.create("XLM");
        registry.create("ADA");
        let before = registry.generation();

        let after = registry.reset();
        assert_eq!(after, before + 1);
        assert!(registry.is_empty());
        assert!(registry.by_symbol("XLM").is_err());

        // Fresh generation assigns indices from zero again.
        assert_eq!(registry.create("DOGE"), 0);
    }

    #[test]
    fn test_indices_covers_all_assets() {
        let mut registry = AssetRegistry::new();
        registry.create("XLM");
        registry.create("ADA");
        registry.create("DOGE");
        let collected: Vec<usize> = registry.indices().collect();
        assert_eq!(collected, vec![0, 1, 2]);
    }
}
