//! The tracked symbol set and the state every unit shares: turnover ranks,
//! user preferences, and the reference asset's latest segmentation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use signals_core::candle::Candle;
use signals_core::impulse::Segmentation;

use crate::error::EngineError;
use crate::preferences::PreferencesStore;

/// Coarse history of the reference asset and the segments cut from it.
/// Replaced as a whole whenever the reference gets a new coarse bar.
#[derive(Debug, Default)]
pub struct ReferenceSnapshot {
    pub candles: Vec<Candle>,
    pub segmentation: Segmentation,
}

#[derive(Debug)]
pub struct Universe {
    reference: String,
    symbols: RwLock<Vec<String>>,
    ranks: RwLock<HashMap<String, usize>>,
    preferences: RwLock<PreferencesStore>,
    snapshot: RwLock<Arc<ReferenceSnapshot>>,
}

impl Universe {
    pub fn new(reference: impl Into<String>, preferences: PreferencesStore) -> Self {
        Self {
            reference: reference.into(),
            symbols: RwLock::new(Vec::new()),
            ranks: RwLock::new(HashMap::new()),
            preferences: RwLock::new(preferences),
            snapshot: RwLock::new(Arc::new(ReferenceSnapshot::default())),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_reference(&self, symbol: &str) -> bool {
        symbol.eq_ignore_ascii_case(&self.reference)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    /// Replace the symbol set. The reference asset is always kept, first.
    pub fn set_symbols(&self, symbols: Vec<String>) {
        let mut list: Vec<String> = symbols
            .into_iter()
            .filter(|s| !self.is_reference(s))
            .collect();
        list.sort();
        list.dedup();
        list.insert(0, self.reference.clone());
        *self.symbols.write() = list;
    }

    /// Drop symbols for good. The reference cannot be removed.
    pub fn remove(&self, symbols: &[String]) {
        self.symbols
            .write()
            .retain(|s| self.is_reference(s) || !symbols.contains(s));
    }

    /// Store 1-based turnover ranks, `ordered` best first.
    pub fn set_ranks(&self, ordered: &[String]) {
        *self.ranks.write() = ordered
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i + 1))
            .collect();
    }

    pub fn rank(&self, symbol: &str) -> Option<usize> {
        self.ranks.read().get(symbol).copied()
    }

    pub fn ranks(&self) -> HashMap<String, usize> {
        self.ranks.read().clone()
    }

    pub fn is_disabled(&self, symbol: &str) -> bool {
        self.preferences.read().is_disabled(symbol)
    }

    pub fn toggle_symbol(&self, user_id: i64, symbol: &str) -> bool {
        self.preferences.write().toggle(user_id, symbol)
    }

    pub fn save_preferences(&self) -> Result<(), EngineError> {
        self.preferences.read().save()
    }

    pub fn reference_snapshot(&self) -> Arc<ReferenceSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn publish_reference(&self, snapshot: ReferenceSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    pub fn clear_reference(&self) {
        self.publish_reference(ReferenceSnapshot::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> (tempfile::TempDir, Universe) {
        let dir = tempfile::tempdir().unwrap();
        let prefs = PreferencesStore::load(dir.path(), &[1]).unwrap();
        (dir, Universe::new("BTCUSDT", prefs))
    }

    #[test]
    fn reference_is_pinned_first() {
        let (_dir, universe) = universe();
        universe.set_symbols(vec!["SOLUSDT".into(), "BTCUSDT".into(), "ETHUSDT".into()]);
        assert_eq!(universe.symbols(), ["BTCUSDT", "ETHUSDT", "SOLUSDT"]);

        universe.remove(&["BTCUSDT".to_string(), "SOLUSDT".to_string()]);
        assert_eq!(universe.symbols(), ["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn ranks_are_one_based() {
        let (_dir, universe) = universe();
        universe.set_ranks(&["ETHUSDT".to_string(), "BTCUSDT".to_string()]);
        assert_eq!(universe.rank("ETHUSDT"), Some(1));
        assert_eq!(universe.rank("BTCUSDT"), Some(2));
        assert_eq!(universe.rank("DOGEUSDT"), None);
    }

    #[test]
    fn snapshot_is_replaced_not_mutated() {
        let (_dir, universe) = universe();
        let before = universe.reference_snapshot();
        universe.publish_reference(ReferenceSnapshot {
            candles: vec![Candle::default()],
            segmentation: Segmentation::default(),
        });
        assert!(before.candles.is_empty());
        assert_eq!(universe.reference_snapshot().candles.len(), 1);
    }

    #[test]
    fn disabled_symbols_come_from_preferences() {
        let (_dir, universe) = universe();
        assert!(universe.toggle_symbol(1, "ETHUSDT"));
        assert!(universe.is_disabled("ETHUSDT"));
    }
}
