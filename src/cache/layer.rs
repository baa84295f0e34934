//! Cache layer between the orchestrator and a storage backend.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::storage::NoopStorage;
use super::traits::{CacheEntry, CacheStore};
use crate::analysis::AnalysisResult;

/// Translates between analyses and stored entries and carries the on/off switch.
#[derive(Clone)]
pub struct CacheLayer {
  store: Arc<dyn CacheStore>,
  enabled: bool,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(store: impl CacheStore + 'static) -> Self {
    Self::shared(Arc::new(store))
  }

  /// Create a cache layer over a store that is also held elsewhere.
  pub fn shared(store: Arc<dyn CacheStore>) -> Self {
    Self {
      store,
      enabled: true,
    }
  }

  /// A layer that never reads or writes.
  pub fn disabled() -> Self {
    Self {
      store: Arc::new(NoopStorage),
      enabled: false,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Look up a previous analysis for this key.
  pub fn lookup(&self, key: &str) -> Result<Option<AnalysisResult>> {
    if !self.enabled {
      return Ok(None);
    }
    let hit = self.store.get(key)?;
    debug!(key, hit = hit.is_some(), "cache lookup");
    Ok(hit.map(CacheEntry::into_result))
  }

  /// Record a fresh analysis under this key.
  pub fn record(&self, key: &str, result: &AnalysisResult) -> Result<()> {
    if !self.enabled {
      return Ok(());
    }
    self.store.put(key, &CacheEntry::record(result))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn test_record_then_lookup() {
    let store = Arc::new(MemoryStorage::new());
    let layer = CacheLayer::shared(store.clone());
    let result = AnalysisResult::new("why", "how");

    assert!(layer.lookup("k1").unwrap().is_none());
    layer.record("k1", &result).unwrap();

    assert_eq!(layer.lookup("k1").unwrap(), Some(result));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn test_disabled_layer_is_inert() {
    let layer = CacheLayer::disabled();
    layer.record("k1", &AnalysisResult::new("a", "b")).unwrap();

    assert!(!layer.is_enabled());
    assert!(layer.lookup("k1").unwrap().is_none());
  }
}
