//! Time-limited cache of previous analyses.
//!
//! This module provides a content-addressed cache that:
//! - Keys entries by a digest of the failure's identity
//! - Treats entries older than the TTL as absent and purges them on read
//! - Reports backend failures as errors so callers can degrade to a miss
//! - Supports file (JSON), SQLite, in-memory and no-op backends

mod layer;
mod sqlite;
mod storage;
mod traits;

use std::path::PathBuf;

pub use layer::CacheLayer;
pub use sqlite::SqliteStorage;
pub use storage::{FileStorage, MemoryStorage, NoopStorage, DEFAULT_CACHE_DIR};
pub use traits::{default_ttl, CacheEntry, CacheStore};

use crate::config::{CacheBackend, CacheConfig};

/// File name of the SQLite database inside the cache directory.
pub const SQLITE_FILE: &str = "cache.db";

/// Build the cache layer described by the configuration.
pub fn open(config: &CacheConfig) -> CacheLayer {
  if !config.enabled {
    return CacheLayer::disabled();
  }

  let ttl = config.ttl();
  match config.backend {
    CacheBackend::File => CacheLayer::new(FileStorage::new(config.dir.clone()).with_ttl(ttl)),
    CacheBackend::Sqlite => CacheLayer::new(SqliteStorage::new(sqlite_path(config)).with_ttl(ttl)),
    CacheBackend::Memory => CacheLayer::new(MemoryStorage::new().with_ttl(ttl)),
  }
}

fn sqlite_path(config: &CacheConfig) -> PathBuf {
  config.dir.join(SQLITE_FILE)
}

/// Remove every entry from the configured persistent backend.
pub fn clear(config: &CacheConfig) -> color_eyre::Result<usize> {
  match config.backend {
    CacheBackend::File => FileStorage::new(config.dir.clone()).clear(),
    CacheBackend::Sqlite => SqliteStorage::new(sqlite_path(config)).clear(),
    CacheBackend::Memory => Ok(0),
  }
}

/// Remove expired entries from the configured persistent backend.
pub fn prune(config: &CacheConfig) -> color_eyre::Result<usize> {
  let ttl = config.ttl();
  match config.backend {
    CacheBackend::File => FileStorage::new(config.dir.clone())
      .with_ttl(ttl)
      .purge_expired(),
    CacheBackend::Sqlite => SqliteStorage::new(sqlite_path(config))
      .with_ttl(ttl)
      .purge_expired(),
    CacheBackend::Memory => Ok(0),
  }
}
