//! File, in-memory and no-op cache backends.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::traits::{default_ttl, CacheEntry, CacheStore};

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".stacksage_cache";

/// Reject keys that could escape the cache directory.
pub(super) fn validate_key(key: &str) -> Result<()> {
  if key.is_empty()
    || !key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
  {
    return Err(eyre!("Invalid cache key '{}'", key));
  }
  Ok(())
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStore for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &str, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }
}

/// One pretty-printed JSON file per key.
///
/// Every call opens and closes its own file handle; the directory is created
/// on first write.
#[derive(Debug, Clone)]
pub struct FileStorage {
  dir: PathBuf,
  ttl: Duration,
}

impl FileStorage {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      ttl: default_ttl(),
    }
  }

  /// Set how long entries stay valid.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.json", key))
  }

  /// Paths of every entry file currently in the cache directory.
  fn entry_files(&self) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(&self.dir) {
      Ok(read_dir) => read_dir,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => {
        return Err(eyre!(
          "Failed to list cache directory {}: {}",
          self.dir.display(),
          e
        ))
      }
    };

    Ok(
      read_dir
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect(),
    )
  }

  /// Delete every entry. Returns how many were removed.
  pub fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    for path in self.entry_files()? {
      fs::remove_file(&path)
        .map_err(|e| eyre!("Failed to remove cache entry {}: {}", path.display(), e))?;
      removed += 1;
    }
    Ok(removed)
  }

  /// Delete expired and unreadable entries. Returns how many were removed.
  pub fn purge_expired(&self) -> Result<usize> {
    let now = Utc::now();
    let mut removed = 0;
    for path in self.entry_files()? {
      let stale = match read_entry(&path) {
        Ok(entry) => entry.is_expired(now, self.ttl),
        Err(_) => true,
      };
      if stale {
        fs::remove_file(&path)
          .map_err(|e| eyre!("Failed to remove cache entry {}: {}", path.display(), e))?;
        removed += 1;
      }
    }
    Ok(removed)
  }
}

fn read_entry(path: &Path) -> Result<CacheEntry> {
  let contents = fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read cache entry {}: {}", path.display(), e))?;
  serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse cache entry {}: {}", path.display(), e))
}

impl CacheStore for FileStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    validate_key(key)?;
    let path = self.entry_path(key);
    if !path.exists() {
      return Ok(None);
    }

    let entry = read_entry(&path)?;
    if entry.is_expired(Utc::now(), self.ttl) {
      debug!(key, "cache entry expired, removing");
      if let Err(e) = fs::remove_file(&path) {
        debug!(key, error = %e, "failed to remove expired cache entry");
      }
      return Ok(None);
    }

    Ok(Some(entry))
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    validate_key(key)?;
    fs::create_dir_all(&self.dir).map_err(|e| {
      eyre!(
        "Failed to create cache directory {}: {}",
        self.dir.display(),
        e
      )
    })?;

    let path = self.entry_path(key);
    let data = serde_json::to_string_pretty(entry)
      .map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;
    fs::write(&path, data)
      .map_err(|e| eyre!("Failed to write cache entry {}: {}", path.display(), e))?;

    Ok(())
  }
}

/// In-process cache, lost when the process exits.
#[derive(Debug)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
  ttl: Duration,
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      ttl: default_ttl(),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheStore for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    match entries.get(key) {
      Some(entry) if entry.is_expired(Utc::now(), self.ttl) => {
        entries.remove(key);
        Ok(None)
      }
      Some(entry) => Ok(Some(entry.clone())),
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(key.to_string(), entry.clone());
    Ok(())
  }
}
