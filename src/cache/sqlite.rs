//! SQLite cache backend.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::storage::validate_key;
use super::traits::{default_ttl, CacheEntry, CacheStore};

/// Schema for the analysis cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_cache (
    cache_key TEXT PRIMARY KEY,
    explanation TEXT NOT NULL,
    suggested_fix TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

/// One row per key in a SQLite database file.
///
/// A connection is opened for each call and closed before it returns, so the
/// store can be shared freely without holding a handle between failures.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
  path: PathBuf,
  ttl: Duration,
}

impl SqliteStorage {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      ttl: default_ttl(),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Open the database, creating it and its schema if needed.
  fn connect(&self) -> Result<Connection> {
    // Ensure parent directory exists
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&self.path).map_err(|e| {
      eyre!(
        "Failed to open cache database at {}: {}",
        self.path.display(),
        e
      )
    })?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(conn)
  }

  /// Delete every entry. Returns how many were removed.
  pub fn clear(&self) -> Result<usize> {
    let conn = self.connect()?;
    conn
      .execute("DELETE FROM analysis_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))
  }

  /// Delete expired entries. Returns how many were removed.
  pub fn purge_expired(&self) -> Result<usize> {
    let conn = self.connect()?;
    let cutoff = format_datetime(Utc::now() - self.ttl);
    conn
      .execute(
        "DELETE FROM analysis_cache WHERE recorded_at < ?",
        params![cutoff],
      )
      .map_err(|e| eyre!("Failed to purge expired cache entries: {}", e))
  }
}

impl CacheStore for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
    validate_key(key)?;
    let conn = self.connect()?;

    let row: Option<(String, String, String)> = conn
      .query_row(
        "SELECT explanation, suggested_fix, recorded_at FROM analysis_cache
         WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    let Some((explanation, suggested_fix, recorded_at)) = row else {
      return Ok(None);
    };

    let entry = CacheEntry {
      recorded_at: parse_datetime(&recorded_at)?,
      explanation,
      suggested_fix,
    };

    if entry.is_expired(Utc::now(), self.ttl) {
      debug!(key, "cache entry expired, removing");
      conn
        .execute(
          "DELETE FROM analysis_cache WHERE cache_key = ?",
          params![key],
        )
        .map_err(|e| eyre!("Failed to remove expired cache entry {}: {}", key, e))?;
      return Ok(None);
    }

    Ok(Some(entry))
  }

  fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
    validate_key(key)?;
    let conn = self.connect()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO analysis_cache (cache_key, explanation, suggested_fix, recorded_at)
         VALUES (?, ?, ?, ?)",
        params![
          key,
          entry.explanation,
          entry.suggested_fix,
          format_datetime(entry.recorded_at)
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }
}

/// Fixed-width RFC 3339, so stored timestamps order correctly as text.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp as stored by [`SqliteStorage::put`].
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
