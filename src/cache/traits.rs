//! Core traits and types for the analysis cache.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisResult;

/// Default time-to-live for cached analyses.
pub fn default_ttl() -> Duration {
  Duration::hours(24)
}

/// A persisted analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub recorded_at: DateTime<Utc>,
  pub explanation: String,
  pub suggested_fix: String,
}

impl CacheEntry {
  /// Record an analysis as of now.
  pub fn record(result: &AnalysisResult) -> Self {
    Self {
      recorded_at: Utc::now(),
      explanation: result.explanation.clone(),
      suggested_fix: result.suggested_fix.clone(),
    }
  }

  /// An entry stays valid while `now - recorded_at <= ttl`.
  pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - self.recorded_at > ttl
  }

  pub fn into_result(self) -> AnalysisResult {
    AnalysisResult::new(self.explanation, self.suggested_fix)
  }
}

/// Key/value store for previously computed analyses.
///
/// Keys are hex digests. Expired entries read as absent and are purged on read.
/// Backend failures come back as errors; callers decide how to degrade.
pub trait CacheStore: Send + Sync {
  /// Look up a valid entry.
  fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any previous one for the key.
  fn put(&self, key: &str, entry: &CacheEntry) -> Result<()>;
}
