use serde::{Deserialize, Serialize};
use std::fmt;

/// Explanation and suggested fix for a failure.
///
/// This is also the JSON object analysis providers must answer with, so
/// unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
  pub explanation: String,
  pub suggested_fix: String,
}

impl AnalysisResult {
  pub fn new(explanation: impl Into<String>, suggested_fix: impl Into<String>) -> Self {
    Self {
      explanation: explanation.into(),
      suggested_fix: suggested_fix.into(),
    }
  }

  /// Degraded result returned when the provider call failed.
  pub fn fallback(error: impl fmt::Display) -> Self {
    Self::new(
      format!("AI analysis failed: {}.", error),
      "Unable to provide AI-powered suggestions due to an error.",
    )
  }

  /// Result returned when enrichment is unavailable.
  pub fn disabled(reason: impl fmt::Display) -> Self {
    Self::new(
      format!("AI analysis is unavailable: {}.", reason),
      "Enable AI analysis and configure an API key to get suggested fixes.",
    )
  }
}
