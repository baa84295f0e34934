//! External analysis providers.

mod openai;

use color_eyre::{eyre::eyre, Result};

pub use openai::OpenAiProvider;

use crate::analysis::AnalysisResult;

/// Whether a provider can be asked for an analysis right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
  Ready,
  /// Turned off in the configuration
  Disabled,
  /// Enabled but no API key was found
  MissingCredential,
}

impl Availability {
  /// Why analysis is unavailable, or `None` when ready.
  pub fn reason(self) -> Option<&'static str> {
    match self {
      Availability::Ready => None,
      Availability::Disabled => Some("AI analysis is disabled in the configuration"),
      Availability::MissingCredential => {
        Some("no API key found (set STACKSAGE_API_KEY or OPENAI_API_KEY)")
      }
    }
  }
}

/// Source of explanations and suggested fixes.
pub trait AnalysisProvider: Send + Sync {
  /// Ask for an analysis. Implementations must bound the call in time.
  fn get_analysis(&self, system_prompt: &str, user_prompt: &str) -> Result<AnalysisResult>;

  fn availability(&self) -> Availability;

  fn is_available(&self) -> bool {
    self.availability() == Availability::Ready
  }
}

/// Provider used when analysis is switched off.
#[derive(Debug, Default)]
pub struct DisabledProvider;

impl AnalysisProvider for DisabledProvider {
  fn get_analysis(&self, _system_prompt: &str, _user_prompt: &str) -> Result<AnalysisResult> {
    Err(eyre!("AI analysis is disabled"))
  }

  fn availability(&self) -> Availability {
    Availability::Disabled
  }
}
