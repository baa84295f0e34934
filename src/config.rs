use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CACHE_DIR;

/// Highest verbosity level: 0 = minimal, 1 = normal, 2 = detailed.
pub const MAX_VERBOSITY: u8 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub ai: AiConfig,
  pub cache: CacheConfig,
  /// 0 = minimal, 1 = normal, 2 = detailed (includes local variables)
  pub verbosity: u8,
  /// Directory for the log file (logs go to stderr when unset)
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      ai: AiConfig::default(),
      cache: CacheConfig::default(),
      verbosity: MAX_VERBOSITY,
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
  /// Whether to ask an analysis provider at all
  pub enabled: bool,
  pub model: String,
  /// OpenAI-compatible API root (e.g., "https://api.openai.com/v1")
  pub base_url: String,
  pub timeout_secs: u64,
  /// Read from the environment, never from the config file
  #[serde(skip)]
  pub api_key: Option<String>,
}

impl Default for AiConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      model: "gpt-4o-mini".to_string(),
      base_url: "https://api.openai.com/v1".to_string(),
      timeout_secs: 30,
      api_key: None,
    }
  }
}

impl AiConfig {
  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// One JSON file per entry
  #[default]
  File,
  /// A single SQLite database
  Sqlite,
  /// Process memory only
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  pub backend: CacheBackend,
  /// Cache directory, relative to the working directory unless absolute
  pub dir: PathBuf,
  /// Entries older than this are treated as absent
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      backend: CacheBackend::File,
      dir: PathBuf::from(DEFAULT_CACHE_DIR),
      ttl_secs: 24 * 60 * 60,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    let secs = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(i64::MAX / 1_000))
  }
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./stacksage.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stacksage/config.yaml
  ///
  /// The API key is then read from the environment.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.ai.api_key = Self::get_api_key();
    Ok(config.normalized())
  }

  /// Defaults plus the API key from the environment; never fails.
  pub fn from_env() -> Self {
    let mut config = Config::default();
    config.ai.api_key = Self::get_api_key();
    config
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stacksage.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stacksage").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config.normalized())
  }

  /// Clamp out-of-range values.
  fn normalized(mut self) -> Self {
    if self.verbosity > MAX_VERBOSITY {
      self.verbosity = MAX_VERBOSITY;
    }
    self
  }

  /// Get the analysis API key from environment variables.
  ///
  /// Checks STACKSAGE_API_KEY first, then OPENAI_API_KEY as fallback.
  pub fn get_api_key() -> Option<String> {
    std::env::var("STACKSAGE_API_KEY")
      .or_else(|_| std::env::var("OPENAI_API_KEY"))
      .ok()
      .filter(|key| !key.trim().is_empty())
  }
}
