//! Diagnostic logging for the binary. The library only emits `tracing` events.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::printer::DETAILED;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "STACKSAGE_LOG";

const LOG_FILE: &str = "stacksage.log";

fn default_directive(verbosity: u8, to_file: bool) -> &'static str {
  match verbosity {
    0 => "error",
    v if to_file && v >= DETAILED => "warn,stacksage=debug",
    _ => "warn",
  }
}

/// Install the global subscriber.
///
/// Logs go to stderr, or to `<log_dir>/stacksage.log` through a non-blocking
/// writer whose guard must be held until exit.
pub fn init(verbosity: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env(LOG_ENV)
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, log_dir.is_some())));

  match log_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      let appender = tracing_appender::rolling::never(dir, LOG_FILE);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_directive() {
    assert_eq!(default_directive(0, true), "error");
    assert_eq!(default_directive(1, true), "warn");
    assert_eq!(default_directive(2, false), "warn");
    assert_eq!(default_directive(2, true), "warn,stacksage=debug");
  }
}
