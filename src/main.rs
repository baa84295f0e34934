mod demo;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use stacksage::config::{Config, MAX_VERBOSITY};
use stacksage::{cache, logging, Tracer};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "stacksage")]
#[command(about = "Readable failure reports with cached, AI-assisted explanations")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./stacksage.yaml or $XDG_CONFIG_HOME/stacksage/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Output detail: 0 = minimal, 1 = normal, 2 = detailed
  #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=MAX_VERBOSITY as i64))]
  verbosity: Option<u8>,

  /// Never contact the analysis provider
  #[arg(long)]
  no_ai: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Trigger a sample failure and analyze it
  Demo {
    #[arg(value_enum)]
    scenario: demo::Scenario,
  },
  /// Maintain the analysis cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Remove every cached analysis
  Clear,
  /// Remove expired analyses
  Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command-line overrides
  if let Some(verbosity) = args.verbosity {
    config.verbosity = verbosity;
  }
  if args.no_ai {
    config.ai.enabled = false;
  }

  let _log_guard = logging::init(config.verbosity, config.log_dir.as_deref())?;

  match args.command {
    Command::Demo { scenario } => {
      let tracer = Arc::new(Tracer::from_config(&config)?);
      demo::run(scenario, tracer)?;
    }
    Command::Cache { action } => {
      let (verb, removed) = match action {
        CacheAction::Clear => ("Removed", cache::clear(&config.cache)?),
        CacheAction::Prune => ("Pruned", cache::prune(&config.cache)?),
      };
      println!("{} {} cached analyses", verb, removed);
    }
  }

  Ok(())
}
