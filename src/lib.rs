//! Readable failure reports with cached, AI-assisted explanations.
//!
//! A [`Tracer`] snapshots the stack of a failure, looks the failure up in a
//! time-limited cache and otherwise asks an analysis provider for an
//! explanation and a suggested fix, falling back to a degraded result when the
//! provider cannot answer.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stacksage::{hook, Config, Tracer};
//!
//! # fn main() -> color_eyre::Result<()> {
//! let tracer = Arc::new(Tracer::from_config(&Config::load(None)?)?);
//! hook::install(tracer.clone());
//!
//! let port = tracer.debug(|| "eighty".parse::<u16>());
//! assert!(port.is_none());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cache;
pub mod capture;
pub mod config;
pub mod hook;
pub mod logging;
pub mod printer;
pub mod progress;
pub mod provider;
pub mod tracer;

pub use analysis::{AnalysisRequest, AnalysisResult};
pub use capture::{CapturedBacktrace, FrameSnapshot, FrameSource, ManualFrames, RawFrame};
pub use config::Config;
pub use hook::{analyze, catch, debug, default_tracer, install, set_default, uninstall};
pub use tracer::{Outcome, Report, Settings, Tracer};
