//! The analysis pipeline: capture, cache check, provider call, fallback.

use color_eyre::{eyre::eyre, Result};
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::io::{self, IsTerminal};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::analysis::{AnalysisRequest, AnalysisResult, SYSTEM_PROMPT};
use crate::cache::{self, CacheLayer};
use crate::capture::{panic_message, render_value, CapturedBacktrace, FrameSource};
use crate::config::Config;
use crate::printer::{self, ConsolePrinter, NoopPrinter, Printer, DETAILED, NORMAL};
use crate::progress::{NoopProgress, ProgressGuard, ProgressSignal, Spinner};
use crate::provider::{AnalysisProvider, Availability, DisabledProvider, OpenAiProvider};

/// Message shown next to the spinner while the provider works.
pub const PROGRESS_MESSAGE: &str = "AI Analysis running...";

/// Creates a fresh progress signal for each provider call.
pub type ProgressFactory = Box<dyn Fn() -> Box<dyn ProgressSignal> + Send + Sync>;

thread_local! {
  static ANALYZING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`Tracer::handle`].
pub(crate) fn is_analyzing() -> bool {
  ANALYZING.with(Cell::get)
}

struct AnalyzingGuard {
  previous: bool,
}

impl AnalyzingGuard {
  fn enter() -> Self {
    Self {
      previous: ANALYZING.with(|flag| flag.replace(true)),
    }
  }
}

impl Drop for AnalyzingGuard {
  fn drop(&mut self) {
    ANALYZING.with(|flag| flag.set(self.previous));
  }
}

/// How the analysis of one failure was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Enrichment was off; no cache or provider was consulted
  Disabled(AnalysisResult),
  /// Served from the cache without asking the provider
  Cached(AnalysisResult),
  /// Returned by the provider just now
  Fresh(AnalysisResult),
  /// The provider failed; a degraded result was substituted
  Fallback(AnalysisResult),
}

impl Outcome {
  pub fn result(&self) -> &AnalysisResult {
    match self {
      Outcome::Disabled(r) | Outcome::Cached(r) | Outcome::Fresh(r) | Outcome::Fallback(r) => r,
    }
  }

  pub fn into_result(self) -> AnalysisResult {
    match self {
      Outcome::Disabled(r) | Outcome::Cached(r) | Outcome::Fresh(r) | Outcome::Fallback(r) => r,
    }
  }
}

/// Everything produced for one failure.
#[derive(Debug, Clone)]
pub struct Report {
  pub request: AnalysisRequest,
  pub cache_key: String,
  pub outcome: Outcome,
}

/// Read-only switches for a [`Tracer`].
#[derive(Debug, Clone)]
pub struct Settings {
  /// Ask the provider at all
  pub ai_enabled: bool,
  pub progress_message: String,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      ai_enabled: true,
      progress_message: PROGRESS_MESSAGE.to_string(),
    }
  }
}

/// Turns failures into printed reports with an explanation and suggested fix.
pub struct Tracer {
  provider: Box<dyn AnalysisProvider>,
  cache: CacheLayer,
  printer: Arc<dyn Printer>,
  progress: ProgressFactory,
  settings: Settings,
}

pub struct TracerBuilder {
  provider: Box<dyn AnalysisProvider>,
  cache: CacheLayer,
  printer: Arc<dyn Printer>,
  progress: ProgressFactory,
  settings: Settings,
}

impl Default for TracerBuilder {
  fn default() -> Self {
    Self {
      provider: Box::new(DisabledProvider),
      cache: CacheLayer::disabled(),
      printer: Arc::new(NoopPrinter),
      progress: Box::new(|| -> Box<dyn ProgressSignal> { Box::new(NoopProgress) }),
      settings: Settings::default(),
    }
  }
}

impl TracerBuilder {
  pub fn provider(mut self, provider: impl AnalysisProvider + 'static) -> Self {
    self.provider = Box::new(provider);
    self
  }

  pub fn cache(mut self, cache: CacheLayer) -> Self {
    self.cache = cache;
    self
  }

  pub fn printer(mut self, printer: Arc<dyn Printer>) -> Self {
    self.printer = printer;
    self
  }

  pub fn progress<F>(mut self, factory: F) -> Self
  where
    F: Fn() -> Box<dyn ProgressSignal> + Send + Sync + 'static,
  {
    self.progress = Box::new(factory);
    self
  }

  pub fn settings(mut self, settings: Settings) -> Self {
    self.settings = settings;
    self
  }

  pub fn build(self) -> Tracer {
    Tracer {
      provider: self.provider,
      cache: self.cache,
      printer: self.printer,
      progress: self.progress,
      settings: self.settings,
    }
  }
}

impl Tracer {
  pub fn builder() -> TracerBuilder {
    TracerBuilder::default()
  }

  /// Wire the console printer, configured cache, OpenAI provider and a
  /// spinner (when stderr is a terminal).
  pub fn from_config(config: &Config) -> Result<Tracer> {
    let provider = OpenAiProvider::new(&config.ai)?;
    let printer: Arc<dyn Printer> = Arc::new(ConsolePrinter::new(config.verbosity));
    let settings = Settings {
      ai_enabled: config.ai.enabled,
      ..Settings::default()
    };

    let interactive = io::stderr().is_terminal();
    let message = settings.progress_message.clone();

    Ok(
      Tracer::builder()
        .provider(provider)
        .cache(cache::open(&config.cache))
        .printer(printer)
        .progress(move || -> Box<dyn ProgressSignal> {
          if interactive {
            Box::new(Spinner::new(message.clone()))
          } else {
            Box::new(NoopProgress)
          }
        })
        .settings(settings)
        .build(),
    )
  }

  /// A tracer that prints reports but never asks a provider.
  pub fn offline(verbosity: u8) -> Tracer {
    Tracer::builder()
      .printer(Arc::new(ConsolePrinter::new(verbosity)))
      .settings(Settings {
        ai_enabled: false,
        ..Settings::default()
      })
      .build()
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn printer(&self) -> &dyn Printer {
    self.printer.as_ref()
  }

  /// Analyze an error value, capturing the current stack.
  pub fn analyze<E: Error + ?Sized>(&self, error: &E) -> Report {
    let trace = CapturedBacktrace::capture();
    self.analyze_with(error, &trace)
  }

  /// Analyze an error value against caller-supplied frames.
  pub fn analyze_with<E: Error + ?Sized>(&self, error: &E, source: &dyn FrameSource) -> Report {
    self.handle(&error_kind(error), &error.to_string(), source)
  }

  /// Run the whole pipeline for one failure. Never fails and never panics.
  pub fn handle(&self, kind: &str, message: &str, source: &dyn FrameSource) -> Report {
    self.handle_request(AnalysisRequest::from_source(kind, message, source))
  }

  /// Run the pipeline for an already snapshotted failure.
  ///
  /// The request owns plain data, so it can be built on one thread and
  /// analyzed on another.
  pub fn handle_request(&self, request: AnalysisRequest) -> Report {
    let _analyzing = AnalyzingGuard::enter();
    let kind = request.exception_kind().to_string();
    let message = request.exception_message().to_string();

    panic::catch_unwind(AssertUnwindSafe(move || self.run(request))).unwrap_or_else(|payload| {
      let reason = panic_message(payload.as_ref());
      warn!(reason = %reason, "analysis pipeline panicked");
      let request = AnalysisRequest::new(kind, message, Vec::new());
      Report {
        cache_key: request.cache_key(),
        request,
        outcome: Outcome::Fallback(AnalysisResult::fallback(format!(
          "internal error: {}",
          reason
        ))),
      }
    })
  }

  fn run(&self, request: AnalysisRequest) -> Report {
    let printer = self.printer.as_ref();

    printer::print_header(printer, request.exception_kind(), request.exception_message());
    printer::print_frames(printer, request.frames());

    let cache_key = request.cache_key();
    let outcome = self.resolve(&request, &cache_key);

    printer::print_analysis(printer, outcome.result());
    printer::print_footer(printer);

    Report {
      request,
      cache_key,
      outcome,
    }
  }

  fn disabled_reason(&self) -> Option<&'static str> {
    if !self.settings.ai_enabled {
      return Availability::Disabled.reason();
    }
    self.provider.availability().reason()
  }

  fn resolve(&self, request: &AnalysisRequest, key: &str) -> Outcome {
    let printer = self.printer.as_ref();

    if let Some(reason) = self.disabled_reason() {
      printer::print_warning(printer, "AI analysis is disabled or API key not provided.");
      debug!(reason, "analysis disabled");
      return Outcome::Disabled(AnalysisResult::disabled(reason));
    }

    match self.cache.lookup(key) {
      Ok(Some(result)) => {
        printer::print_note(
          printer,
          &format!("Using cached AI response with key {}", key),
          DETAILED,
        );
        return Outcome::Cached(result);
      }
      Ok(None) => {}
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as miss");
        printer::print_warning(printer, &format!("Failed to read from cache: {}.", e));
      }
    }

    printer::print_note(printer, "Analyzing error with AI...", DETAILED);

    match self.ask_provider(request) {
      Ok(result) => {
        if self.cache.is_enabled() {
          printer::print_note(
            printer,
            &format!("Caching AI response with key {}", key),
            DETAILED,
          );
          if let Err(e) = self.cache.record(key, &result) {
            warn!(key, error = %e, "cache write failed");
            printer::print_warning(printer, &format!("Failed to write to cache: {}", e));
          }
        }
        Outcome::Fresh(result)
      }
      Err(e) => {
        warn!(error = %e, "analysis provider failed");
        printer::print_warning(
          printer,
          &format!("AI analysis failed: {}\nFalling back to basic analysis.", e),
        );
        Outcome::Fallback(AnalysisResult::fallback(e))
      }
    }
  }

  fn ask_provider(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
    let user_prompt = request.user_prompt();
    let mut signal = (self.progress)();
    let started = Instant::now();

    let answer = {
      let _progress = ProgressGuard::start(signal.as_mut());
      panic::catch_unwind(AssertUnwindSafe(|| {
        self.provider.get_analysis(SYSTEM_PROMPT, &user_prompt)
      }))
    };

    let elapsed = started.elapsed();
    debug!(elapsed_ms = elapsed.as_millis() as u64, "provider call finished");

    let result = answer
      .map_err(|payload| eyre!("provider panicked: {}", panic_message(payload.as_ref())))??;

    printer::print_note(
      self.printer.as_ref(),
      &format!("AI Analysis completed in {:.2}s", elapsed.as_secs_f64()),
      NORMAL,
    );
    Ok(result)
  }
}

/// Forwards `Debug` for unsized error values.
struct DebugRef<'a, E: ?Sized>(&'a E);

impl<E: fmt::Debug + ?Sized> fmt::Debug for DebugRef<'_, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Short type name of an error. Trait objects carry no static type, so the
/// concrete name is read from the leading identifier of their `Debug` output.
pub fn error_kind<E: Error + ?Sized>(error: &E) -> String {
  let kind = short_type_name(std::any::type_name::<E>());
  if !kind.starts_with("dyn ") {
    return kind;
  }

  let rendered = render_value(&DebugRef(error), &kind);
  let leading: String = rendered
    .chars()
    .take_while(|c| c.is_alphanumeric() || *c == '_')
    .collect();
  if leading.is_empty() {
    "Error".to_string()
  } else {
    leading
  }
}

/// Strip module paths from a type name: `alloc::vec::Vec<alloc::string::String>`
/// becomes `Vec<String>`.
pub fn short_type_name(full: &str) -> String {
  let mut out = String::with_capacity(full.len());
  let mut path = String::new();

  for c in full.chars() {
    if c.is_alphanumeric() || c == '_' || c == ':' {
      path.push(c);
    } else {
      push_last_segment(&mut out, &path);
      path.clear();
      out.push(c);
    }
  }
  push_last_segment(&mut out, &path);
  out
}

fn push_last_segment(out: &mut String, path: &str) {
  out.push_str(path.rsplit("::").next().unwrap_or(path));
}
