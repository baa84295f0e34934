//! Ways in: the process panic hook, the `debug` and `catch` wrappers, and a
//! lazily created default [`Tracer`].

use once_cell::sync::Lazy;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use tracing::warn;

use crate::analysis::AnalysisRequest;
use crate::capture::{panic_message, CapturedBacktrace};
use crate::config::Config;
use crate::tracer::{self, Report, Tracer};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Kind reported for panics.
pub const PANIC_KIND: &str = "panic";

/// The hook that was active before [`install`], restored by [`uninstall`].
static PREVIOUS_HOOK: Mutex<Option<PanicHook>> = Mutex::new(None);

static DEFAULT: Lazy<RwLock<Arc<Tracer>>> = Lazy::new(|| RwLock::new(Arc::new(build_default())));

thread_local! {
  static IN_HOOK: Cell<bool> = const { Cell::new(false) };
  static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
  static STASHED_TRACE: RefCell<Option<CapturedBacktrace>> = const { RefCell::new(None) };
}

fn build_default() -> Tracer {
  let config = Config::load(None).unwrap_or_else(|e| {
    warn!(error = %e, "failed to load configuration, using defaults");
    Config::from_env()
  });

  Tracer::from_config(&config).unwrap_or_else(|e| {
    warn!(error = %e, "failed to set up analysis, continuing without it");
    Tracer::offline(config.verbosity)
  })
}

fn lock_previous() -> MutexGuard<'static, Option<PanicHook>> {
  PREVIOUS_HOOK
    .lock()
    .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replace the process panic hook with one that reports panics through `tracer`.
///
/// Installing again swaps the tracer but keeps the originally saved hook.
pub fn install(tracer: Arc<Tracer>) {
  let current = panic::take_hook();
  {
    let mut previous = lock_previous();
    if previous.is_none() {
      *previous = Some(current);
    }
  }
  panic::set_hook(Box::new(move |info| on_panic(&tracer, info)));
  tracing::debug!("panic hook installed");
}

/// Restore the hook that was active before [`install`]. No-op if not installed.
pub fn uninstall() {
  if let Some(previous) = lock_previous().take() {
    panic::set_hook(previous);
    tracing::debug!("panic hook restored");
  }
}

pub fn is_installed() -> bool {
  lock_previous().is_some()
}

fn on_panic(tracer: &Tracer, info: &PanicHookInfo<'_>) {
  // Panics raised while analyzing are caught by the tracer itself.
  if tracer::is_analyzing() || IN_HOOK.with(Cell::get) {
    return;
  }

  // Inside `catch`: keep the stack from the panic site for the catcher.
  if CATCH_DEPTH.with(Cell::get) > 0 {
    let trace = CapturedBacktrace::capture();
    STASHED_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
    return;
  }

  IN_HOOK.with(|flag| flag.set(true));
  let message = panic_message(info.payload());
  let request = AnalysisRequest::from_source(PANIC_KIND, message, &CapturedBacktrace::capture());

  // A second panic on this thread would abort the process, so the analysis
  // runs on a helper thread where `handle_request` can catch it.
  let analyzed = thread::scope(|scope| {
    thread::Builder::new()
      .name("stacksage-hook".to_string())
      .spawn_scoped(scope, || {
        tracer.handle_request(request);
      })
      .map(|worker| worker.join().is_ok())
  });
  match analyzed {
    Ok(true) => {}
    Ok(false) => warn!("panic analysis thread failed"),
    Err(e) => warn!(error = %e, "could not start panic analysis thread"),
  }
  IN_HOOK.with(|flag| flag.set(false));
}

fn take_stashed_trace() -> Option<CapturedBacktrace> {
  STASHED_TRACE.with(|slot| slot.borrow_mut().take())
}

struct CatchScope;

impl CatchScope {
  fn enter() -> Self {
    CATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
    take_stashed_trace();
    Self
  }
}

impl Drop for CatchScope {
  fn drop(&mut self) {
    CATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
  }
}

impl Tracer {
  /// Run `f`; if it returns an error, analyze it and return `None`.
  pub fn debug<T, E, F>(&self, f: F) -> Option<T>
  where
    E: Error,
    F: FnOnce() -> Result<T, E>,
  {
    match f() {
      Ok(value) => Some(value),
      Err(error) => {
        self.analyze(&error);
        None
      }
    }
  }

  /// Run `f`, catching a panic; if it panics, analyze the panic and return `None`.
  ///
  /// With the hook installed the reported stack is the one at the panic site,
  /// otherwise it is the stack at this call.
  pub fn catch<T, F>(&self, f: F) -> Option<T>
  where
    F: FnOnce() -> T,
  {
    let outcome = {
      let _scope = CatchScope::enter();
      panic::catch_unwind(AssertUnwindSafe(f))
    };

    // Panics caught inside `f` itself may have left a trace behind.
    let stashed = take_stashed_trace();

    match outcome {
      Ok(value) => Some(value),
      Err(payload) => {
        let trace = stashed.unwrap_or_else(CapturedBacktrace::capture);
        self.handle(PANIC_KIND, &panic_message(payload.as_ref()), &trace);
        None
      }
    }
  }
}

/// The process-wide default tracer, created from configuration on first use.
pub fn default_tracer() -> Arc<Tracer> {
  let guard = DEFAULT.read().unwrap_or_else(|poisoned| poisoned.into_inner());
  Arc::clone(&guard)
}

/// Replace the default tracer.
pub fn set_default(tracer: Arc<Tracer>) {
  let mut guard = DEFAULT.write().unwrap_or_else(|poisoned| poisoned.into_inner());
  *guard = tracer;
}

/// Analyze an error with the default tracer.
pub fn analyze<E: Error + ?Sized>(error: &E) -> Report {
  default_tracer().analyze(error)
}

/// [`Tracer::debug`] on the default tracer.
pub fn debug<T, E, F>(f: F) -> Option<T>
where
  E: Error,
  F: FnOnce() -> Result<T, E>,
{
  default_tracer().debug(f)
}

/// [`Tracer::catch`] on the default tracer.
pub fn catch<T, F>(f: F) -> Option<T>
where
  F: FnOnce() -> T,
{
  default_tracer().catch(f)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::analysis::AnalysisResult;
  use crate::capture::RawFrame;
  use crate::printer::{BufferPrinter, MINIMAL};
  use crate::provider::{AnalysisProvider, Availability};
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct CountingProvider(Arc<AtomicUsize>);

  impl AnalysisProvider for CountingProvider {
    fn get_analysis(&self, _: &str, user_prompt: &str) -> color_eyre::Result<AnalysisResult> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(AnalysisResult::new(
        format!("analyzed: {}", user_prompt.lines().nth(4).unwrap_or("")),
        "fix it",
      ))
    }

    fn availability(&self) -> Availability {
      Availability::Ready
    }
  }

  fn counting_tracer() -> (Tracer, Arc<AtomicUsize>, Arc<BufferPrinter>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let printer = Arc::new(BufferPrinter::new(MINIMAL));
    let tracer = Tracer::builder()
      .provider(CountingProvider(calls.clone()))
      .printer(printer.clone())
      .build();
    (tracer, calls, printer)
  }

  #[test]
  fn test_debug_passes_values_through() {
    let (tracer, calls, _) = counting_tracer();

    let value = tracer.debug(|| "42".parse::<i32>());

    assert_eq!(value, Some(42));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_debug_analyzes_errors() {
    let (tracer, calls, printer) = counting_tracer();

    let value = tracer.debug(|| "forty-two".parse::<i32>());

    assert_eq!(value, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let text = printer.text();
    assert!(text.contains(" ParseIntError: invalid digit found in string"));
    assert!(text.contains("Suggested Fix:\nfix it"));
  }

  #[test]
  fn test_catch_analyzes_panics() {
    let (tracer, calls, printer) = counting_tracer();

    let value: Option<i32> = tracer.catch(|| {
      let items: Vec<i32> = Vec::new();
      items[3]
    });

    assert_eq!(value, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(printer.text().contains(" panic: index out of bounds"));
    assert_eq!(CATCH_DEPTH.with(Cell::get), 0);
  }

  #[test]
  fn test_catch_returns_value_without_panic() {
    let (tracer, calls, _) = counting_tracer();
    assert_eq!(tracer.catch(|| 7), Some(7));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  fn leave_stale_trace() {
    let stale = CapturedBacktrace::from_innermost(vec![RawFrame::new("stale.rs", 1, "stale_fn")]);
    STASHED_TRACE.with(|slot| *slot.borrow_mut() = Some(stale));
  }

  #[test]
  fn test_catch_ignores_trace_left_by_earlier_panic() {
    let (tracer, _, printer) = counting_tracer();
    leave_stale_trace();

    let value: Option<u8> = tracer.catch(|| panic!("fresh failure"));

    assert_eq!(value, None);
    let text = printer.text();
    assert!(text.contains(" panic: fresh failure"));
    assert!(!text.contains("stale_fn"));
  }

  #[test]
  fn test_catch_clears_trace_on_success() {
    let (tracer, _, _) = counting_tracer();

    let value = tracer.catch(|| {
      leave_stale_trace();
      7
    });

    assert_eq!(value, Some(7));
    assert!(STASHED_TRACE.with(|slot| slot.borrow().is_none()));
  }

  #[test]
  fn test_default_tracer_can_be_replaced() {
    let (tracer, calls, _) = counting_tracer();
    set_default(Arc::new(tracer));

    let report = analyze(&"x".parse::<u8>().unwrap_err());

    assert_eq!(report.request.exception_kind(), "ParseIntError");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(debug(|| "1".parse::<u8>()), Some(1));
  }
}
