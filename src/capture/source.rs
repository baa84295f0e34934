//! Failure-context providers: where the raw call stack comes from.

use std::fmt;

/// A local variable borrowed from a live frame.
#[derive(Clone, Copy)]
pub struct Local<'a> {
  pub name: &'a str,
  pub type_name: &'static str,
  pub value: &'a dyn fmt::Debug,
}

impl<'a> Local<'a> {
  pub fn new<T: fmt::Debug>(name: &'a str, value: &'a T) -> Self {
    Self {
      name,
      type_name: std::any::type_name::<T>(),
      value,
    }
  }
}

impl fmt::Debug for Local<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Local")
      .field("name", &self.name)
      .field("type_name", &self.type_name)
      .finish_non_exhaustive()
  }
}

/// One level of a call stack as reported by a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct RawFrame<'a> {
  pub file: String,
  pub line: u32,
  pub function: String,
  pub locals: Vec<Local<'a>>,
}

impl<'a> RawFrame<'a> {
  pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
    Self {
      file: file.into(),
      line,
      function: function.into(),
      locals: Vec::new(),
    }
  }

  /// Attach a named local variable.
  pub fn local<T: fmt::Debug>(mut self, name: &'a str, value: &'a T) -> Self {
    self.locals.push(Local::new(name, value));
    self
  }
}

/// Supplies the chain of active frames at the point of failure.
///
/// Frames are ordered outermost call first; the last frame is the failure site.
pub trait FrameSource {
  fn frames(&self) -> &[RawFrame<'_>];
}

impl FrameSource for [RawFrame<'_>] {
  fn frames(&self) -> &[RawFrame<'_>] {
    self
  }
}

impl FrameSource for Vec<RawFrame<'_>> {
  fn frames(&self) -> &[RawFrame<'_>] {
    self
  }
}

/// Explicitly assembled frames, for callers that know their own context.
///
/// ```
/// use stacksage::capture::{ManualFrames, RawFrame};
///
/// let (x, y) = (10, 0);
/// let frames = ManualFrames::new()
///   .frame(RawFrame::new("src/main.rs", 12, "main"))
///   .frame(RawFrame::new("src/math.rs", 42, "divide").local("x", &x).local("y", &y));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualFrames<'a> {
  frames: Vec<RawFrame<'a>>,
}

impl<'a> ManualFrames<'a> {
  pub fn new() -> Self {
    Self { frames: Vec::new() }
  }

  /// Push a frame further in (callee of the previous one).
  pub fn frame(mut self, frame: RawFrame<'a>) -> Self {
    self.frames.push(frame);
    self
  }
}

impl FrameSource for ManualFrames<'_> {
  fn frames(&self) -> &[RawFrame<'_>] {
    &self.frames
  }
}

/// Symbol prefixes belonging to the runtime, the panic machinery or this crate's
/// own capture path. They never describe the user's failure.
const MACHINERY_PREFIXES: &[&str] = &[
  "backtrace::",
  "std::",
  "core::",
  "alloc::",
  "<alloc::",
  "<core::",
  "<std::",
  "rust_begin_unwind",
  "rust_panic",
  "__rust",
  "stacksage::capture::",
  "stacksage::hook::",
  "stacksage::tracer::",
];

/// The current thread's stack, captured and symbolized with the `backtrace` crate.
///
/// Rust exposes no local variables at runtime, so captured frames carry none.
#[derive(Debug, Clone, Default)]
pub struct CapturedBacktrace {
  frames: Vec<RawFrame<'static>>,
}

impl CapturedBacktrace {
  /// Capture the stack of the calling thread.
  pub fn capture() -> Self {
    let trace = backtrace::Backtrace::new();
    let innermost_first = trace.frames().iter().flat_map(|frame| {
      frame.symbols().iter().filter_map(|symbol| {
        let function = symbol.name().map(|n| format!("{:#}", n))?;
        let file = symbol.filename()?;
        let line = symbol.lineno()?;
        Some(RawFrame::new(file.display().to_string(), line, function))
      })
    });

    Self::from_innermost(innermost_first)
  }

  /// Build from frames listed innermost first, as unwinders report them.
  pub fn from_innermost(frames: impl IntoIterator<Item = RawFrame<'static>>) -> Self {
    let mut frames: Vec<RawFrame<'static>> = frames
      .into_iter()
      .filter(|frame| !is_machinery(&frame.function))
      .collect();
    frames.reverse();
    Self { frames }
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl FrameSource for CapturedBacktrace {
  fn frames(&self) -> &[RawFrame<'_>] {
    &self.frames
  }
}

fn is_machinery(function: &str) -> bool {
  MACHINERY_PREFIXES
    .iter()
    .any(|prefix| function.starts_with(prefix))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_frames_keep_order() {
    let x = 10;
    let frames = ManualFrames::new()
      .frame(RawFrame::new("src/main.rs", 3, "main"))
      .frame(RawFrame::new("src/math.rs", 42, "divide").local("x", &x));

    let raw = frames.frames();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0].function, "main");
    assert_eq!(raw[1].function, "divide");
    assert_eq!(raw[1].locals[0].name, "x");
    assert_eq!(raw[1].locals[0].type_name, "i32");
  }

  #[test]
  fn test_from_innermost_reverses_and_filters() {
    let captured = CapturedBacktrace::from_innermost(vec![
      RawFrame::new("backtrace/src/capture.rs", 10, "backtrace::capture::Backtrace::new"),
      RawFrame::new("src/capture/source.rs", 1, "stacksage::capture::source::CapturedBacktrace::capture"),
      RawFrame::new("library/std/src/panicking.rs", 5, "std::panicking::begin_panic_handler"),
      RawFrame::new("src/app.rs", 30, "app::load_user"),
      RawFrame::new("src/main.rs", 8, "app::main"),
      RawFrame::new("library/core/src/ops/function.rs", 250, "core::ops::function::FnOnce::call_once"),
    ]);

    let names: Vec<&str> = captured.frames().iter().map(|f| f.function.as_str()).collect();
    assert_eq!(names, vec!["app::main", "app::load_user"]);
  }

  #[test]
  fn test_capture_does_not_panic() {
    let captured = CapturedBacktrace::capture();
    // Symbol availability depends on the build; only the machinery filter is guaranteed.
    assert!(captured
      .frames()
      .iter()
      .all(|f| !f.function.starts_with("backtrace::")));
  }
}
