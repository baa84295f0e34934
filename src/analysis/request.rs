use sha2::{Digest, Sha256};
use std::path::Path;

use crate::capture::{snapshot_frames, FrameSnapshot, FrameSource};

/// Fixed instruction sent with every analysis request.
pub const SYSTEM_PROMPT: &str = "You are an expert Rust developer helping with debugging. \
Provide clear, concise explanations of errors and practical suggestions for fixing them.";

static EMPTY_FRAME: FrameSnapshot = FrameSnapshot::EMPTY;

/// Everything known about one failure occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
  exception_kind: String,
  exception_message: String,
  /// Caller to callee; the failure site is last.
  frames: Vec<FrameSnapshot>,
}

impl AnalysisRequest {
  pub fn new(
    exception_kind: impl Into<String>,
    exception_message: impl Into<String>,
    frames: Vec<FrameSnapshot>,
  ) -> Self {
    Self {
      exception_kind: exception_kind.into(),
      exception_message: exception_message.into(),
      frames,
    }
  }

  /// Snapshot the failure context and build the request from it.
  pub fn from_source(
    exception_kind: impl Into<String>,
    exception_message: impl Into<String>,
    source: &dyn FrameSource,
  ) -> Self {
    Self::new(exception_kind, exception_message, snapshot_frames(source))
  }

  pub fn exception_kind(&self) -> &str {
    &self.exception_kind
  }

  pub fn exception_message(&self) -> &str {
    &self.exception_message
  }

  pub fn frames(&self) -> &[FrameSnapshot] {
    &self.frames
  }

  /// The failure site, or an empty frame when nothing was captured.
  pub fn deepest_frame(&self) -> &FrameSnapshot {
    self.frames.last().unwrap_or(&EMPTY_FRAME)
  }

  /// Stable identity of "this kind of failure".
  ///
  /// Local variable values are deliberately left out, so failures that differ
  /// only in data share one cached analysis.
  pub fn cache_key(&self) -> String {
    let deepest = self.deepest_frame();
    let file_name = Path::new(deepest.source_location())
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();

    let snippet = deepest.code_snippet();
    let fields = [
      self.exception_kind.as_str(),
      self.exception_message.as_str(),
      deepest.function_name(),
      file_name.as_str(),
      snippet.as_str(),
    ];

    // Length-prefixed, so no split of the same text across fields collides.
    let mut hasher = Sha256::new();
    for field in fields {
      hasher.update((field.len() as u64).to_le_bytes());
      hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
  }

  /// Prompt describing the failure site for an analysis provider.
  pub fn user_prompt(&self) -> String {
    let deepest = self.deepest_frame();
    let locals = serde_json::to_string_pretty(deepest.local_variables())
      .unwrap_or_else(|_| "{}".to_string());

    format!(
      "Error analysis request. Please analyze this Rust error and provide:\n\
       1. A clear explanation of what's happening\n\
       2. A suggested fix\n\
       \n\
       Error Kind: {}\n\
       Error Message: {}\n\
       \n\
       Most relevant code (error at line {}):\n\
       {}\n\
       \n\
       Relevant local variables:\n\
       {}\n\
       \n\
       Format your response as JSON with 'explanation' and 'suggested_fix' keys.\n",
      self.exception_kind,
      self.exception_message,
      deepest.line_number(),
      deepest.code_snippet(),
      locals
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  fn frame(location: &str, function: &str, locals: &[(&str, &str)]) -> FrameSnapshot {
    FrameSnapshot::new(
      location,
      42,
      function,
      vec![(41, "let y = 0;".to_string()), (42, "x / y".to_string())],
      locals
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>(),
    )
  }

  #[test]
  fn test_deepest_frame_is_last() {
    let request = AnalysisRequest::new(
      "ZeroDivisionError",
      "division by zero",
      vec![frame("src/main.rs", "main", &[]), frame("src/math.rs", "divide", &[])],
    );
    assert_eq!(request.deepest_frame().function_name(), "divide");
    assert_eq!(request.frames()[0].function_name(), "main");
  }

  #[test]
  fn test_deepest_frame_of_empty_request_is_sentinel() {
    let request = AnalysisRequest::new("panic", "boom", Vec::new());
    let deepest = request.deepest_frame();
    assert_eq!(deepest.function_name(), "");
    assert_eq!(deepest.source_location(), "");
    assert_eq!(deepest.code_snippet(), "");
    assert_eq!(request.cache_key().len(), 64);
  }

  #[test]
  fn test_cache_key_ignores_local_values() {
    let a = AnalysisRequest::new(
      "ZeroDivisionError",
      "division by zero",
      vec![frame("src/math.rs", "divide", &[("x", "10"), ("y", "0")])],
    );
    let b = AnalysisRequest::new(
      "ZeroDivisionError",
      "division by zero",
      vec![frame("src/math.rs", "divide", &[("x", "99"), ("z", "3")])],
    );
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_cache_key_uses_file_name_only() {
    let a = AnalysisRequest::new("E", "m", vec![frame("/home/a/proj/src/math.rs", "divide", &[])]);
    let b = AnalysisRequest::new("E", "m", vec![frame("/tmp/other/math.rs", "divide", &[])]);
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_cache_key_distinguishes_failures() {
    let base = AnalysisRequest::new("E", "m", vec![frame("src/math.rs", "divide", &[])]);
    let other_message = AnalysisRequest::new("E", "n", vec![frame("src/math.rs", "divide", &[])]);
    let other_kind = AnalysisRequest::new("F", "m", vec![frame("src/math.rs", "divide", &[])]);
    let other_function = AnalysisRequest::new("E", "m", vec![frame("src/math.rs", "quotient", &[])]);
    let other_file = AnalysisRequest::new("E", "m", vec![frame("src/calc.rs", "divide", &[])]);

    let key = base.cache_key();
    assert_ne!(key, other_message.cache_key());
    assert_ne!(key, other_kind.cache_key());
    assert_ne!(key, other_function.cache_key());
    assert_ne!(key, other_file.cache_key());
  }

  #[test]
  fn test_cache_key_separates_fields() {
    let split_early = AnalysisRequest::new("a:b", "c", vec![frame("src/math.rs", "divide", &[])]);
    let split_late = AnalysisRequest::new("a", "b:c", vec![frame("src/math.rs", "divide", &[])]);
    assert_ne!(split_early.cache_key(), split_late.cache_key());

    let kind_heavy = AnalysisRequest::new("Error", "", vec![frame("src/math.rs", "divide", &[])]);
    let message_heavy = AnalysisRequest::new("", "Error", vec![frame("src/math.rs", "divide", &[])]);
    assert_ne!(kind_heavy.cache_key(), message_heavy.cache_key());
  }

  #[test]
  fn test_user_prompt_contents() {
    let request = AnalysisRequest::new(
      "ZeroDivisionError",
      "division by zero",
      vec![frame("src/math.rs", "divide", &[("y", "0"), ("x", "10")])],
    );
    let prompt = request.user_prompt();

    assert!(prompt.contains("Error Kind: ZeroDivisionError"));
    assert!(prompt.contains("Error Message: division by zero"));
    assert!(prompt.contains("error at line 42"));
    assert!(prompt.contains("41: let y = 0;\n42: x / y"));
    // Locals are key-ordered.
    assert!(prompt.contains("{\n  \"x\": \"10\",\n  \"y\": \"0\"\n}"));
    assert!(prompt.contains("'explanation' and 'suggested_fix'"));
  }
}
