//! Immutable per-frame snapshots taken at failure time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::debug;

use super::render::render_value;
use super::source::{FrameSource, RawFrame};

/// Lines of source shown before the failure line.
const LINES_BEFORE: u32 = 2;
/// Lines of source shown after the failure line.
const LINES_AFTER: u32 = 1;

/// One stack level at failure time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
  source_location: String,
  line_number: u32,
  function_name: String,
  context_lines: Vec<(u32, String)>,
  local_variables: BTreeMap<String, String>,
}

impl FrameSnapshot {
  /// Sentinel used when a failure carries no frames at all.
  pub const EMPTY: FrameSnapshot = FrameSnapshot {
    source_location: String::new(),
    line_number: 0,
    function_name: String::new(),
    context_lines: Vec::new(),
    local_variables: BTreeMap::new(),
  };

  pub fn new(
    source_location: impl Into<String>,
    line_number: u32,
    function_name: impl Into<String>,
    context_lines: Vec<(u32, String)>,
    local_variables: BTreeMap<String, String>,
  ) -> Self {
    Self {
      source_location: source_location.into(),
      line_number,
      function_name: function_name.into(),
      context_lines,
      local_variables,
    }
  }

  /// Snapshot a raw frame, reading its context lines from disk.
  pub fn capture(raw: &RawFrame<'_>) -> Self {
    let local_variables = raw
      .locals
      .iter()
      .map(|local| {
        (
          local.name.to_string(),
          render_value(local.value, local.type_name),
        )
      })
      .collect();

    Self {
      source_location: raw.file.clone(),
      line_number: raw.line,
      function_name: raw.function.clone(),
      context_lines: read_context_lines(&raw.file, raw.line),
      local_variables,
    }
  }

  pub fn source_location(&self) -> &str {
    &self.source_location
  }

  pub fn line_number(&self) -> u32 {
    self.line_number
  }

  pub fn function_name(&self) -> &str {
    &self.function_name
  }

  pub fn context_lines(&self) -> &[(u32, String)] {
    &self.context_lines
  }

  pub fn local_variables(&self) -> &BTreeMap<String, String> {
    &self.local_variables
  }

  /// Context lines as one display string, `"<line>: <text>"` per line.
  pub fn code_snippet(&self) -> String {
    self
      .context_lines
      .iter()
      .map(|(number, text)| format!("{}: {}", number, text))
      .collect::<Vec<_>>()
      .join("\n")
  }
}

/// Walk a failure context, outermost frame first.
pub fn snapshot_frames(source: &dyn FrameSource) -> Vec<FrameSnapshot> {
  source.frames().iter().map(FrameSnapshot::capture).collect()
}

/// Read the window of source around `line`, skipping lines past the end of the file.
///
/// Unavailable sources (generated code, files not shipped with the binary)
/// produce no context rather than an error.
fn read_context_lines(path: &str, line: u32) -> Vec<(u32, String)> {
  if path.is_empty() || line == 0 {
    return Vec::new();
  }

  let file = match File::open(path) {
    Ok(file) => file,
    Err(e) => {
      debug!(path, error = %e, "source unavailable, omitting context lines");
      return Vec::new();
    }
  };

  let first = line.saturating_sub(LINES_BEFORE).max(1);
  let last = line.saturating_add(LINES_AFTER);
  let mut lines = Vec::new();

  for (index, text) in BufReader::new(file).lines().enumerate() {
    let number = index as u32 + 1;
    if number > last {
      break;
    }
    let text = match text {
      Ok(text) => text,
      Err(e) => {
        debug!(path, error = %e, "source unreadable, omitting context lines");
        return Vec::new();
      }
    };
    if number >= first {
      lines.push((number, text.trim_end().to_string()));
    }
  }

  lines
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capture::source::ManualFrames;
  use std::io::Write;

  fn source_file(lines: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for n in 1..=lines {
      writeln!(file, "line {}   ", n).unwrap();
    }
    file
  }

  #[test]
  fn test_context_window_around_failure() {
    let file = source_file(10);
    let path = file.path().display().to_string();

    let lines = read_context_lines(&path, 5);
    assert_eq!(
      lines,
      vec![
        (3, "line 3".to_string()),
        (4, "line 4".to_string()),
        (5, "line 5".to_string()),
        (6, "line 6".to_string()),
      ]
    );
  }

  #[test]
  fn test_context_window_clipped_at_edges() {
    let file = source_file(3);
    let path = file.path().display().to_string();

    let head: Vec<u32> = read_context_lines(&path, 1).iter().map(|(n, _)| *n).collect();
    assert_eq!(head, vec![1, 2]);

    let tail: Vec<u32> = read_context_lines(&path, 3).iter().map(|(n, _)| *n).collect();
    assert_eq!(tail, vec![1, 2, 3]);
  }

  #[test]
  fn test_missing_source_has_no_context() {
    assert!(read_context_lines("/definitely/not/here.rs", 4).is_empty());
    assert!(read_context_lines("", 4).is_empty());
  }

  #[test]
  fn test_snapshot_frames_order_and_locals() {
    let file = source_file(50);
    let path = file.path().display().to_string();
    let (x, y) = (10, 0);
    let name = "quotient";

    let frames = ManualFrames::new()
      .frame(RawFrame::new(path.clone(), 40, "main"))
      .frame(
        RawFrame::new(path.clone(), 42, "divide")
          .local("x", &x)
          .local("y", &y)
          .local("name", &name),
      );

    let snapshots = snapshot_frames(&frames);
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].function_name(), "main");

    let deepest = &snapshots[1];
    assert_eq!(deepest.function_name(), "divide");
    assert_eq!(deepest.line_number(), 42);
    assert_eq!(deepest.local_variables()["x"], "10");
    assert_eq!(deepest.local_variables()["y"], "0");
    assert_eq!(deepest.local_variables()["name"], "\"quotient\"");
    assert_eq!(
      deepest.code_snippet(),
      "40: line 40\n41: line 41\n42: line 42\n43: line 43"
    );
  }

  #[test]
  fn test_snapshot_serializes_locals_as_strings() {
    let numbers = vec![1, 2, 3];
    let frames = ManualFrames::new().frame(RawFrame::new("gen.rs", 1, "f").local("numbers", &numbers));

    let snapshot = &snapshot_frames(&frames)[0];
    let json = serde_json::to_value(snapshot).unwrap();
    assert_eq!(json["local_variables"]["numbers"], "[1, 2, 3]");
    assert!(snapshot.context_lines().is_empty());
    assert_eq!(snapshot.code_snippet(), "");
  }
}
