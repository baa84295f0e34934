//! Presentation of analysis reports.

use crossterm::style::{StyledContent, Stylize};
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;

use crate::analysis::AnalysisResult;
use crate::capture::FrameSnapshot;

/// Verbosity levels understood by printers.
pub const MINIMAL: u8 = 0;
pub const NORMAL: u8 = 1;
pub const DETAILED: u8 = 2;

const RULE_WIDTH: usize = 80;

/// Sink for human-readable output.
pub trait Printer: Send + Sync {
  /// Print `message` if the printer's verbosity is at least `min_verbosity`.
  fn print(&self, message: &str, min_verbosity: u8);

  /// Whether messages may carry terminal styling.
  fn colored(&self) -> bool {
    false
  }
}

/// Prints to stderr (or any stream), styled when it is a terminal.
pub struct ConsolePrinter {
  verbosity: u8,
  colored: bool,
  out: Mutex<Box<dyn Write + Send>>,
}

impl ConsolePrinter {
  pub fn new(verbosity: u8) -> Self {
    Self {
      verbosity,
      colored: io::stderr().is_terminal(),
      out: Mutex::new(Box::new(io::stderr())),
    }
  }

  /// Unstyled printer writing to `out`.
  pub fn with_output(verbosity: u8, out: Box<dyn Write + Send>) -> Self {
    Self {
      verbosity,
      colored: false,
      out: Mutex::new(out),
    }
  }

  pub fn verbosity(&self) -> u8 {
    self.verbosity
  }
}

impl Printer for ConsolePrinter {
  fn print(&self, message: &str, min_verbosity: u8) {
    if self.verbosity < min_verbosity {
      return;
    }
    // A poisoned lock only means another thread panicked mid-write.
    let mut out = match self.out.lock() {
      Ok(out) => out,
      Err(poisoned) => poisoned.into_inner(),
    };
    let _ = out.write_all(message.as_bytes());
    let _ = out.flush();
  }

  fn colored(&self) -> bool {
    self.colored
  }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopPrinter;

impl Printer for NoopPrinter {
  fn print(&self, _message: &str, _min_verbosity: u8) {}
}

fn paint(
  printer: &dyn Printer,
  text: impl Into<String>,
  style: impl FnOnce(StyledContent<String>) -> StyledContent<String>,
) -> String {
  let text = text.into();
  if printer.colored() {
    style(text.stylize()).to_string()
  } else {
    text
  }
}

fn rule(printer: &dyn Printer) -> String {
  paint(printer, "=".repeat(RULE_WIDTH), |s| s.red().bold())
}

pub fn print_header(printer: &dyn Printer, kind: &str, message: &str) {
  let title = paint(printer, format!(" {}: {}", kind, message), |s| s.red().bold());
  let rule = rule(printer);
  printer.print(&format!("{}\n{}\n{}\n", rule, title, rule), MINIMAL);
}

/// Print the stack, outermost frame first.
pub fn print_frames(printer: &dyn Printer, frames: &[FrameSnapshot]) {
  printer.print(
    &format!(
      "{}\n",
      paint(printer, "Stack Trace: (most recent call last)", |s| s.bold())
    ),
    MINIMAL,
  );
  let total = frames.len();
  for (i, frame) in frames.iter().enumerate() {
    print_frame(printer, i + 1, total, frame);
  }
}

fn print_frame(printer: &dyn Printer, index: usize, total: usize, frame: &FrameSnapshot) {
  printer.print(
    &format!(
      "Frame{}, file {}, line {}, in {}\n",
      paint(printer, format!("[{}/{}]", index, total), |s| s.blue().bold()),
      paint(printer, format!("\"{}\"", frame.source_location()), |s| s.bold()),
      paint(printer, frame.line_number().to_string(), |s| s.bold()),
      paint(printer, frame.function_name(), |s| s.cyan().bold()),
    ),
    MINIMAL,
  );

  for (number, text) in frame.context_lines() {
    let line = if *number == frame.line_number() {
      paint(printer, format!("  > {}: {}", number, text), |s| s.red())
    } else {
      format!("    {}: {}", number, text)
    };
    printer.print(&format!("{}\n", line), MINIMAL);
  }

  if !frame.local_variables().is_empty() {
    printer.print(
      &format!("\n  {}\n", paint(printer, "Local variables:", |s| s.yellow())),
      DETAILED,
    );
    for (name, value) in frame.local_variables() {
      printer.print(
        &format!("    {} = {}\n", paint(printer, name.as_str(), |s| s.bold()), value),
        DETAILED,
      );
    }
  }

  printer.print("\n", MINIMAL);
}

pub fn print_analysis(printer: &dyn Printer, result: &AnalysisResult) {
  printer.print(
    &format!(
      "\n{}\n{}\n",
      paint(printer, "Analysis:", |s| s.blue().bold()),
      result.explanation
    ),
    MINIMAL,
  );
  printer.print(
    &format!(
      "\n{}\n{}\n",
      paint(printer, "Suggested Fix:", |s| s.green().bold()),
      result.suggested_fix
    ),
    MINIMAL,
  );
}

pub fn print_footer(printer: &dyn Printer) {
  let rule = rule(printer);
  let end = paint(printer, "End of Traceback", |s| s.red().bold());
  printer.print(&format!("{}\n{}\n{}\n", rule, end, rule), MINIMAL);
}

/// Informational line, e.g. cache activity or timings.
pub fn print_note(printer: &dyn Printer, message: &str, min_verbosity: u8) {
  printer.print(
    &format!("{}\n", paint(printer, message, |s| s.cyan())),
    min_verbosity,
  );
}

/// A degraded path the user should know about; always shown.
pub fn print_warning(printer: &dyn Printer, message: &str) {
  printer.print(
    &format!("{}\n", paint(printer, message, |s| s.yellow())),
    MINIMAL,
  );
}

/// Collects printed output; shared by tests across the crate.
#[cfg(test)]
pub(crate) struct BufferPrinter {
  verbosity: u8,
  buffer: Mutex<String>,
}

#[cfg(test)]
impl BufferPrinter {
  pub(crate) fn new(verbosity: u8) -> Self {
    Self {
      verbosity,
      buffer: Mutex::new(String::new()),
    }
  }

  pub(crate) fn text(&self) -> String {
    self.buffer.lock().unwrap().clone()
  }
}

#[cfg(test)]
impl Printer for BufferPrinter {
  fn print(&self, message: &str, min_verbosity: u8) {
    if self.verbosity >= min_verbosity {
      self.buffer.lock().unwrap().push_str(message);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use std::sync::Arc;

  fn frame() -> FrameSnapshot {
    let mut locals = BTreeMap::new();
    locals.insert("divisor".to_string(), "0".to_string());
    FrameSnapshot::new(
      "src/math.rs",
      12,
      "divide",
      vec![
        (10, "fn divide(a: i32, divisor: i32) -> i32 {".to_string()),
        (11, "  let scaled = a * 2;".to_string()),
        (12, "  scaled / divisor".to_string()),
        (13, "}".to_string()),
      ],
      locals,
    )
  }

  #[test]
  fn test_frame_layout_marks_failure_line() {
    let printer = BufferPrinter::new(DETAILED);
    print_frames(&printer, &[frame()]);

    let text = printer.text();
    assert!(text.starts_with("Stack Trace: (most recent call last)\n"));
    assert!(text.contains("Frame[1/1], file \"src/math.rs\", line 12, in divide\n"));
    assert!(text.contains("  > 12:   scaled / divisor\n"));
    assert!(text.contains("    11:   let scaled = a * 2;\n"));
    assert!(text.contains("Local variables:"));
    assert!(text.contains("    divisor = 0\n"));
  }

  #[test]
  fn test_locals_hidden_below_detailed() {
    let printer = BufferPrinter::new(NORMAL);
    print_frames(&printer, &[frame()]);

    let text = printer.text();
    assert!(text.contains("in divide"));
    assert!(!text.contains("Local variables:"));
  }

  #[test]
  fn test_minimal_still_shows_analysis() {
    let printer = BufferPrinter::new(MINIMAL);
    print_note(&printer, "Using cached AI response", DETAILED);
    print_analysis(&printer, &AnalysisResult::new("It divides by zero.", "Check the divisor."));
    print_footer(&printer);

    let text = printer.text();
    assert!(!text.contains("cached"));
    assert!(text.contains("Analysis:\nIt divides by zero.\n"));
    assert!(text.contains("Suggested Fix:\nCheck the divisor.\n"));
    assert!(text.contains("End of Traceback"));
  }

  #[test]
  fn test_header_is_framed_by_rules() {
    let printer = BufferPrinter::new(MINIMAL);
    print_header(&printer, "ParseIntError", "invalid digit found in string");

    let rule = "=".repeat(80);
    assert_eq!(
      printer.text(),
      format!("{}\n ParseIntError: invalid digit found in string\n{}\n", rule, rule)
    );
  }

  #[derive(Clone, Default)]
  struct Shared(Arc<Mutex<Vec<u8>>>);

  impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  #[test]
  fn test_console_printer_filters_by_verbosity() {
    let shared = Shared::default();
    let printer = ConsolePrinter::with_output(NORMAL, Box::new(shared.clone()));

    printer.print("shown\n", MINIMAL);
    printer.print("also shown\n", NORMAL);
    printer.print("hidden\n", DETAILED);

    let text = String::from_utf8(shared.0.lock().unwrap().clone()).unwrap();
    assert_eq!(text, "shown\nalso shown\n");
    assert!(!printer.colored());
  }
}
