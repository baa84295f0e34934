//! Bounded, panic-safe rendering of captured values.

use std::any::Any;
use std::fmt::{self, Write};
use std::panic::{self, AssertUnwindSafe};

/// Maximum rendered length of a local variable, in characters.
pub const MAX_VALUE_LEN: usize = 100;

const ELLIPSIS: &str = "...";

/// Writer that keeps at most `limit` characters and fails once it would exceed it,
/// so an enormous `Debug` impl is cut short instead of formatted in full.
struct BoundedWriter {
  buf: String,
  len: usize,
  limit: usize,
  overflowed: bool,
}

impl BoundedWriter {
  fn new(limit: usize) -> Self {
    Self {
      buf: String::new(),
      len: 0,
      limit,
      overflowed: false,
    }
  }
}

impl Write for BoundedWriter {
  fn write_str(&mut self, s: &str) -> fmt::Result {
    for c in s.chars() {
      if self.len == self.limit {
        self.overflowed = true;
        return Err(fmt::Error);
      }
      self.buf.push(c);
      self.len += 1;
    }
    Ok(())
  }
}

/// Render a value with its `Debug` impl, truncated to [`MAX_VALUE_LEN`] characters.
///
/// Never panics: a `Debug` impl that panics or reports a formatting error is
/// replaced by a placeholder naming the value's type and the failure.
pub fn render_value(value: &dyn fmt::Debug, type_name: &str) -> String {
  let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
    let mut writer = BoundedWriter::new(MAX_VALUE_LEN);
    let status = fmt::write(&mut writer, format_args!("{:?}", value));
    (writer, status)
  }));

  match rendered {
    Ok((writer, _)) if writer.overflowed => cut(&writer.buf, MAX_VALUE_LEN),
    Ok((writer, Ok(()))) => writer.buf,
    Ok((_, Err(_))) => unprintable(type_name, "formatter returned an error"),
    Err(payload) => unprintable(type_name, &panic_message(payload.as_ref())),
  }
}

fn unprintable(type_name: &str, reason: &str) -> String {
  truncate(
    &format!("<unprintable value of type {}>: {}", type_name, reason),
    MAX_VALUE_LEN,
  )
}

/// Truncate to at most `max` characters, ending in an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    return s.to_string();
  }
  cut(s, max)
}

fn cut(s: &str, max: usize) -> String {
  let keep = max.saturating_sub(ELLIPSIS.len());
  let mut out: String = s.chars().take(keep).collect();
  out.push_str(ELLIPSIS);
  out
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "Box<dyn Any>".to_string()
  }
}
