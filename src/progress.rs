//! Background progress indication while a slow call is in flight.
//!
//! A [`Spinner`] redraws one status line from its own thread until stopped.
//! [`ProgressGuard`] ties the spinner's lifetime to a scope so it is stopped on
//! every exit path, including unwinding.

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest `stop()` will wait for the background thread to finish.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(500);

const TICK: Duration = Duration::from_millis(100);
const GLYPHS: [char; 8] = ['⣾', '⣽', '⣻', '⢿', '⡿', '⣟', '⣯', '⣷'];

/// A cancellable indication that work is in progress.
pub trait ProgressSignal: Send {
  /// Begin indicating progress. Starting twice is a no-op.
  fn start(&mut self);

  /// Stop and clean up. Never blocks longer than [`STOP_TIMEOUT`];
  /// stopping when not started is a no-op.
  fn stop(&mut self);
}

/// Signal that shows nothing.
#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressSignal for NoopProgress {
  fn start(&mut self) {}

  fn stop(&mut self) {}
}

/// Shared output stream of a spinner.
pub type SharedOutput = Arc<Mutex<Box<dyn Write + Send>>>;

struct Worker {
  stop: Arc<AtomicBool>,
  done: mpsc::Receiver<()>,
  handle: JoinHandle<()>,
}

/// Terminal spinner drawn from a background thread.
pub struct Spinner {
  message: String,
  output: SharedOutput,
  worker: Option<Worker>,
}

impl Spinner {
  /// Spinner drawing on stderr.
  pub fn new(message: impl Into<String>) -> Self {
    Self::with_output(message, Box::new(io::stderr()))
  }

  /// Spinner drawing on an arbitrary stream.
  pub fn with_output(message: impl Into<String>, output: Box<dyn Write + Send>) -> Self {
    Self {
      message: message.into(),
      output: Arc::new(Mutex::new(output)),
      worker: None,
    }
  }

  pub fn is_running(&self) -> bool {
    self.worker.is_some()
  }

  fn clear_line(&self) {
    if let Ok(mut out) = self.output.lock() {
      let _ = out
        .queue(MoveToColumn(0))
        .and_then(|out| out.queue(Clear(ClearType::CurrentLine)))
        .and_then(|out| out.flush());
    }
  }
}

fn spin(message: String, output: SharedOutput, stop: Arc<AtomicBool>, done: mpsc::Sender<()>) {
  let started = Instant::now();
  let mut glyphs = GLYPHS.iter().cycle();

  while !stop.load(Ordering::Acquire) {
    let glyph = glyphs.next().copied().unwrap_or(' ');
    let line = format!(
      "{} {} {:.1}s",
      message,
      glyph,
      started.elapsed().as_secs_f64()
    );
    if let Ok(mut out) = output.lock() {
      let _ = out
        .queue(MoveToColumn(0))
        .and_then(|out| out.queue(Clear(ClearType::CurrentLine)))
        .and_then(|out| out.queue(Print(line.cyan())))
        .and_then(|out| out.flush());
    }
    thread::park_timeout(TICK);
  }

  let _ = done.send(());
}

impl ProgressSignal for Spinner {
  fn start(&mut self) {
    if self.worker.is_some() {
      return;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel();
    let message = self.message.clone();
    let output = Arc::clone(&self.output);
    let thread_stop = Arc::clone(&stop);

    let spawned = thread::Builder::new()
      .name("stacksage-spinner".to_string())
      .spawn(move || spin(message, output, thread_stop, done_tx));

    match spawned {
      Ok(handle) => {
        self.worker = Some(Worker {
          stop,
          done: done_rx,
          handle,
        })
      }
      Err(e) => debug!(error = %e, "could not start spinner thread"),
    }
  }

  fn stop(&mut self) {
    let Some(worker) = self.worker.take() else {
      return;
    };

    worker.stop.store(true, Ordering::Release);
    worker.handle.thread().unpark();

    match worker.done.recv_timeout(STOP_TIMEOUT) {
      Ok(()) | Err(RecvTimeoutError::Disconnected) => {
        let _ = worker.handle.join();
      }
      Err(RecvTimeoutError::Timeout) => {
        debug!("spinner thread did not stop in time, detaching");
      }
    }

    self.clear_line();
  }
}

impl Drop for Spinner {
  fn drop(&mut self) {
    self.stop();
  }
}

/// Runs a progress signal for the lifetime of the guard.
pub struct ProgressGuard<'a> {
  signal: &'a mut dyn ProgressSignal,
}

impl<'a> ProgressGuard<'a> {
  pub fn start(signal: &'a mut dyn ProgressSignal) -> Self {
    signal.start();
    Self { signal }
  }
}

impl Drop for ProgressGuard<'_> {
  fn drop(&mut self) {
    self.signal.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::panic::{self, AssertUnwindSafe};

  #[derive(Clone, Default)]
  struct Capture(Arc<Mutex<Vec<u8>>>);

  impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  impl Capture {
    fn text(&self) -> String {
      String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
  }

  #[derive(Default)]
  struct Counting {
    starts: usize,
    stops: usize,
  }

  impl ProgressSignal for Counting {
    fn start(&mut self) {
      self.starts += 1;
    }

    fn stop(&mut self) {
      self.stops += 1;
    }
  }

  #[test]
  fn test_stop_before_start_is_noop() {
    let capture = Capture::default();
    let mut spinner = Spinner::with_output("Working", Box::new(capture.clone()));

    let started = Instant::now();
    spinner.stop();
    spinner.stop();

    assert!(started.elapsed() < STOP_TIMEOUT);
    assert!(capture.text().is_empty());
  }

  #[test]
  fn test_spinner_draws_and_clears() {
    let capture = Capture::default();
    let mut spinner = Spinner::with_output("AI Analysis running...", Box::new(capture.clone()));

    spinner.start();
    assert!(spinner.is_running());
    thread::sleep(Duration::from_millis(250));

    let started = Instant::now();
    spinner.stop();
    assert!(started.elapsed() <= STOP_TIMEOUT + Duration::from_millis(100));
    assert!(!spinner.is_running());

    let text = capture.text();
    assert!(text.contains("AI Analysis running..."));
    // The last thing written erases the line: carriage to column 0, then clear.
    assert!(text.ends_with("\x1b[1G\x1b[2K"));

    // A second stop does nothing more.
    let len = text.len();
    spinner.stop();
    assert_eq!(capture.text().len(), len);
  }

  #[test]
  fn test_double_start_keeps_one_worker() {
    let mut spinner = Spinner::with_output("x", Box::new(Capture::default()));
    spinner.start();
    spinner.start();
    spinner.stop();
    assert!(!spinner.is_running());
  }

  #[test]
  fn test_drop_stops_spinner() {
    let capture = Capture::default();
    {
      let mut spinner = Spinner::with_output("x", Box::new(capture.clone()));
      spinner.start();
    }
    assert!(capture.text().ends_with("\x1b[1G\x1b[2K"));
  }

  #[test]
  fn test_guard_stops_on_unwind() {
    let mut signal = Counting::default();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
      let _guard = ProgressGuard::start(&mut signal);
      panic!("provider blew up");
    }));

    assert!(outcome.is_err());
    assert_eq!(signal.starts, 1);
    assert_eq!(signal.stops, 1);
  }

  #[test]
  fn test_guard_stops_on_normal_exit() {
    let mut signal = Counting::default();
    {
      let _guard = ProgressGuard::start(&mut signal);
    }
    assert_eq!((signal.starts, signal.stops), (1, 1));
  }
}
