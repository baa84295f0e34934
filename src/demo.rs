//! Sample failures, one per entry point.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;

use clap::ValueEnum;
use color_eyre::{eyre::eyre, Result};
use stacksage::{hook, ManualFrames, RawFrame, Tracer};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Scenario {
  /// Explicit analysis of a returned error, with local variables
  Divide,
  /// An error returned through the `debug` wrapper
  Lookup,
  /// A panic inside a `catch` block
  Parse,
  /// An uncaught panic reported by the installed hook
  Panic,
}

#[derive(Debug)]
pub struct DivisionError {
  numerator: i64,
  line: u32,
}

impl fmt::Display for DivisionError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "cannot divide {} by zero", self.numerator)
  }
}

impl std::error::Error for DivisionError {}

#[derive(Debug)]
pub struct MissingItem(String);

impl fmt::Display for MissingItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "no stock entry for {:?}", self.0)
  }
}

impl std::error::Error for MissingItem {}

fn average(total: i64, count: i64) -> Result<i64, DivisionError> {
  if count == 0 {
    return Err(DivisionError {
      numerator: total,
      line: line!(),
    });
  }
  Ok(total / count)
}

fn stock_level(inventory: &HashMap<&str, u32>, item: &str) -> Result<u32, MissingItem> {
  inventory
    .get(item)
    .copied()
    .ok_or_else(|| MissingItem(item.to_string()))
}

fn parse_port(raw: &str) -> u16 {
  match raw.trim().parse() {
    Ok(port) => port,
    Err(e) => panic!("invalid port {:?}: {}", raw, e),
  }
}

pub fn run(scenario: Scenario, tracer: Arc<Tracer>) -> Result<()> {
  match scenario {
    Scenario::Divide => {
      let samples: Vec<i64> = Vec::new();
      let total: i64 = samples.iter().sum();
      let count = samples.len() as i64;

      if let Err(error) = average(total, count) {
        // Rust frames expose no locals, so hand them over explicitly.
        let frames = ManualFrames::new()
          .frame(RawFrame::new(file!(), line!(), "stacksage::demo::run"))
          .frame(
            RawFrame::new(file!(), error.line, "stacksage::demo::average")
              .local("total", &total)
              .local("count", &count)
              .local("samples", &samples),
          );
        tracer.analyze_with(&error, &frames);
      }
    }
    Scenario::Lookup => {
      let inventory: HashMap<&str, u32> = [("bolt", 120), ("nut", 80)].into_iter().collect();
      tracer.debug(|| stock_level(&inventory, "widget"));
    }
    Scenario::Parse => {
      tracer.catch(|| parse_port("eighty"));
    }
    Scenario::Panic => {
      hook::install(tracer);
      let worker = thread::Builder::new()
        .name("demo-worker".to_string())
        .spawn(|| {
          let readings = vec![3, 1, 4];
          readings[readings.len()]
        })
        .map_err(|e| eyre!("Failed to spawn demo thread: {}", e))?;
      let _ = worker.join();
      hook::uninstall();
    }
  }
  Ok(())
}
