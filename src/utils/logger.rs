// src/utils/logger.rs

use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();
static LOGGER: ConsoleLogger = ConsoleLogger;

struct ConsoleLogger;

/// Installs the stderr logger. Fails if another logger is already set.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
  let _ = START.set(Instant::now());
  log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

fn tag(level: Level) -> &'static str {
  match level {
    Level::Error => "ERROR",
    Level::Warn => "WARN ",
    Level::Info => "INFO ",
    Level::Debug => "DEBUG",
    Level::Trace => "TRACE",
  }
}

impl log::Log for ConsoleLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if self.enabled(record.metadata()) {
      let elapsed = START.get().map_or(0.0, |t| t.elapsed().as_secs_f64());

      // Format: "[  0.012s INFO ] diffbragg::engine: Initialized ..."
      let msg = format!(
        "[{:>8.3}s {}] {}: {}\n",
        elapsed,
        tag(record.level()),
        record.target(),
        record.args()
      );

      // Single write per record so worker threads don't interleave
      let _ = std::io::stderr().lock().write_all(msg.as_bytes());
    }
  }

  fn flush(&self) {
    let _ = std::io::stderr().flush();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_level_tags_align() {
    let levels = [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace];
    assert!(levels.iter().all(|&l| tag(l).len() == 5));
  }
}
