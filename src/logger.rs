//! Logging. Plain stdout logger colored by level, timestamped, with a
//! `target`-keyed column so peering/RIB/xDS/dispatcher output is easy to
//! tell apart in a single stream.
use std::io::{self, Write};

use chrono::prelude::*;
use colored::*;
use log::{Level, Log, Metadata, Record, SetLoggerError};

struct Logger {
    level: Level,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let target = record.target();
            let message = format!("{:<5} {:<12} {}", record.level(), target.cyan(), record.args());
            let message = format!(
                "{} {}",
                Local::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                message,
            );
            let message = match record.level() {
                Level::Error => message.red(),
                Level::Warn => message.yellow(),
                Level::Info => message.normal(),
                Level::Debug => message.dimmed(),
                Level::Trace => message.white().dimmed(),
            };
            writeln!(io::stdout(), "{message}").expect("write shouldn't fail");
        }
    }

    fn flush(&self) {}
}

/// Install this logger as the global `log` backend.
pub fn init(level: Level) -> Result<(), SetLoggerError> {
    let logger = Logger { level };
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}

/// `RUST_LOG`, parsed as a [`Level`], if set and valid.
pub fn env_level() -> Option<Level> {
    std::env::var("RUST_LOG").ok()?.parse().ok()
}
