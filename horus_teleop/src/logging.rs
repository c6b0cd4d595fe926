//! Logging backend for the supervisor CLI: colorized bracket-tag lines on a
//! TTY stderr, or one JSON object per line behind `--log-format json`,
//! following the node runtime's own `log_info`/`log_warning`/`log_error`
//! coloring convention. Honors `RUST_LOG` for level filtering.

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

struct TeleopLogger {
    format: LogFormat,
}

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: String,
    level: &'a str,
    target: &'a str,
    message: String,
}

impl Log for TeleopLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = io::stderr();
        match self.format {
            LogFormat::Text => {
                let tag = match record.level() {
                    Level::Error => "[ERROR]".red(),
                    Level::Warn => "[WARN]".yellow(),
                    Level::Info => "[INFO]".blue(),
                    Level::Debug => "[DEBUG]".truecolor(128, 128, 128),
                    Level::Trace => "[TRACE]".truecolor(90, 90, 90),
                };
                let _ = writeln!(stderr, "{} {} {}", tag, format!("[{}]", record.target()).cyan(), record.args());
            }
            LogFormat::Json => {
                let line = JsonLine {
                    timestamp: chrono::Local::now().to_rfc3339(),
                    level: record.level().as_str(),
                    target: record.target(),
                    message: record.args().to_string(),
                };
                if let Ok(json) = serde_json::to_string(&line) {
                    let _ = writeln!(stderr, "{}", json);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Installs the global logger. `format` picks text-vs-JSON; the level comes
/// from `RUST_LOG` (default `info`).
pub fn init(format: LogFormat) {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    log::set_max_level(level);
    let _ = log::set_boxed_logger(Box::new(TeleopLogger { format }));
}
