// Local time formatting for every log line
use chrono::Local;

// Global log level (Error, Warn, Info, Debug, Trace)
use log::LevelFilter;

// Dispatch builder for combining console and file outputs
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};

// JSON envelopes for the structured file output
use serde_json::Value as JsonValue;

use std::{fs, io};

// The global dispatcher can only be installed once per process
use std::sync::OnceLock;

use crate::server::config::LoggerConfig;

/// Cloneable handle over the global `log` facade.
/// Every session task carries one; cloning costs nothing.
#[derive(Clone, Debug)]
pub struct Logger;

impl Logger {
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    pub fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    pub fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    pub fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Path of the log file for `name` inside `dir` (dots become underscores).
pub fn log_file_name(dir: &str, name: &str) -> String {
    let file = format!("{}.log", name.replace('.', "_"));
    if dir.is_empty() {
        file
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file)
    }
}

/// One JSON line for the structured file log. A message that is itself
/// JSON is embedded as an object, anything else as a string.
pub fn json_envelope(timestamp: &str, name: &str, level: log::Level, message: &str) -> JsonValue {
    let message_json: JsonValue = serde_json::from_str(message)
        .unwrap_or_else(|_| JsonValue::String(message.to_string()));

    serde_json::json!({
        "timestamp": timestamp,
        "name":      name,
        "level":     level.to_string(),
        "message":   message_json
    })
}

/// Install the global logger exactly once, according to `cfg`.
/// Later calls (from tests or a second server) get the same handle back
/// and leave the first configuration in place.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    LOGGER
        .get_or_init(|| {
            // Unknown level strings fall back to Info
            let level = cfg.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

            let mut base = Dispatch::new().level(level);

            if cfg.enable_console_log {
                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let colors = ColoredLevelConfig::new()
                    .info(Color::Green)
                    .warn(Color::Yellow)
                    .error(Color::Red)
                    .debug(Color::Blue)
                    .trace(Color::Magenta);

                base = base.chain(
                    Dispatch::new()
                        .format(move |out, message, record| {
                            out.finish(format_args!(
                                "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                                Local::now().format(&datefmt),
                                nm,
                                colors.color(record.level()),
                                message
                            ))
                        })
                        .chain(io::stdout()),
                );
            }

            if cfg.enable_file_log {
                if !cfg.log_file_path.is_empty() {
                    let _ = fs::create_dir_all(&cfg.log_file_path);
                }

                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let enable_json = cfg.enable_json_log;
                let filepath = log_file_name(&cfg.log_file_path, name);

                let log_format_file =
                    move |out: fern::FormatCallback, message: &std::fmt::Arguments, record: &log::Record| {
                        let timestamp = Local::now().format(&datefmt).to_string();
                        if enable_json {
                            let envelope =
                                json_envelope(&timestamp, &nm, record.level(), &message.to_string());
                            out.finish(format_args!("{}", envelope))
                        } else {
                            out.finish(format_args!(
                                "{} - {} - {} - {}",
                                timestamp,
                                nm,
                                record.level(),
                                message
                            ))
                        }
                    };

                // Don't panic on an unwritable path, fall back to a sink
                let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                    Ok(fh) => Box::new(fh),
                    Err(err) => {
                        eprintln!("Warning: could not open log file {}: {}", filepath, err);
                        Box::new(io::sink())
                    }
                };

                base = base.chain(Dispatch::new().format(log_format_file).chain(file_output));
            }

            // Another logger may already be installed (e.g. by a test harness)
            if let Err(e) = base.apply() {
                eprintln!("Warning: logger already initialized: {}", e);
            }

            Logger
        })
        .clone()
}
