// Serde lets us read the settings from an optional JSON file
use serde::Deserialize;

// File access and path handling for `--config <path>`
use std::fs;
use std::path::Path;

// We need Duration to turn milliseconds into a Rust time value
use std::time::Duration;

use crate::error::ServerError;

//////////////////////
// LoggerConfig     //
//////////////////////

/// Where log lines go and how they look
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level: "error", "warn", "info", "debug" or "trace"
    pub log_level: String,

    /// Write colored lines to stdout
    pub enable_console_log: bool,

    /// Also write lines to `<log_file_path>/<name>.log`
    pub enable_file_log: bool,

    /// Directory for the log file; empty means the working directory
    pub log_file_path: String,

    /// Emit one JSON envelope per line in the file instead of plain text
    pub enable_json_log: bool,

    /// chrono format string used for timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            log_level: "info".to_string(),
            enable_console_log: true,
            enable_file_log: false,
            log_file_path: String::new(),
            enable_json_log: false,
            date_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// All the settings the chat server needs
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP or hostname to listen on (e.g. `"0.0.0.0"`)
    pub host: String,

    /// Port number (e.g. `8080`)
    pub port: u16,

    /// How many Tokio worker threads to spin up (defaults to cpu-1)
    pub worker_threads: usize,

    /// Milliseconds to sleep after a failed accept
    pub accept_error_backoff_ms: u64,

    /// Milliseconds one outbound line may block before it is dropped; 0 disables
    pub write_timeout_ms: u64,

    /// Check-and-move renames under a single registry lock
    pub atomic_rename: bool,

    /// Logging settings
    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            // Default worker threads = #cores minus one, but at least one
            worker_threads: num_cpus::get().saturating_sub(1).max(1),
            accept_error_backoff_ms: 100,
            write_timeout_ms: 5_000,
            atomic_rename: false,
            logger: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a JSON document; keys that are missing keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ServerError> {
        let config: ServerConfig =
            serde_json::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::Config("host must not be empty".into()));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// The "host:port" string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        match self.write_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn accept_error_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_error_backoff_ms)
    }
}
