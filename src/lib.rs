//! Newline-delimited TCP chat: a session registry keyed by user name, a
//! per-connection command handler, and broadcast/private routing between
//! sessions.

// Error types for startup, per-session I/O and rejected commands.
pub mod error;

// Logging utilities for server lifecycle and message events.
pub mod logger;

// Acceptor, registry, session handler and dispatch.
pub mod server;

// Thin line client used by `line_chat connect`.
pub mod client;

pub use error::{ClientError, CommandError, ServerError, SessionError};
pub use logger::{Logger, init_logger};
pub use server::config::{LoggerConfig, ServerConfig};
pub use server::registry::SessionRegistry;
pub use server::{ChatServer, run_server};
