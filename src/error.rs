use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures that stop the server (or never let it start).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to build tokio runtime: {0}")]
    Runtime(String),
}

/// Errors raised while talking to one peer. They never leave the session task.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("read from {addr} failed: {source}")]
    Read {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("write to {addr} failed: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("write to {addr} timed out")]
    WriteTimeout { addr: SocketAddr },
}

/// A rejected command line. `Display` is the exact reply sent back to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Usage: change-userName <newName>")]
    RenameUsage,
    #[error("Usage: send-msg <targetUser> <message>")]
    PrivateUsage,
    #[error("Usage: global-msg <message>")]
    GlobalUsage,
    #[error("Invalid name. Avoid spaces.")]
    InvalidName,
    #[error("Command not recognized. Use: change-userName, send-msg, global-msg, salir")]
    Unknown,
}

/// Failures of the terminal client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
