/// === IMPORTS ===

// Standard library type for holding an IP address and port together.
use std::net::SocketAddr;

// Arc shares each session between its own task and the registry.
// The atomic counter hands out default identities.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// Tokio's non-blocking TCP listener for incoming connections.
use tokio::net::{TcpListener, TcpStream};

// One-to-many channel used here for the shutdown signal.
use tokio::sync::broadcast;
use tokio::time;

/// === MODULES ===

// Settings read from defaults, an optional JSON file and the CLI.
pub mod config;

pub mod command;
pub mod dispatch;
pub mod line_reader;
pub mod registry;
pub mod session;

use crate::error::ServerError;
use crate::logger::Logger;
use crate::server::config::ServerConfig;
use crate::server::registry::SessionRegistry;
use crate::server::session::{Session, SessionHandler};

/// Default identities are `usuario1`, `usuario2`, ...
pub const DEFAULT_IDENTITY_PREFIX: &str = "usuario";

pub fn default_identity(n: u64) -> String {
    format!("{}{}", DEFAULT_IDENTITY_PREFIX, n)
}

/// === ACCEPTOR ===

/// A bound listener plus the shared state every session gets a handle to.
pub struct ChatServer {
    listener: TcpListener,
    registry: SessionRegistry,
    next_identity: AtomicU64,
    config: ServerConfig,
    logger: Logger,
}

impl ChatServer {
    /// Bind the listening socket. Failing here is fatal for the caller.
    pub async fn bind(config: ServerConfig, logger: Logger) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;

        logger.info(&format!("🚀 Chat server listening on {}", addr));

        Ok(ChatServer {
            listener,
            registry: SessionRegistry::new(),
            next_identity: AtomicU64::new(1),
            config,
            logger,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the live registry (the server keeps its own).
    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accept connections until `shutdown_rx` fires. Each connection gets
    /// its own task; nothing here waits on a session.
    pub async fn serve(self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_new_connection(stream, addr).await,
                        // e.g. too many open files: warn, pause briefly, keep going
                        Err(e) => {
                            self.logger.warn(&format!("⚠️ Failed to accept connection: {}", e));
                            time::sleep(self.config.accept_error_backoff()).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    self.logger.info("🧹 Server received shutdown signal.");
                    break;
                }
            }
        }
    }

    /// Next `usuarioN`. The counter only moves forward, so a number is never
    /// handed out twice.
    fn next_default_identity(&self) -> String {
        default_identity(self.next_identity.fetch_add(1, Ordering::SeqCst))
    }

    async fn handle_new_connection(&self, stream: TcpStream, addr: SocketAddr) {
        // Small lines should leave immediately
        if let Err(e) = stream.set_nodelay(true) {
            self.logger.warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", addr, e));
        }

        let (reader_half, writer_half) = stream.into_split();
        let session = Arc::new(Session::new(
            addr,
            self.next_default_identity(),
            Box::new(writer_half),
            self.config.write_timeout(),
        ));

        // A peer may have renamed itself to a future default name; skip it.
        while !self.registry.try_insert(&session.identity(), session.clone()).await {
            let taken = session.identity();
            session.set_identity(&self.next_default_identity());
            self.logger
                .debug(&format!("{} already taken, trying {}", taken, session.identity()));
        }

        self.logger.info(&format!(
            "🔌 {} connected as {}. Active sessions: {}",
            addr,
            session.identity(),
            self.registry.len().await
        ));

        let handler = SessionHandler::new(
            session,
            reader_half,
            self.registry.clone(),
            self.config.atomic_rename,
            self.logger.clone(),
        );
        tokio::spawn(handler.run());
    }
}

/// Bind, install the Ctrl+C listener and accept until it fires.
pub async fn run_server(config: ServerConfig, logger: Logger) -> Result<(), ServerError> {
    let server = ChatServer::bind(config, logger.clone()).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let shutdown_handle = spawn_shutdown_listener(shutdown_tx, logger);

    server.serve(shutdown_rx).await;

    shutdown_handle.abort();
    Ok(())
}

/// Waits for Ctrl+C, then broadcasts the shutdown signal.
fn spawn_shutdown_listener(
    shutdown_tx: broadcast::Sender<()>,
    logger: Logger,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            logger.error(&format!("Failed to listen for ctrl_c: {}", e));
            return;
        }
        logger.warn("🛑 Ctrl+C received — shutting down.");
        let _ = shutdown_tx.send(());
    })
}
