// Standard library types for the peer address and shared ownership
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

// Tokio's async read/write traits
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

// Async-aware lock so one complete line is written at a time
use tokio::sync::{Mutex, Notify};
use tokio::time::{self, Duration};

// Reference-counted byte buffer: one allocation shared by every recipient
use bytes::Bytes;

use std::borrow::Cow;

use crate::error::{CommandError, SessionError};
use crate::logger::Logger;
use crate::server::command::{self, Command};
use crate::server::dispatch::{self, Delivery};
use crate::server::line_reader::LineReader;
use crate::server::registry::{RenameOutcome, SessionRegistry};

/// Outbound half of a connection. Boxed so tests can swap in an in-memory pipe.
pub type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// === SESSION ===

/// One live connection as seen by the rest of the server.
///
/// The identity changes on rename; the writer never does. Writers from any
/// task go through [`Session::send_line`], which holds the writer lock for
/// exactly one line.
pub struct Session {
    addr: SocketAddr,
    identity: StdRwLock<String>,
    writer: Mutex<LineWriter>,
    write_timeout: Option<Duration>,
    closed: AtomicBool,
    // Set when a write timed out and may have left half a line behind.
    broken: AtomicBool,
    broken_notify: Notify,
}

impl Session {
    pub fn new(
        addr: SocketAddr,
        identity: impl Into<String>,
        writer: LineWriter,
        write_timeout: Option<Duration>,
    ) -> Self {
        Session {
            addr,
            identity: StdRwLock::new(identity.into()),
            writer: Mutex::new(writer),
            write_timeout,
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            broken_notify: Notify::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn identity(&self) -> String {
        match self.identity.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_identity(&self, name: &str) {
        let mut guard = match self.identity.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = name.to_string();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write `text` followed by a newline as one uninterrupted unit.
    pub async fn send_line(&self, text: &str) -> Result<(), SessionError> {
        let line = Bytes::from(ensure_trailing_newline(text).into_owned());
        self.send_bytes(&line).await
    }

    /// Write an already newline-terminated line. Used by broadcasts so the
    /// payload is built once for every recipient.
    pub async fn send_bytes(&self, line: &Bytes) -> Result<(), SessionError> {
        if self.is_closed() || self.broken.load(Ordering::SeqCst) {
            return Err(SessionError::Write {
                addr: self.addr,
                source: std::io::ErrorKind::BrokenPipe.into(),
            });
        }

        let mut w = self.writer.lock().await;
        let write = async {
            w.write_all(line).await?;
            w.flush().await?;
            Ok::<(), std::io::Error>(())
        };

        let result = match self.write_timeout {
            Some(limit) => match time::timeout(limit, write).await {
                Ok(result) => result,
                Err(_) => {
                    self.mark_broken();
                    return Err(SessionError::WriteTimeout { addr: self.addr });
                }
            },
            None => write.await,
        };

        result.map_err(|source| SessionError::Write {
            addr: self.addr,
            source,
        })
    }

    /// Refuse further writes and wake the session's own read loop so it
    /// tears down.
    fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            self.broken_notify.notify_one();
        }
    }

    /// Resolves once a write to this session has timed out.
    async fn broken(&self) {
        if self.broken.load(Ordering::SeqCst) {
            return;
        }
        self.broken_notify.notified().await;
    }

    /// Flip to closed. Only the first caller gets `true`.
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Shut the write direction down. Errors are irrelevant at this point.
    async fn close(&self) {
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
    }
}

/// Ensures the string ends with exactly one newline (`\n`).
/// Borrows when the newline is already there.
pub fn ensure_trailing_newline(s: &str) -> Cow<'_, str> {
    if s.ends_with('\n') {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{s}\n"))
    }
}

/// === HANDLER ===

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Eof,
    Error,
}

/// Owns one connection's lifecycle: welcome, read loop, teardown.
pub struct SessionHandler<R> {
    session: Arc<Session>,
    lines: LineReader<R>,
    registry: SessionRegistry,
    atomic_rename: bool,
    logger: Logger,
}

impl<R> SessionHandler<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// `session` must already be registered under its identity.
    pub fn new(
        session: Arc<Session>,
        reader: R,
        registry: SessionRegistry,
        atomic_rename: bool,
        logger: Logger,
    ) -> Self {
        SessionHandler {
            session,
            lines: LineReader::new(reader),
            registry,
            atomic_rename,
            logger,
        }
    }

    /// Runs until the peer quits, hangs up or fails, then tears down once.
    pub async fn run(mut self) -> ExitReason {
        let reason = match self.serve().await {
            Ok(reason) => reason,
            Err(e) => {
                self.logger.warn(&format!(
                    "❌ Session {} ended with an error: {}",
                    self.session.identity(),
                    e
                ));
                ExitReason::Error
            }
        };

        self.teardown(reason).await;
        reason
    }

    async fn serve(&mut self) -> Result<ExitReason, SessionError> {
        let name = self.session.identity();
        self.session
            .send_line(&format!("Welcome. Your temporary username is '{}'.", name))
            .await?;
        dispatch::broadcast_except(
            &self.registry,
            &format!("{} has joined the chat.", name),
            &self.session,
            &self.logger,
        )
        .await;

        loop {
            let read = tokio::select! {
                read = self.lines.next_line() => read,
                _ = self.session.broken() => {
                    return Err(SessionError::WriteTimeout { addr: self.session.addr() });
                }
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(ExitReason::Eof),
                Err(source) => {
                    return Err(SessionError::Read {
                        addr: self.session.addr(),
                        source,
                    });
                }
            };

            if command::is_quit(&line) {
                return Ok(ExitReason::Quit);
            }

            self.handle_line(&line).await?;
        }
    }

    /// Parse and execute one non-terminating line.
    pub async fn handle_line(&self, line: &str) -> Result<(), SessionError> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return self.reply_error(e).await,
        };

        match command {
            Command::Rename { name } => self.rename(name).await,
            Command::Private { target, body } => self.private(target, body).await,
            Command::Global { body } => self.global(body).await,
            // Filtered out by the read loop; a stray one is a no-op.
            Command::Quit => Ok(()),
        }
    }

    async fn reply_error(&self, error: CommandError) -> Result<(), SessionError> {
        self.logger
            .debug(&format!("{} sent a rejected line: {}", self.session.identity(), error));
        self.session.send_line(&error.to_string()).await
    }

    async fn rename(&self, new_name: &str) -> Result<(), SessionError> {
        match self.registry.rename(&self.session, new_name, self.atomic_rename).await {
            RenameOutcome::Taken => {
                self.session
                    .send_line(&format!("The name '{}' is already in use.", new_name))
                    .await
            }
            RenameOutcome::Renamed { old } => {
                self.logger.info(&format!("✏️ {} renamed to {}", old, new_name));
                self.session
                    .send_line(&format!("Your name is now: {}", new_name))
                    .await?;
                dispatch::broadcast_except(
                    &self.registry,
                    &format!("User {} is now known as {}", old, new_name),
                    &self.session,
                    &self.logger,
                )
                .await;
                Ok(())
            }
        }
    }

    async fn private(&self, target: &str, body: &str) -> Result<(), SessionError> {
        match dispatch::send_private(&self.registry, &self.session, target, body, &self.logger).await {
            Delivery::NotFound => {
                self.session
                    .send_line(&format!("User not found: {}", target))
                    .await
            }
            Delivery::Delivered => {
                self.session
                    .send_line(&format!("Message sent to {}: {}", target, body))
                    .await
            }
        }
    }

    async fn global(&self, body: &str) -> Result<(), SessionError> {
        let sender = self.session.identity();
        let reached = dispatch::broadcast_except(
            &self.registry,
            &format!("[{}]: {}", sender, body),
            &self.session,
            &self.logger,
        )
        .await;
        self.logger
            .info(&format!("📣 Global {} ({} recipients): {}", sender, reached, body));
        self.session.send_line("Global message sent.").await
    }

    /// Deregister, announce, close. Runs at most once per session no
    /// matter how many exit paths reach it.
    async fn teardown(&self, reason: ExitReason) {
        if !self.session.mark_closed() {
            return;
        }

        let name = self.session.identity();
        self.registry.remove_session(&self.session).await;
        dispatch::broadcast_except(
            &self.registry,
            &format!("{} has left the chat.", name),
            &self.session,
            &self.logger,
        )
        .await;
        self.session.close().await;

        self.logger.info(&format!(
            "🔌 Client disconnected: {} from {} ({:?})",
            name,
            self.session.addr(),
            reason
        ));
    }
}

#[cfg(test)]
pub(crate) fn test_session(name: &str) -> (Arc<Session>, tokio::io::DuplexStream) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let session = Session::new(addr, name, Box::new(ours), Some(Duration::from_secs(1)));
    (Arc::new(session), theirs)
}
