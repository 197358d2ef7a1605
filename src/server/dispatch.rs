//! Routing of global and private messages through the registry.

use std::sync::Arc;

use bytes::Bytes;

use crate::logger::Logger;
use crate::server::registry::SessionRegistry;
use crate::server::session::{Session, ensure_trailing_newline};

/// Whether a private message found its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    NotFound,
}

/// Sends `text` to every registered session except `excluded`.
///
/// Works on a snapshot taken under a short read lock; sessions that join or
/// leave while we iterate may or may not get the line. Writes go out one
/// recipient at a time so each recipient sees lines in the order they were
/// sent. A failing recipient is logged and skipped.
///
/// Returns how many sessions accepted the line.
pub async fn broadcast_except(
    registry: &SessionRegistry,
    text: &str,
    excluded: &Arc<Session>,
    logger: &Logger,
) -> usize {
    let snapshot: Vec<Arc<Session>> = registry
        .snapshot()
        .await
        .into_iter()
        .filter(|s| !Arc::ptr_eq(s, excluded))
        .collect();

    // Build the line once; every recipient shares the same buffer
    let line = Bytes::from(ensure_trailing_newline(text).into_owned());

    let mut delivered = 0;
    for session in snapshot {
        match session.send_bytes(&line).await {
            Ok(()) => delivered += 1,
            Err(e) => logger.warn(&format!(
                "❌ Failed to send to {}: {}",
                session.identity(),
                e
            )),
        }
    }
    delivered
}

/// Delivers `[private from <sender>]: <body>` to `target` only.
pub async fn send_private(
    registry: &SessionRegistry,
    sender: &Arc<Session>,
    target: &str,
    body: &str,
    logger: &Logger,
) -> Delivery {
    let Some(recipient) = registry.get(target).await else {
        return Delivery::NotFound;
    };

    let from = sender.identity();
    if let Err(e) = recipient
        .send_line(&format!("[private from {}]: {}", from, body))
        .await
    {
        logger.warn(&format!("❌ Failed to deliver private message to {}: {}", target, e));
    }
    logger.info(&format!("📨 Private {} -> {}: {}", from, target, body));

    Delivery::Delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::test_session;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::time::{Duration, timeout};

    async fn drain(rx: &mut DuplexStream) -> String {
        let mut buf = vec![0u8; 4096];
        match timeout(Duration::from_millis(100), rx.read(&mut buf)).await {
            Ok(Ok(n)) => String::from_utf8_lossy(&buf[..n]).into_owned(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_the_excluded_session() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = test_session("alice");
        let (b, mut b_rx) = test_session("bob");
        let (c, mut c_rx) = test_session("carol");
        for s in [&a, &b, &c] {
            registry.insert(&s.identity(), s.clone()).await;
        }

        let reached = broadcast_except(&registry, "[alice]: hi", &a, &Logger).await;
        assert_eq!(reached, 2);
        assert_eq!(drain(&mut a_rx).await, "");
        assert_eq!(drain(&mut b_rx).await, "[alice]: hi\n");
        assert_eq!(drain(&mut c_rx).await, "[alice]: hi\n");
    }

    #[tokio::test]
    async fn broadcast_survives_a_dead_recipient() {
        let registry = SessionRegistry::new();
        let (a, _a_rx) = test_session("alice");
        let (b, b_rx) = test_session("bob");
        let (c, mut c_rx) = test_session("carol");
        for s in [&a, &b, &c] {
            registry.insert(&s.identity(), s.clone()).await;
        }
        drop(b_rx);

        let reached = broadcast_except(&registry, "still here", &a, &Logger).await;
        assert_eq!(reached, 1);
        assert_eq!(drain(&mut c_rx).await, "still here\n");
    }

    #[tokio::test]
    async fn private_reaches_only_the_target() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = test_session("usuario2");
        let (b, mut b_rx) = test_session("alice");
        let (c, mut c_rx) = test_session("carol");
        for s in [&a, &b, &c] {
            registry.insert(&s.identity(), s.clone()).await;
        }

        let outcome = send_private(&registry, &a, "alice", "hello", &Logger).await;
        assert_eq!(outcome, Delivery::Delivered);
        assert_eq!(drain(&mut b_rx).await, "[private from usuario2]: hello\n");
        assert_eq!(drain(&mut a_rx).await, "");
        assert_eq!(drain(&mut c_rx).await, "");
    }

    #[tokio::test]
    async fn private_to_unknown_user_delivers_nothing() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = test_session("usuario1");
        let (b, mut b_rx) = test_session("usuario2");
        registry.insert("usuario1", a.clone()).await;
        registry.insert("usuario2", b.clone()).await;

        let outcome = send_private(&registry, &a, "ghost", "boo", &Logger).await;
        assert_eq!(outcome, Delivery::NotFound);
        assert_eq!(drain(&mut a_rx).await, "");
        assert_eq!(drain(&mut b_rx).await, "");
    }
}
