//! Shared identity → session map.
//!
//! Each method takes the lock once, so every single insert, remove or
//! lookup is linearizable. Multi-step sequences (the default rename) are
//! not: see [`SessionRegistry::rename`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::server::session::Session;

/// Result of a rename request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The session now lives under the new key. `old` may equal the new name.
    Renamed { old: String },
    /// A different live session already holds the name; nothing changed.
    Taken,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns whatever was stored under the key before.
    pub async fn insert(&self, identity: &str, session: Arc<Session>) -> Option<Arc<Session>> {
        let mut map = self.sessions.write().await;
        map.insert(identity.to_string(), session)
    }

    /// Insert only if the key is free.
    pub async fn try_insert(&self, identity: &str, session: Arc<Session>) -> bool {
        let mut map = self.sessions.write().await;
        if map.contains_key(identity) {
            return false;
        }
        map.insert(identity.to_string(), session);
        true
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(identity).cloned()
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.sessions.read().await.contains_key(identity)
    }

    /// Remove whatever is stored under `identity`.
    pub async fn remove(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(identity)
    }

    /// Remove `session` from the key it currently claims, but only if that
    /// key still points at it. Calling this twice is harmless.
    pub async fn remove_session(&self, session: &Arc<Session>) -> bool {
        let identity = session.identity();
        let mut map = self.sessions.write().await;
        match map.get(&identity) {
            Some(current) if Arc::ptr_eq(current, session) => {
                map.remove(&identity);
                true
            }
            _ => false,
        }
    }

    /// Every registered session at this instant.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn identities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Move `session` to `new_name`.
    ///
    /// With `atomic == false` this is the check-then-move sequence: a lookup,
    /// a removal of the old key and an insert of the new one, each under its
    /// own lock. Two sessions racing for the same free name can both pass the
    /// check; the later insert wins the key and the other session is left
    /// unregistered until it renames again or disconnects.
    ///
    /// With `atomic == true` the check and the move happen under one write
    /// lock and the loser gets [`RenameOutcome::Taken`].
    pub async fn rename(&self, session: &Arc<Session>, new_name: &str, atomic: bool) -> RenameOutcome {
        if atomic {
            return self.rename_atomic(session, new_name).await;
        }

        if let Some(existing) = self.get(new_name).await {
            if !Arc::ptr_eq(&existing, session) {
                return RenameOutcome::Taken;
            }
        }

        let old = session.identity();
        self.remove_session(session).await;
        session.set_identity(new_name);
        self.insert(new_name, Arc::clone(session)).await;

        RenameOutcome::Renamed { old }
    }

    async fn rename_atomic(&self, session: &Arc<Session>, new_name: &str) -> RenameOutcome {
        let mut map = self.sessions.write().await;

        if let Some(existing) = map.get(new_name) {
            if !Arc::ptr_eq(existing, session) {
                return RenameOutcome::Taken;
            }
        }

        let old = session.identity();
        if map.get(&old).is_some_and(|current| Arc::ptr_eq(current, session)) {
            map.remove(&old);
        }
        session.set_identity(new_name);
        map.insert(new_name.to_string(), Arc::clone(session));

        RenameOutcome::Renamed { old }
    }
}
