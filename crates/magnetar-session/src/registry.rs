//! Concurrent session registry.
//!
//! The registry-wide lock is only ever held to look up or copy entry
//! references; each entry carries its own `tokio::sync::Mutex` so commands
//! racing on one session serialize without stalling unrelated sessions, and
//! engine network calls never run under the registry lock. Entry locks are
//! never taken under the registry lock either: they can be held across
//! in-flight engine calls, so duplicate detection runs against a magnet side
//! index maintained alongside the entry map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use magnetar_engine::EngineHandle;

use crate::error::{SessionError, SessionResult};
use crate::model::{SessionId, SessionView, TorrentSession};

/// Shared handle to one registry entry.
pub type SessionEntry = Arc<Mutex<TorrentSession>>;

#[derive(Default)]
struct Tables {
    entries: HashMap<SessionId, SessionEntry>,
    /// Magnet URIs are immutable after creation, so the index never goes
    /// stale between `insert` and `remove`.
    magnets: HashMap<String, SessionId>,
}

/// Concurrent map of session identifier to session state, the only shared
/// mutable resource in the system.
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
}

impl SessionRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session, rejecting duplicate magnet URIs.
    pub async fn insert(&self, session: TorrentSession) -> SessionResult<SessionEntry> {
        let mut tables = self.tables.write().await;
        if tables.magnets.contains_key(session.magnet_uri()) {
            return Err(SessionError::InvalidArgument {
                reason: "magnet URI already tracked",
            });
        }
        let id = session.id();
        tables.magnets.insert(session.magnet_uri().to_owned(), id);
        let entry = Arc::new(Mutex::new(session));
        tables.entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Fetch the entry for an identifier, if present.
    pub async fn entry(&self, id: SessionId) -> Option<SessionEntry> {
        self.tables.read().await.entries.get(&id).cloned()
    }

    /// Fetch the entry owning the given engine handle, if any.
    pub async fn entry_by_handle(&self, handle: EngineHandle) -> Option<SessionEntry> {
        let candidates: Vec<SessionEntry> = {
            let tables = self.tables.read().await;
            tables.entries.values().cloned().collect()
        };
        for entry in candidates {
            if entry.lock().await.handle() == Some(handle) {
                return Some(entry);
            }
        }
        None
    }

    /// Remove and return the entry for an identifier, freeing its magnet
    /// for re-use.
    pub async fn remove(&self, id: SessionId) -> Option<SessionEntry> {
        let mut tables = self.tables.write().await;
        let entry = tables.entries.remove(&id)?;
        tables.magnets.retain(|_, owner| *owner != id);
        Some(entry)
    }

    /// Copy references to every entry: a consistent membership snapshot for
    /// cross-session sweeps, taken without holding the lock afterwards.
    pub async fn snapshot(&self) -> Vec<SessionEntry> {
        self.tables.read().await.entries.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.tables.read().await.entries.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.entries.is_empty()
    }

    /// Build views of every session, sorted by creation time.
    pub async fn views(&self) -> Vec<SessionView> {
        let entries = self.snapshot().await;
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            views.push(entry.lock().await.view());
        }
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnetar_events::SessionStatus;

    fn session(magnet: &str) -> TorrentSession {
        TorrentSession::new(SessionId::new(), magnet)
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_magnets() {
        let registry = SessionRegistry::new();
        registry
            .insert(session("magnet:?xt=urn:btih:abcd"))
            .await
            .expect("first insert");

        let duplicate = registry.insert(session("magnet:?xt=urn:btih:abcd")).await;
        assert!(matches!(
            duplicate,
            Err(SessionError::InvalidArgument { .. })
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn lookup_by_id_and_handle() {
        let registry = SessionRegistry::new();
        let handle = EngineHandle::new();
        let mut added = session("magnet:?xt=urn:btih:abcd");
        let id = added.id();
        added.attach_handle(handle);
        registry.insert(added).await.expect("insert");

        assert!(registry.entry(id).await.is_some());
        assert!(registry.entry(SessionId::new()).await.is_none());

        let by_handle = registry
            .entry_by_handle(handle)
            .await
            .expect("handle lookup");
        assert_eq!(by_handle.lock().await.id(), id);
        assert!(registry.entry_by_handle(EngineHandle::new()).await.is_none());
    }

    #[tokio::test]
    async fn insert_does_not_wait_on_held_entry_locks() {
        let registry = SessionRegistry::new();
        let busy = registry
            .insert(session("magnet:?xt=urn:btih:busy"))
            .await
            .expect("first insert");

        // Entry locks stay held across engine calls; membership changes must
        // not queue behind them.
        let _guard = busy.lock().await;
        let inserted = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            registry.insert(session("magnet:?xt=urn:btih:other")),
        )
        .await
        .expect("insert must not block on a busy entry");
        inserted.expect("distinct magnet accepted");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn remove_deletes_the_record_and_frees_the_magnet() {
        let registry = SessionRegistry::new();
        let added = session("magnet:?xt=urn:btih:abcd");
        let id = added.id();
        registry.insert(added).await.expect("insert");

        assert!(registry.remove(id).await.is_some());
        assert!(registry.remove(id).await.is_none());
        assert!(registry.is_empty().await);
        registry
            .insert(session("magnet:?xt=urn:btih:abcd"))
            .await
            .expect("magnet free after removal");
    }

    #[tokio::test]
    async fn views_sorted_by_creation_time() {
        let registry = SessionRegistry::new();
        for index in 0..3 {
            let magnet = format!("magnet:?xt=urn:btih:session{index}");
            registry
                .insert(session(&magnet))
                .await
                .expect("insert session");
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let views = registry.views().await;
        assert_eq!(views.len(), 3);
        assert!(views.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(views.iter().all(|v| v.status == SessionStatus::Added));
    }

    #[tokio::test]
    async fn per_entry_locks_serialize_racing_writers() {
        let registry = Arc::new(SessionRegistry::new());
        let added = session("magnet:?xt=urn:btih:abcd");
        let id = added.id();
        registry.insert(added).await.expect("insert");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let entry = registry.entry(id).await.expect("entry");
                let mut session = entry.lock().await;
                let peers = session.peers();
                tokio::task::yield_now().await;
                session.set_peers(peers + 1);
            }));
        }
        for task in tasks {
            task.await.expect("writer task");
        }

        let entry = registry.entry(id).await.expect("entry");
        assert_eq!(entry.lock().await.peers(), 16);
    }
}
