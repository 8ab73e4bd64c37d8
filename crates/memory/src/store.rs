//! Session Store: owns the set of live sessions.
//!
//! One lock guards the id → session map; each [`Session`] carries its own
//! lock for its contents. A configured [`SessionPersister`] receives a full
//! snapshot on every [`SessionStore::persist`] call and is consulted on
//! lookup misses. Persister failures never reach the caller: writes are
//! logged and dropped, reads are treated as a miss.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use weaver_core::persist::SessionPersister;
use weaver_core::session::{Session, SessionSnapshot};

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    persister: Option<Arc<dyn SessionPersister>>,
}

impl SessionStore {
    /// A store without durable backing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a persister.
    pub fn with_persister(mut self, persister: Arc<dyn SessionPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn has_persister(&self) -> bool {
        self.persister.is_some()
    }

    /// Return the session for `session_id`, creating it on first use.
    ///
    /// Idempotent: every call for the same id yields the same `Arc`.
    /// Identity arguments only matter when the session is created.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        workspace_id: &str,
        user_id: &str,
        persona_id: Option<&str>,
    ) -> Arc<Session> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return existing.clone();
        }

        let (candidate, fresh) = match self.load_from_persister(session_id).await {
            Some(snapshot) => (Arc::new(Session::from_snapshot(snapshot)), false),
            None => (
                Arc::new(Session::new(
                    session_id,
                    workspace_id,
                    user_id,
                    persona_id.map(str::to_string),
                )),
                true,
            ),
        };

        let (session, inserted) = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    sessions.insert(session_id.to_string(), candidate.clone());
                    (candidate, true)
                }
            }
        };

        if inserted && fresh {
            debug!(session_id, workspace_id, "Created session");
            self.write_through(&session).await;
        }
        session
    }

    /// Look up a session, falling back to the persister (and caching the hit).
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Some(existing.clone());
        }
        let snapshot = self.load_from_persister(session_id).await?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Session::from_snapshot(snapshot)))
            .clone();
        Some(session)
    }

    /// Snapshots of every session in a workspace, most recently updated first.
    ///
    /// With a persister, its listing is the base and live sessions overlay
    /// it (live state is newer than anything persisted).
    pub async fn list(&self, workspace_id: &str) -> Vec<SessionSnapshot> {
        let live: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.workspace_id() == workspace_id)
            .map(|s| s.snapshot())
            .collect();

        let mut merged: HashMap<String, SessionSnapshot> = HashMap::new();
        if let Some(persister) = &self.persister {
            match persister.list_by_workspace(workspace_id).await {
                Ok(stored) => {
                    merged.extend(stored.into_iter().map(|s| (s.id.clone(), s)));
                }
                Err(e) => warn!(workspace_id, error = %e, "Persister list failed"),
            }
        }
        merged.extend(live.into_iter().map(|s| (s.id.clone(), s)));

        let mut all: Vec<SessionSnapshot> = merged.into_values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Remove a session from memory and from the persister.
    pub async fn delete(&self, session_id: &str) -> bool {
        let in_memory = self.sessions.write().await.remove(session_id).is_some();
        let persisted = match &self.persister {
            Some(persister) => match persister.remove(session_id).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(session_id, error = %e, "Persister remove failed");
                    false
                }
            },
            None => false,
        };
        in_memory || persisted
    }

    /// Snapshot a live session and write it through to the persister.
    pub async fn persist(&self, session_id: &str) {
        let session = self.sessions.read().await.get(session_id).cloned();
        match session {
            Some(session) => self.write_through(&session).await,
            None => debug!(session_id, "Persist skipped: session not loaded"),
        }
    }

    /// Number of live (in-memory) sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn write_through(&self, session: &Session) {
        let Some(persister) = &self.persister else {
            return;
        };
        let snapshot = session.snapshot();
        if let Err(e) = persister.save(&snapshot).await {
            warn!(
                session_id = %snapshot.id,
                backend = persister.name(),
                error = %e,
                "Persister save failed, keeping in-memory state"
            );
        }
    }

    async fn load_from_persister(&self, session_id: &str) -> Option<SessionSnapshot> {
        let persister = self.persister.as_ref()?;
        match persister.load(session_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id, error = %e, "Persister load failed, treating as miss");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("persister", &self.persister.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryPersister;
    use async_trait::async_trait;
    use weaver_core::error::StoreError;
    use weaver_core::message::MessageEntry;
    use weaver_core::session::SessionPhase;

    struct BrokenPersister;

    #[async_trait]
    impl SessionPersister for BrokenPersister {
        fn name(&self) -> &str { "broken" }
        async fn save(&self, _s: &SessionSnapshot) -> Result<(), StoreError> {
            Err(StoreError::Storage("disk full".into()))
        }
        async fn load(&self, _id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
            Err(StoreError::QueryFailed("offline".into()))
        }
        async fn list_by_workspace(&self, _ws: &str) -> Result<Vec<SessionSnapshot>, StoreError> {
            Err(StoreError::QueryFailed("offline".into()))
        }
        async fn remove(&self, _id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Storage("offline".into()))
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = SessionStore::new();
        let a = store.get_or_create("s1", "ws", "u", None).await;
        let b = store.get_or_create("s1", "other", "other", Some("p")).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.workspace_id(), "ws");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_session() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get_or_create("shared", "ws", "u", None).await
            }));
        }
        let mut sessions = Vec::new();
        for h in handles {
            sessions.push(h.await.unwrap());
        }
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn create_writes_through() {
        let persister = InMemoryPersister::new();
        let store = SessionStore::new().with_persister(Arc::new(persister.clone()));
        store.get_or_create("s1", "ws", "u", None).await;
        assert!(persister.load("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn get_falls_back_to_persister_and_caches() {
        let persister = InMemoryPersister::new();
        let seeded = Session::new("s1", "ws", "u", None);
        seeded.add_message(MessageEntry::user("hello"));
        seeded.advance_phase(SessionPhase::Confirmed);
        persister.save(&seeded.snapshot()).await.unwrap();

        let store = SessionStore::new().with_persister(Arc::new(persister));
        let loaded = store.get("s1").await.unwrap();
        assert_eq!(loaded.phase(), SessionPhase::Confirmed);
        assert_eq!(loaded.message_count(), 1);
        assert_eq!(store.count().await, 1);
        let again = store.get("s1").await.unwrap();
        assert!(Arc::ptr_eq(&loaded, &again));
    }

    #[tokio::test]
    async fn get_or_create_resumes_persisted_session() {
        let persister = InMemoryPersister::new();
        let seeded = Session::new("s1", "ws", "u", None);
        seeded.add_message(MessageEntry::user("earlier"));
        persister.save(&seeded.snapshot()).await.unwrap();

        let store = SessionStore::new().with_persister(Arc::new(persister));
        let session = store.get_or_create("s1", "ws", "u", None).await;
        assert_eq!(session.message_count(), 1);
    }

    #[tokio::test]
    async fn persist_sends_latest_snapshot() {
        let persister = InMemoryPersister::new();
        let store = SessionStore::new().with_persister(Arc::new(persister.clone()));
        let session = store.get_or_create("s1", "ws", "u", None).await;
        session.add_message(MessageEntry::user("first"));
        store.persist("s1").await;
        let saved = persister.load("s1").await.unwrap().unwrap();
        assert_eq!(saved.messages.len(), 1);
    }

    #[tokio::test]
    async fn list_merges_live_and_persisted() {
        let persister = InMemoryPersister::new();
        persister
            .save(&Session::new("old", "ws", "u", None).snapshot())
            .await
            .unwrap();
        persister
            .save(&Session::new("elsewhere", "ws2", "u", None).snapshot())
            .await
            .unwrap();
        let store = SessionStore::new().with_persister(Arc::new(persister));
        let live = store.get_or_create("new", "ws", "u", None).await;
        live.add_message(MessageEntry::user("fresh"));

        let listed = store.list("ws").await;
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"old"));
        let fresh = listed.iter().find(|s| s.id == "new").unwrap();
        assert_eq!(fresh.messages.len(), 1);
    }

    #[tokio::test]
    async fn list_without_persister_filters_memory() {
        let store = SessionStore::new();
        store.get_or_create("a", "ws1", "u", None).await;
        store.get_or_create("b", "ws2", "u", None).await;
        let listed = store.list("ws1").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
    }

    #[tokio::test]
    async fn delete_removes_everywhere() {
        let persister = InMemoryPersister::new();
        let store = SessionStore::new().with_persister(Arc::new(persister.clone()));
        store.get_or_create("s1", "ws", "u", None).await;
        assert!(store.delete("s1").await);
        assert!(store.get("s1").await.is_none());
        assert!(persister.load("s1").await.unwrap().is_none());
        assert!(!store.delete("s1").await);
    }

    #[tokio::test]
    async fn persister_failures_are_swallowed() {
        let store = SessionStore::new().with_persister(Arc::new(BrokenPersister));
        let session = store.get_or_create("s1", "ws", "u", None).await;
        session.add_message(MessageEntry::user("still here"));
        store.persist("s1").await;
        assert_eq!(store.get("s1").await.unwrap().message_count(), 1);
        assert!(store.get("missing").await.is_none());
        assert_eq!(store.list("ws").await.len(), 1);
        assert!(store.delete("s1").await);
    }
}
