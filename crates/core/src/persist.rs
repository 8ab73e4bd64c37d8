//! Persister trait: optional durable backing for the session store.
//!
//! The store treats the persister as a write-through hint: in-memory state
//! stays authoritative for the life of the process, and failures here are
//! logged by the store rather than surfaced to the engine.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::session::SessionSnapshot;

#[async_trait]
pub trait SessionPersister: Send + Sync {
    /// Human-readable backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Insert or replace the full snapshot of a session.
    async fn save(&self, snapshot: &SessionSnapshot) -> std::result::Result<(), StoreError>;

    async fn load(&self, session_id: &str) -> std::result::Result<Option<SessionSnapshot>, StoreError>;

    /// All sessions of a workspace, most recently updated first.
    async fn list_by_workspace(
        &self,
        workspace_id: &str,
    ) -> std::result::Result<Vec<SessionSnapshot>, StoreError>;

    /// Returns whether anything was removed.
    async fn remove(&self, session_id: &str) -> std::result::Result<bool, StoreError>;
}
