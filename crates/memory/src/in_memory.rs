//! In-memory persister: useful for testing and single-process hosts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use weaver_core::error::StoreError;
use weaver_core::persist::SessionPersister;
use weaver_core::session::SessionSnapshot;

/// Keeps the latest snapshot of every saved session in a map.
#[derive(Clone, Default)]
pub struct InMemoryPersister {
    snapshots: Arc<RwLock<HashMap<String, SessionSnapshot>>>,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of saved sessions.
    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionPersister for InMemoryPersister {
    fn name(&self) -> &str { "in_memory" }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(session_id).cloned())
    }

    async fn list_by_workspace(&self, workspace_id: &str) -> Result<Vec<SessionSnapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        let mut found: Vec<SessionSnapshot> = snapshots
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.snapshots.write().await.remove(session_id).is_some())
    }
}
