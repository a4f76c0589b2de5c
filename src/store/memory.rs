use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::models::session::{MeetSession, MeetStatus};
use crate::store::{ChangeRegistry, SessionStore, StoreError, Subscription};

/// In-memory store with the same conditional-update semantics as the SQLite
/// backend. Used by tests and keyless demo runs.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    rows: Arc<Mutex<HashMap<String, MeetSession>>>,
    registry: ChangeRegistry,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &ChangeRegistry {
        &self.registry
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &MeetSession) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&session.id) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "duplicate session id {}",
                session.id
            )));
        }
        rows.insert(session.id.clone(), session.clone());
        drop(rows);
        self.registry.publish(session).await;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<MeetSession, StoreError> {
        let rows = self.rows.lock().await;
        rows.get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_where(
        &self,
        expected: MeetStatus,
        session: &MeetSession,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&session.id)
            .ok_or_else(|| StoreError::NotFound(session.id.clone()))?;
        if current.status != expected {
            return Err(StoreError::Conflict);
        }
        rows.insert(session.id.clone(), session.clone());
        drop(rows);
        self.registry.publish(session).await;
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Subscription {
        self.registry.register(id).await
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<MeetSession>, StoreError> {
        let rows = self.rows.lock().await;
        let mut all: Vec<MeetSession> = rows.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit as usize);
        Ok(all)
    }
}
