pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::client::models::session::{MeetSession, MeetStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("conditional update lost the race")]
    Conflict,
    #[error("store backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Record-store boundary the session lifecycle runs against. Two devices may
/// mutate the same session concurrently, so `update_where` is conditional:
/// the patch lands only while the stored status still equals `expected`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &MeetSession) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<MeetSession, StoreError>;

    /// Conditional write of the whole mutable record. Returns
    /// [`StoreError::Conflict`] when another writer advanced the row first;
    /// a later status is never overwritten by a stale one.
    async fn update_where(
        &self,
        expected: MeetStatus,
        session: &MeetSession,
    ) -> Result<(), StoreError>;

    /// Register for row-change pushes on one session. Delivery is
    /// at-least-once: consumers must tolerate duplicate notifications with
    /// identical payloads.
    async fn subscribe(&self, id: &str) -> Subscription;

    /// Most recently updated sessions, newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<MeetSession>, StoreError>;
}

type WatcherMap = HashMap<String, Vec<(u64, mpsc::UnboundedSender<MeetSession>)>>;

/// Per-session fan-out of row changes, standing in for the hosted store's
/// realtime channel. Watchers are keyed by a token so a single subscription
/// can deregister without touching its siblings.
#[derive(Clone, Default)]
pub struct ChangeRegistry {
    inner: Arc<Mutex<WatcherMap>>,
    next_token: Arc<AtomicU64>,
}

impl ChangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: &str) -> Subscription {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = self.inner.lock().await;
        map.entry(session_id.to_string()).or_default().push((token, tx));
        log::debug!(
            "[STORE] Registered watcher {} for session {} (total={})",
            token,
            session_id,
            map.get(session_id).map(|v| v.len()).unwrap_or(0)
        );
        Subscription {
            session_id: session_id.to_string(),
            token,
            rx,
            registry: self.clone(),
        }
    }

    /// Push the updated record to every watcher of its session. Watchers
    /// whose receiver was dropped are pruned here.
    pub async fn publish(&self, session: &MeetSession) {
        let mut map = self.inner.lock().await;
        if let Some(watchers) = map.get_mut(&session.id) {
            watchers.retain(|(_, tx)| tx.send(session.clone()).is_ok());
            if watchers.is_empty() {
                map.remove(&session.id);
            }
        }
    }

    async fn deregister(&self, session_id: &str, token: u64) {
        let mut map = self.inner.lock().await;
        if let Some(watchers) = map.get_mut(session_id) {
            watchers.retain(|(t, _)| *t != token);
            if watchers.is_empty() {
                map.remove(session_id);
            }
            log::debug!("[STORE] Deregistered watcher {} for session {}", token, session_id);
        }
    }

    #[cfg(test)]
    pub async fn watcher_count(&self, session_id: &str) -> usize {
        let map = self.inner.lock().await;
        map.get(session_id).map(|v| v.len()).unwrap_or(0)
    }
}

/// Handle returned by [`SessionStore::subscribe`]. Await [`Subscription::recv`]
/// for the next change; call [`Subscription::unsubscribe`] (or drop the
/// handle) to stop watching.
pub struct Subscription {
    session_id: String,
    token: u64,
    rx: mpsc::UnboundedReceiver<MeetSession>,
    registry: ChangeRegistry,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next pushed record, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<MeetSession> {
        self.rx.recv().await
    }

    /// Non-blocking variant for UI polling loops.
    pub fn try_recv(&mut self) -> Option<MeetSession> {
        self.rx.try_recv().ok()
    }

    pub async fn unsubscribe(self) {
        self.registry.deregister(&self.session_id, self.token).await;
    }
}
