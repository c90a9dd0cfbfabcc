//! In-memory session backend.

use crate::error::SessionFault;
use crate::session::{SessionData, SessionId};
use crate::session_store::{SessionBackend, StoredSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory session backend.
///
/// All operations take the map lock for the duration of the map access only;
/// the lock is never held across an await point, so concurrent requests for
/// different sessions proceed in parallel while operations touching the same
/// session id are serialized. [`replace`](SessionBackend::replace) removes
/// the old id and inserts the new one under a single lock acquisition, so a
/// renewal is observed either not at all or completely.
///
/// Because there is no external persistence this store is ephemeral and will
/// be cleared on server restart. Expired sessions are reaped lazily on load
/// and by [`MemoryStore::cleanup`], which should run periodically if the
/// process is long-lived.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, StoredSession>>,
}

#[async_trait]
impl SessionBackend for MemoryStore {
    async fn create(
        &self,
        id: &SessionId,
        expiry: DateTime<Utc>,
        data: &SessionData,
    ) -> Result<(), SessionFault> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id.clone(),
            StoredSession {
                expiry,
                data: data.clone(),
            },
        );
        Ok(())
    }

    async fn read(&self, id: &SessionId) -> Result<Option<StoredSession>, SessionFault> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(id).cloned())
    }

    async fn update(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionFault> {
        let mut sessions = self.sessions.lock().await;
        if let Some(stored) = sessions.get_mut(id) {
            stored.data = data.clone();
        }
        Ok(())
    }

    async fn replace(
        &self,
        old_id: &SessionId,
        new_id: &SessionId,
        expiry: DateTime<Utc>,
        data: &SessionData,
    ) -> Result<(), SessionFault> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(old_id);
        sessions.insert(
            new_id.clone(),
            StoredSession {
                expiry,
                data: data.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionFault> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(id);
        Ok(())
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions in the store.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns true if the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Delete all expired sessions. Run this intermittently if the store is
    /// alive for long enough that memory accumulation is a concern.
    pub async fn cleanup(&self) {
        tracing::trace!("cleaning up memory store");
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let initial_len = sessions.len();
        sessions.retain(|_, stored| stored.expiry > now);
        tracing::trace!(
            deleted = initial_len - sessions.len(),
            "deleted expired sessions"
        );
    }
}
