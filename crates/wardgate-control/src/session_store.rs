//! In-memory session cache in front of the durable store

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use wardgate_db::{Store, StoreError};
use wardgate_proto::{Device, Session};

use crate::error::SessionError;

/// Cache of live sessions keyed by session key.
///
/// Every mutation of the cache happens under one write lock; the lock is
/// never held across a store call.
pub struct SessionStore {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a session, falling back to the store on a cache miss.
    pub async fn get(&self, key: &str) -> Result<Session, SessionError> {
        let cached = self.cache.read().await.get(key).cloned();

        let session = match cached {
            Some(session) => session,
            None => {
                let session = match self.store.read_session(key).await {
                    Ok(session) => session,
                    Err(StoreError::NotFound(_)) => return Err(SessionError::NoSession),
                    Err(e) => return Err(SessionError::Store(e)),
                };

                let mut cache = self.cache.write().await;
                // A newer session for the same device won the race; this key is dead.
                let superseded = cache
                    .values()
                    .any(|s| s.device.id == session.device.id && s.key != session.key);
                if superseded {
                    return Err(SessionError::NoSession);
                }
                cache.insert(session.key.clone(), session.clone());
                session
            }
        };

        if session.expired() {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Store `session`, replacing any other session held by the same device.
    pub async fn set(&self, session: Session) -> Result<(), SessionError> {
        self.store
            .add_session(&session)
            .await
            .map_err(SessionError::Store)?;

        let mut cache = self.cache.write().await;
        let device_id = session.device.id;
        cache.retain(|_, existing| existing.device.id != device_id);
        cache.insert(session.key.clone(), session);

        tracing::debug!(device_id, sessions = cache.len(), "Stored session");
        Ok(())
    }

    /// All unexpired sessions; expired ones are evicted on the way.
    pub async fn all(&self) -> Vec<Session> {
        let now = Utc::now();
        let mut cache = self.cache.write().await;
        cache.retain(|_, session| !session.expired_at(now));
        cache.values().cloned().collect()
    }

    /// Swap in a fresh device snapshot for every cached session of that device
    pub async fn refresh_device(&self, device: &Device) {
        let mut cache = self.cache.write().await;
        for session in cache.values_mut().filter(|s| s.device.id == device.id) {
            session.device = device.clone();
        }
    }

    /// Drop expired sessions from the store and load the rest into the cache.
    pub async fn warmup(&self) -> Result<usize, SessionError> {
        let removed = self
            .store
            .remove_expired_sessions()
            .await
            .map_err(SessionError::Store)?;
        let sessions = self
            .store
            .read_sessions()
            .await
            .map_err(SessionError::Store)?;

        let now = Utc::now();
        let mut cache = self.cache.write().await;
        cache.clear();
        for session in sessions.into_iter().filter(|s| !s.expired_at(now)) {
            cache.insert(session.key.clone(), session);
        }

        tracing::info!(loaded = cache.len(), removed, "Session cache warmed up");
        Ok(cache.len())
    }
}
