//! Fan-out of agent status to local subscribers
//!
//! Subscribers get the latest status on subscribe and every update after.
//! Delivery never blocks the agent: an update that does not fit in a
//! subscriber's buffer is dropped for that subscriber.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;
use wardgate_proto::{AgentState, AgentStatus};

const SUBSCRIBER_BUFFER: usize = 8;

struct Inner {
    latest: AgentStatus,
    subscribers: HashMap<Uuid, mpsc::Sender<AgentStatus>>,
}

pub struct StatusFanout {
    inner: Mutex<Inner>,
}

impl Default for StatusFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFanout {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest: AgentStatus::new(AgentState::Disconnected),
                subscribers: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a subscriber; the current status is queued immediately.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<AgentStatus>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();

        let mut inner = self.lock();
        let _ = tx.try_send(inner.latest.clone());
        inner.subscribers.insert(id, tx);
        tracing::debug!(subscriber = %id, subscribers = inner.subscribers.len(), "Status subscriber added");

        (id, rx)
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if self.lock().subscribers.remove(id).is_some() {
            tracing::debug!(subscriber = %id, "Status subscriber removed");
        }
    }

    pub fn current(&self) -> AgentStatus {
        self.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Replace the status and publish it
    pub fn update_status(&self, status: AgentStatus) {
        self.update(|latest| *latest = status);
    }

    /// Edit the latest status in place and publish the result
    pub fn update(&self, edit: impl FnOnce(&mut AgentStatus)) {
        let mut inner = self.lock();
        edit(&mut inner.latest);
        let status = inner.latest.clone();

        inner.subscribers.retain(|id, tx| match tx.try_send(status.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::error!(subscriber = %id, "Status subscriber is not keeping up, dropping update");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = %id, "Status subscriber went away");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_replays_latest() {
        let fanout = StatusFanout::new();
        fanout.update(|s| s.connection_state = AgentState::Connected);

        let (_, mut rx) = fanout.subscribe();
        assert_eq!(rx.recv().await.unwrap().connection_state, AgentState::Connected);
    }

    #[tokio::test]
    async fn test_updates_reach_every_subscriber() {
        let fanout = StatusFanout::new();
        let (_, mut a) = fanout.subscribe();
        let (_, mut b) = fanout.subscribe();
        a.recv().await.unwrap();
        b.recv().await.unwrap();

        fanout.update(|s| s.connection_state = AgentState::Authenticating);

        assert_eq!(a.recv().await.unwrap().connection_state, AgentState::Authenticating);
        assert_eq!(b.recv().await.unwrap().connection_state, AgentState::Authenticating);
    }

    #[tokio::test]
    async fn test_slow_subscriber_misses_updates_but_stays() {
        let fanout = StatusFanout::new();
        let (_, mut rx) = fanout.subscribe();

        for _ in 0..(SUBSCRIBER_BUFFER * 2) {
            fanout.update(|s| s.connection_state = AgentState::Bootstrapping);
        }
        assert_eq!(fanout.subscriber_count(), 1);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);

        fanout.update(|s| s.connection_state = AgentState::Connected);
        assert_eq!(rx.recv().await.unwrap().connection_state, AgentState::Connected);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let fanout = StatusFanout::new();
        let (_, rx) = fanout.subscribe();
        drop(rx);

        fanout.update(|s| s.connection_state = AgentState::Connected);
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
