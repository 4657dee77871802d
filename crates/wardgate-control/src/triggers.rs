//! Per-key coalescing wake-up signals
//!
//! Each open configuration stream owns one trigger. A trigger holds at most
//! one pending wake-up: firing while one is already pending is a no-op, so
//! the stream only learns that something changed, never how many times.

use std::fmt::Display;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::TriggerError;

/// Receiving end of a trigger; yields `None` once the trigger is removed
pub type Trigger = mpsc::Receiver<()>;

pub struct Triggers<K: Eq + Hash> {
    kind: &'static str,
    triggers: DashMap<K, mpsc::Sender<()>>,
}

impl<K> Triggers<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            triggers: DashMap::new(),
        }
    }

    /// Register a trigger for `key`; fails if one is already registered.
    pub fn add(&self, key: K) -> Result<Trigger, TriggerError> {
        match self.triggers.entry(key) {
            Entry::Occupied(entry) => {
                tracing::warn!(kind = self.kind, key = %entry.key(), "Trigger already registered");
                Err(TriggerError::AlreadyExists(entry.key().to_string()))
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(1);
                tracing::debug!(kind = self.kind, key = %entry.key(), "Registered trigger");
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Deregister and close the trigger for `key`
    pub fn remove(&self, key: &K) {
        if self.triggers.remove(key).is_some() {
            tracing::debug!(kind = self.kind, key = %key, "Removed trigger");
        }
    }

    /// Wake the stream for `key` without blocking
    pub fn fire(&self, key: &K) {
        if let Some(tx) = self.triggers.get(key) {
            let _ = tx.try_send(());
        }
    }

    pub fn fire_all(&self) {
        for entry in self.triggers.iter() {
            let _ = entry.value().try_send(());
        }
        tracing::debug!(kind = self.kind, count = self.triggers.len(), "Fired all triggers");
    }

    pub fn exists(&self, key: &K) -> bool {
        self.triggers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.triggers.iter().map(|e| e.key().clone()).collect()
    }

    /// Close every trigger
    pub fn close(&self) {
        self.triggers.clear();
    }
}
