//! Pending Selection Registry
//!
//! Message-correlation table: outbound message ID → open choice. The store is
//! injected wherever it is needed so tests can run against isolated instances.
//!
//! All operations on one key happen under a single write lock, so
//! read-modify-write sequences (claim, replace) cannot interleave.

use super::types::{PendingSelection, SelectionPayload};
use crate::resources::{ResourceCache, ResourceHandle};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no pending selection for key {0}")]
    NotFound(String),
}

/// Result of trying to start a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The caller now holds the entry's single resolution slot
    Granted(PendingSelection),
    NotFound,
    NotOwner,
    /// Another resolution for this key is still running
    Busy,
}

/// Storage contract for pending selections
#[async_trait]
pub trait PendingSelectionStore: Send + Sync {
    /// Insert an entry; an existing entry under the same key is overwritten
    async fn create(&self, selection: PendingSelection);

    async fn get(&self, key: &str) -> Option<PendingSelection>;

    /// Drop an entry and release its resources. Removing a missing key is a no-op.
    async fn remove(&self, key: &str);

    /// Swap the payload of a multi-turn entry and re-attach it to `next_key`
    /// (which may equal `key`). Owner and kind are inherited.
    async fn replace(
        &self,
        key: &str,
        next_key: &str,
        payload: SelectionPayload,
        resources: Vec<ResourceHandle>,
    ) -> Result<(), StoreError>;

    /// Atomically check ownership and mark the entry in flight
    async fn claim(&self, key: &str, sender_id: &str) -> Claim;

    /// Clear the in-flight mark, keeping the entry
    async fn release_claim(&self, key: &str);

    /// Remove expired entries that are not in flight; returns how many were removed
    async fn purge_expired(&self) -> usize;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

struct Slot {
    selection: PendingSelection,
    in_flight: bool,
}

/// Process-local store backed by a `HashMap`
pub struct InMemorySelectionStore {
    entries: RwLock<HashMap<String, Slot>>,
    cache: Arc<ResourceCache>,
    ttl: Option<Duration>,
}

impl InMemorySelectionStore {
    /// `ttl` of `None` disables expiry
    pub fn new(cache: Arc<ResourceCache>, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache,
            ttl,
        }
    }

    fn is_expired(&self, selection: &PendingSelection) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(selection.created_at);
                age.to_std().map(|age| age >= ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Release `old` handles that do not appear in `keep`
    async fn release_unused(&self, old: &[ResourceHandle], keep: &[ResourceHandle]) {
        let stale: Vec<&ResourceHandle> = old.iter().filter(|h| !keep.contains(h)).collect();
        if !stale.is_empty() {
            self.cache.release_all(stale).await;
        }
    }
}

#[async_trait]
impl PendingSelectionStore for InMemorySelectionStore {
    async fn create(&self, selection: PendingSelection) {
        let key = selection.correlation_key.clone();
        let keep = selection.resources.clone();
        let previous = {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.clone(),
                Slot {
                    selection,
                    in_flight: false,
                },
            )
        };

        if let Some(previous) = previous {
            debug!("Selection {} overwritten", key);
            self.release_unused(&previous.selection.resources, &keep).await;
        } else {
            debug!("Selection {} created", key);
        }
    }

    async fn get(&self, key: &str) -> Option<PendingSelection> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|slot| !self.is_expired(&slot.selection))
            .map(|slot| slot.selection.clone())
    }

    async fn remove(&self, key: &str) {
        let removed = self.entries.write().await.remove(key);
        if let Some(slot) = removed {
            debug!("Selection {} removed", key);
            self.cache.release_all(slot.selection.resources.iter()).await;
        }
    }

    async fn replace(
        &self,
        key: &str,
        next_key: &str,
        payload: SelectionPayload,
        resources: Vec<ResourceHandle>,
    ) -> Result<(), StoreError> {
        let keep = resources.clone();
        let (old_resources, displaced) = {
            let mut entries = self.entries.write().await;
            let slot = entries
                .remove(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

            let old_resources = slot.selection.resources;
            let next = PendingSelection {
                correlation_key: next_key.to_string(),
                owner_id: slot.selection.owner_id,
                kind: slot.selection.kind,
                payload,
                created_at: Utc::now(),
                resources,
            };
            let displaced = entries.insert(
                next_key.to_string(),
                Slot {
                    selection: next,
                    in_flight: false,
                },
            );
            (old_resources, displaced)
        };

        self.release_unused(&old_resources, &keep).await;
        if let Some(displaced) = displaced {
            self.release_unused(&displaced.selection.resources, &keep).await;
        }

        debug!("Selection {} replaced as {}", key, next_key);
        Ok(())
    }

    async fn claim(&self, key: &str, sender_id: &str) -> Claim {
        let expired = {
            let mut entries = self.entries.write().await;
            let Some(slot) = entries.get_mut(key) else {
                return Claim::NotFound;
            };

            if slot.selection.owner_id != sender_id {
                return Claim::NotOwner;
            }
            if slot.in_flight {
                return Claim::Busy;
            }
            if self.is_expired(&slot.selection) {
                entries.remove(key)
            } else {
                slot.in_flight = true;
                return Claim::Granted(slot.selection.clone());
            }
        };

        if let Some(slot) = expired {
            debug!("Selection {} expired on claim", key);
            self.cache.release_all(slot.selection.resources.iter()).await;
        }
        Claim::NotFound
    }

    async fn release_claim(&self, key: &str) {
        if let Some(slot) = self.entries.write().await.get_mut(key) {
            slot.in_flight = false;
        }
    }

    async fn purge_expired(&self) -> usize {
        let expired: Vec<Slot> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, slot)| !slot.in_flight && self.is_expired(&slot.selection))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };

        for slot in &expired {
            self.cache.release_all(slot.selection.resources.iter()).await;
        }
        if !expired.is_empty() {
            debug!("Purged {} expired selections", expired.len());
        }
        expired.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
