use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{StatsUpdate, StorageError, SubscriptionStore, TenantScope};
use crate::subscription::{epoch_secs, SubscriptionSpec};

/// In-process subscription store.
///
/// Keyed by (tenant, id). Fetches return subscriptions in the order they
/// were first put, so the cache keeps a deterministic insertion order.
pub struct InMemorySubscriptionStore {
    data: DashMap<(String, String), (u64, SubscriptionSpec)>,
    next_seq: AtomicU64,
}

impl InMemorySubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Insert or replace. A replaced subscription keeps its position.
    pub fn put(&self, spec: SubscriptionSpec) {
        let key = (spec.tenant.clone(), spec.subscription_id.clone());
        match self.data.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().1 = spec,
            Entry::Vacant(entry) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entry.insert((seq, spec));
            }
        }
    }

    /// Store a raw subscription document, as a document database would
    /// hold it. Documents that don't decode are rejected as corrupt.
    pub fn put_document(&self, document: serde_json::Value) -> Result<(), StorageError> {
        self.put(SubscriptionSpec::from_document(document)?);
        Ok(())
    }

    pub fn delete(&self, tenant: &str, subscription_id: &str) -> Result<(), StorageError> {
        self.data
            .remove(&(tenant.to_string(), subscription_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                tenant: tenant.to_string(),
                subscription_id: subscription_id.to_string(),
            })
    }

    #[must_use]
    pub fn get(&self, tenant: &str, subscription_id: &str) -> Option<SubscriptionSpec> {
        self.data
            .get(&(tenant.to_string(), subscription_id.to_string()))
            .map(|r| r.value().1.clone())
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn fetch_active_subscriptions(
        &self,
        scope: &TenantScope,
    ) -> Result<Vec<SubscriptionSpec>, StorageError> {
        let now = epoch_secs();
        let mut rows: Vec<(u64, SubscriptionSpec)> = self
            .data
            .iter()
            .filter(|r| scope.includes(&r.key().0) && !r.value().1.is_expired_at(now))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, spec)| spec).collect())
    }

    async fn write_notification_stats(&self, updates: &[StatsUpdate]) -> Result<usize, StorageError> {
        let mut written = 0;
        for update in updates {
            let key = (update.tenant.clone(), update.subscription_id.clone());
            if let Some(mut entry) = self.data.get_mut(&key) {
                let spec = &mut entry.1;
                spec.last_notification = update.last_notification;
                spec.last_success = update.last_success;
                spec.last_failure = update.last_failure;
                spec.count = update.count;
                written += 1;
            }
        }
        Ok(written)
    }
}
