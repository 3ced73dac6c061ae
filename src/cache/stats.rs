//! Statistics and notification bookkeeping.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{info, warn};

use super::SubCache;
use crate::error::CacheError;
use crate::subscription::{CachedSubscription, NotifyOutcome};

/// Counters plus a bounded snapshot of record identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStatistics {
    pub refreshes: u64,
    pub inserts: u64,
    pub removes: u64,
    pub updates: u64,
    pub items: usize,
    /// Records over the consecutive-failure threshold
    pub needing_attention: usize,
    /// `id1, id2, ...`, whole identifiers only
    pub id_list: String,
    pub id_list_truncated: bool,
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refreshes={}, inserts={}, removes={}, updates={}, items={}, needing_attention={}",
            self.refreshes, self.inserts, self.removes, self.updates, self.items, self.needing_attention
        )?;
        if !self.id_list.is_empty() {
            write!(f, ", ids=[{}{}]", self.id_list, if self.id_list_truncated { ", ..." } else { "" })?;
        }
        Ok(())
    }
}

impl SubCache {
    /// Current counters. The identifier list never exceeds `max_bytes`.
    #[must_use]
    pub fn statistics(&self, max_bytes: usize) -> CacheStatistics {
        let records = self.records.read();
        let mut id_list = String::new();
        let mut truncated = false;
        let mut needing_attention = 0;

        for record in records.iter() {
            if record.needs_attention() {
                needing_attention += 1;
            }
            if truncated {
                continue;
            }
            let id = record.subscription_id();
            let separator = if id_list.is_empty() { 0 } else { 2 };
            if id_list.len() + separator + id.len() > max_bytes {
                truncated = true;
                continue;
            }
            if separator > 0 {
                id_list.push_str(", ");
            }
            id_list.push_str(id);
        }

        CacheStatistics {
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            removes: self.counters.removes.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            items: records.len(),
            needing_attention,
            id_list,
            id_list_truncated: truncated,
        }
    }

    /// Zero the four counters.
    pub fn reset_statistics(&self, reason: &str) {
        self.counters.refreshes.store(0, Ordering::Relaxed);
        self.counters.inserts.store(0, Ordering::Relaxed);
        self.counters.removes.store(0, Ordering::Relaxed);
        self.counters.updates.store(0, Ordering::Relaxed);
        info!(reason = %reason, "Subscription cache statistics reset");
    }

    /// Record a notification attempt. Returns true when the subscription
    /// just crossed the failure threshold.
    pub fn notify_outcome(&self, record: &CachedSubscription, outcome: NotifyOutcome, timestamp: f64) -> bool {
        let flagged = record.record_outcome(outcome, timestamp, self.failure_threshold());
        crate::metrics::record_notification(outcome.as_str());
        if flagged {
            crate::metrics::record_attention();
            warn!(
                tenant = %record.tenant(),
                subscription_id = %record.subscription_id(),
                consecutive_failures = record.notification_state().consecutive_failures,
                "Subscription needs attention: repeated notification failures"
            );
        }
        flagged
    }

    /// [`notify_outcome`](Self::notify_outcome) by tenant+id.
    pub fn notify_outcome_by_id(
        &self,
        tenant: &str,
        subscription_id: &str,
        outcome: NotifyOutcome,
        timestamp: f64,
    ) -> Result<Arc<CachedSubscription>, CacheError> {
        let record = self
            .lookup(tenant, subscription_id)
            .ok_or_else(|| CacheError::not_found(self.tenant_key(tenant), subscription_id))?;
        self.notify_outcome(&record, outcome, timestamp);
        Ok(record)
    }
}
