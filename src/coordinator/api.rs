//! Request-path API: subscription CRUD, matching, notification outcomes
//! and statistics.
//!
//! Every method delegates to the [`SubCache`](crate::cache::SubCache) or
//! the [`Synchronizer`](crate::sync::Synchronizer). The `_at` variants take
//! an explicit clock (epoch seconds) and the plain forms use the wall clock.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheStatistics, EntityUpdate};
use crate::error::CacheError;
use crate::metrics::LatencyTimer;
use crate::subscription::{epoch_secs, CachedSubscription, NotifyOutcome, SubscriptionSpec};
use crate::sync::RefreshOutcome;

use super::SubCacheEngine;

impl SubCacheEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Subscription CRUD
    // ═══════════════════════════════════════════════════════════════════════════

    /// Admit a new subscription.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use subcache::SubCacheEngine;
    /// # use subcache::subscription::{EntitySelector, SubscriptionSpec};
    /// # fn example(engine: &SubCacheEngine) {
    /// let spec = SubscriptionSpec::new("", SubscriptionSpec::generate_id())
    ///     .with_entity(EntitySelector::id_pattern("Room.*", "Room"))
    ///     .watching(["temperature"]);
    /// match engine.insert(&spec) {
    ///     Ok(record) => println!("admitted {}", record.subscription_id()),
    ///     Err(e) if e.is_validation() => println!("rejected: {e}"),
    ///     Err(e) => println!("error: {e}"),
    /// }
    /// # }
    /// ```
    pub fn insert(&self, spec: &SubscriptionSpec) -> Result<Arc<CachedSubscription>, CacheError> {
        let _timer = LatencyTimer::new("insert");
        self.cache.insert(spec)
    }

    pub fn update(&self, spec: &SubscriptionSpec) -> Result<Arc<CachedSubscription>, CacheError> {
        let _timer = LatencyTimer::new("update");
        self.cache.update(spec)
    }

    #[must_use]
    pub fn lookup(&self, tenant: &str, subscription_id: &str) -> Option<Arc<CachedSubscription>> {
        self.cache.lookup(tenant, subscription_id)
    }

    pub fn remove(&self, tenant: &str, subscription_id: &str) -> Result<usize, CacheError> {
        let _timer = LatencyTimer::new("remove");
        self.cache.remove(tenant, subscription_id)
    }

    pub fn remove_record(&self, record: &Arc<CachedSubscription>) -> usize {
        self.cache.remove_record(record)
    }

    /// Every cached subscription in insertion order, as persisted specs.
    #[must_use]
    pub fn list(&self) -> Vec<SubscriptionSpec> {
        self.cache.snapshot().iter().map(|r| r.to_spec()).collect()
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired(epoch_secs())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Matching
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn match_attribute(&self, update: &EntityUpdate<'_>, changed: &str) -> Vec<Arc<CachedSubscription>> {
        self.cache.match_attribute(update, changed, epoch_secs())
    }

    pub fn match_attribute_at(
        &self,
        update: &EntityUpdate<'_>,
        changed: &str,
        now: f64,
    ) -> Vec<Arc<CachedSubscription>> {
        self.cache.match_attribute(update, changed, now)
    }

    pub fn match_attributes<S: AsRef<str>>(
        &self,
        update: &EntityUpdate<'_>,
        changed: &[S],
    ) -> Vec<Arc<CachedSubscription>> {
        self.cache.match_attributes(update, changed, epoch_secs())
    }

    pub fn match_attributes_at<S: AsRef<str>>(
        &self,
        update: &EntityUpdate<'_>,
        changed: &[S],
        now: f64,
    ) -> Vec<Arc<CachedSubscription>> {
        self.cache.match_attributes(update, changed, now)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Notification outcomes & statistics
    // ═══════════════════════════════════════════════════════════════════════════

    /// Returns true when the subscription just crossed the failure threshold.
    pub fn notify_outcome(&self, record: &CachedSubscription, outcome: NotifyOutcome) -> bool {
        self.cache.notify_outcome(record, outcome, epoch_secs())
    }

    pub fn notify_outcome_at(&self, record: &CachedSubscription, outcome: NotifyOutcome, timestamp: f64) -> bool {
        self.cache.notify_outcome(record, outcome, timestamp)
    }

    pub fn notify_outcome_by_id(
        &self,
        tenant: &str,
        subscription_id: &str,
        outcome: NotifyOutcome,
        timestamp: f64,
    ) -> Result<Arc<CachedSubscription>, CacheError> {
        self.cache.notify_outcome_by_id(tenant, subscription_id, outcome, timestamp)
    }

    /// Statistics with the configured identifier-list bound. All zero
    /// while the cache is disabled.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.statistics_bounded(self.cache.stats_list_max_bytes())
    }

    #[must_use]
    pub fn statistics_bounded(&self, max_bytes: usize) -> CacheStatistics {
        if !self.is_cache_enabled() {
            return CacheStatistics::default();
        }
        self.cache.statistics(max_bytes)
    }

    pub fn reset_statistics(&self, reason: &str) {
        self.cache.reset_statistics(reason);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Explicit refresh
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reconcile with the store now, e.g. after a CRUD operation that must
    /// be reflected immediately. Coalesces into a cycle already running.
    pub async fn refresh_now(&self) -> Result<RefreshOutcome, CacheError> {
        if !self.is_cache_enabled() {
            return Err(CacheError::Disabled);
        }
        let _timer = LatencyTimer::new("refresh");
        let outcome = self.sync.refresh().await?;
        if outcome.is_coalesced() {
            debug!("Explicit refresh coalesced into running cycle");
        }
        Ok(outcome)
    }
}
