// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The subscription record store.
//!
//! [`SubCache`] holds every admitted [`CachedSubscription`] in insertion
//! order behind a single reader/writer lock:
//!
//! - matching and statistics take the read side and run concurrently
//! - insert, update, remove and the refresh swap take the write side
//!
//! Write critical sections are short. Records are compiled before the lock
//! is taken, and a refresh builds the entire new population off to the
//! side and only swaps vectors under the lock. Removed records are dropped
//! after the guard is released.
//!
//! Each structural mutation bumps a cache-wide epoch and stamps the
//! record with it. While a refresh cycle is running the cache also keeps
//! tombstones for removals, so at swap time anything inserted, updated or
//! removed after the cycle started wins over what the store returned.

pub mod dispatch;
pub mod stats;

pub use dispatch::{service_path_matches, EntityUpdate};
pub use stats::CacheStatistics;

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::SubCacheConfig;
use crate::error::CacheError;
use crate::subscription::{CachedSubscription, SubscriptionSpec};

/// A removal seen while a refresh cycle was in flight.
#[derive(Debug, Clone)]
struct Tombstone {
    tenant: String,
    subscription_id: String,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Counters {
    refreshes: AtomicU64,
    inserts: AtomicU64,
    removes: AtomicU64,
    updates: AtomicU64,
}

pub struct SubCache {
    records: RwLock<Vec<Arc<CachedSubscription>>>,
    counters: Counters,
    epoch: AtomicU64,
    /// `Some` while a refresh cycle is running
    tombstones: Mutex<Option<Vec<Tombstone>>>,
    multitenant: bool,
    failure_threshold: AtomicU32,
    stats_list_max_bytes: AtomicUsize,
}

impl SubCache {
    #[must_use]
    pub fn new(config: &SubCacheConfig) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            counters: Counters::default(),
            epoch: AtomicU64::new(0),
            tombstones: Mutex::new(None),
            multitenant: config.multitenant,
            failure_threshold: AtomicU32::new(config.failure_threshold),
            stats_list_max_bytes: AtomicUsize::new(config.stats_list_max_bytes),
        }
    }

    /// Tenant under which a record is stored. Everything folds into the
    /// default tenant unless the cache is multi-tenant.
    #[inline]
    #[must_use]
    pub fn tenant_key<'a>(&self, tenant: &'a str) -> &'a str {
        if self.multitenant {
            tenant
        } else {
            ""
        }
    }

    #[must_use]
    pub fn is_multitenant(&self) -> bool {
        self.multitenant
    }

    pub fn set_failure_threshold(&self, threshold: u32) {
        self.failure_threshold.store(threshold, Ordering::Relaxed);
    }

    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.load(Ordering::Relaxed)
    }

    pub fn set_stats_list_max_bytes(&self, max_bytes: usize) {
        self.stats_list_max_bytes.store(max_bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats_list_max_bytes(&self) -> usize {
        self.stats_list_max_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Validate and compile a spec for this cache. Rejections are counted
    /// and logged here so every admission path reports them the same way.
    pub(crate) fn build_record(&self, spec: &SubscriptionSpec) -> Result<CachedSubscription, CacheError> {
        let tenant = self.tenant_key(&spec.tenant).to_string();
        CachedSubscription::compile(spec)
            .map(|record| record.with_tenant(tenant))
            .inspect_err(|e| {
                crate::metrics::record_validation_error(validation_kind(spec, e));
                warn!(
                    tenant = %spec.tenant,
                    subscription_id = %spec.subscription_id,
                    error = %e,
                    "Subscription rejected"
                );
            })
    }

    // ═══════════════════════════════════════════════════════════════════
    // STRUCTURAL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════

    /// Admit a new subscription. Nothing changes if it fails to compile
    /// or its tenant+id is already present.
    pub fn insert(&self, spec: &SubscriptionSpec) -> Result<Arc<CachedSubscription>, CacheError> {
        let mut record = match self.build_record(spec) {
            Ok(record) => record,
            Err(e) => {
                crate::metrics::record_operation("insert", "rejected");
                return Err(e);
            }
        };

        let mut records = self.records.write();
        if records.iter().any(|r| r.key() == record.key()) {
            crate::metrics::record_operation("insert", "duplicate");
            return Err(CacheError::AlreadyExists {
                tenant: record.tenant().to_string(),
                subscription_id: record.subscription_id().to_string(),
            });
        }
        record.epoch = self.next_epoch();
        let record = Arc::new(record);
        records.push(Arc::clone(&record));
        let items = records.len();
        drop(records);

        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("insert", "success");
        crate::metrics::set_items(items);
        info!(
            tenant = %record.tenant(),
            subscription_id = %record.subscription_id(),
            "Subscription inserted"
        );
        Ok(record)
    }

    /// Replace an existing subscription's definition in place. Its
    /// position and runtime state are kept.
    pub fn update(&self, spec: &SubscriptionSpec) -> Result<Arc<CachedSubscription>, CacheError> {
        let mut record = match self.build_record(spec) {
            Ok(record) => record,
            Err(e) => {
                crate::metrics::record_operation("update", "rejected");
                return Err(e);
            }
        };

        let mut records = self.records.write();
        let Some(index) = records.iter().position(|r| r.key() == record.key()) else {
            crate::metrics::record_operation("update", "not_found");
            return Err(CacheError::not_found(record.tenant(), record.subscription_id()));
        };
        record.share_runtime_from(&records[index]);
        record.epoch = self.next_epoch();
        let record = Arc::new(record);
        let previous = std::mem::replace(&mut records[index], Arc::clone(&record));
        drop(records);
        drop(previous);

        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("update", "success");
        debug!(
            tenant = %record.tenant(),
            subscription_id = %record.subscription_id(),
            "Subscription updated"
        );
        Ok(record)
    }

    /// First record with this tenant+id.
    #[must_use]
    pub fn lookup(&self, tenant: &str, subscription_id: &str) -> Option<Arc<CachedSubscription>> {
        let tenant = self.tenant_key(tenant);
        let found = self
            .records
            .read()
            .iter()
            .find(|r| r.key() == (tenant, subscription_id))
            .cloned();
        crate::metrics::record_operation("lookup", if found.is_some() { "hit" } else { "miss" });
        found
    }

    /// Remove by tenant+id. Returns the number removed (always 1).
    pub fn remove(&self, tenant: &str, subscription_id: &str) -> Result<usize, CacheError> {
        let tenant = self.tenant_key(tenant);
        let mut records = self.records.write();
        let Some(index) = records.iter().position(|r| r.key() == (tenant, subscription_id)) else {
            drop(records);
            crate::metrics::record_operation("remove", "not_found");
            return Err(CacheError::not_found(tenant, subscription_id));
        };
        let removed = records.remove(index);
        self.note_removal(&removed);
        let items = records.len();
        drop(records);
        drop(removed);

        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("remove", "success");
        crate::metrics::set_items(items);
        info!(tenant = %tenant, subscription_id = %subscription_id, "Subscription removed");
        Ok(1)
    }

    /// Remove this exact record, if it is still in the cache. Returns 0 or 1.
    pub fn remove_record(&self, record: &Arc<CachedSubscription>) -> usize {
        let mut records = self.records.write();
        let Some(index) = records.iter().position(|r| Arc::ptr_eq(r, record)) else {
            return 0;
        };
        let removed = records.remove(index);
        self.note_removal(&removed);
        let items = records.len();
        drop(records);
        drop(removed);

        self.counters.removes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("remove", "success");
        crate::metrics::set_items(items);
        1
    }

    /// Drop every record expired at `now`. Each counts as a removal.
    pub fn purge_expired(&self, now: f64) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut *records)
            .into_iter()
            .partition(|r| r.expiration().is_some_and(|e| e <= now));
        *records = live;
        for r in &expired {
            self.note_removal(r);
        }
        let items = records.len();
        drop(records);

        let purged = before - items;
        if purged > 0 {
            self.counters.removes.fetch_add(purged as u64, Ordering::Relaxed);
            crate::metrics::set_items(items);
            info!(purged, "Expired subscriptions purged");
        }
        drop(expired);
        purged
    }

    /// Number of live records.
    #[must_use]
    pub fn items(&self) -> usize {
        self.records.read().len()
    }

    /// Current population, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<CachedSubscription>> {
        self.records.read().clone()
    }

    // ═══════════════════════════════════════════════════════════════════
    // REFRESH SUPPORT
    // ═══════════════════════════════════════════════════════════════════

    /// Mark the start of a refresh cycle and return its epoch.
    pub(crate) fn begin_cycle(&self) -> u64 {
        *self.tombstones.lock() = Some(Vec::new());
        self.epoch.load(Ordering::Acquire)
    }

    /// Forget a cycle that failed before swapping.
    pub(crate) fn abort_cycle(&self) {
        *self.tombstones.lock() = None;
    }

    #[cfg(test)]
    pub(crate) fn cycle_in_progress(&self) -> bool {
        self.tombstones.lock().is_some()
    }

    fn note_removal(&self, record: &CachedSubscription) {
        if let Some(tombstones) = self.tombstones.lock().as_mut() {
            tombstones.push(Tombstone {
                tenant: record.tenant().to_string(),
                subscription_id: record.subscription_id().to_string(),
                epoch: self.next_epoch(),
            });
        }
    }

    /// Swap in a freshly built population.
    ///
    /// Records mutated after `cycle_epoch` override the fetched set: late
    /// inserts/updates replace or extend it, late removals drop from it.
    /// Returns how many late records were retained.
    pub(crate) fn replace_population(&self, fresh: Vec<CachedSubscription>, cycle_epoch: u64) -> usize {
        let mut fresh: Vec<Arc<CachedSubscription>> = fresh
            .into_iter()
            .map(|mut r| {
                r.epoch = cycle_epoch;
                Arc::new(r)
            })
            .collect();

        let mut records = self.records.write();
        let tombstones = self.tombstones.lock().take().unwrap_or_default();

        fresh.retain(|r| {
            !tombstones
                .iter()
                .any(|t| t.epoch > cycle_epoch && r.key() == (t.tenant.as_str(), t.subscription_id.as_str()))
        });

        let mut retained_late = 0;
        for late in records.iter().filter(|r| r.epoch > cycle_epoch) {
            retained_late += 1;
            match fresh.iter().position(|r| r.key() == late.key()) {
                Some(index) => fresh[index] = Arc::clone(late),
                None => fresh.push(Arc::clone(late)),
            }
        }

        let old = std::mem::replace(&mut *records, fresh);
        let items = records.len();
        drop(records);
        drop(old);

        crate::metrics::set_items(items);
        retained_late
    }

    pub(crate) fn increment_refreshes(&self) {
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}

fn validation_kind(spec: &SubscriptionSpec, error: &CacheError) -> &'static str {
    match error {
        CacheError::Validation { title, .. } if title.starts_with("ngsi-ld query language") => "filter",
        CacheError::Validation { title, .. } if title == "Invalid entity pattern" => "pattern",
        _ if spec.validate().is_err() => "subscription",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{EntitySelector, NotifyOutcome};

    fn cache() -> SubCache {
        SubCache::new(&SubCacheConfig::default())
    }

    fn spec(id: &str) -> SubscriptionSpec {
        SubscriptionSpec::new("", id).with_entity(EntitySelector::exact("E1", "T"))
    }

    fn ids(cache: &SubCache) -> Vec<String> {
        cache.snapshot().iter().map(|r| r.subscription_id().to_string()).collect()
    }

    #[test]
    fn test_insert_lookup_remove() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        assert_eq!(cache.items(), 1);
        assert!(cache.lookup("", "a").is_some());
        assert!(cache.lookup("", "b").is_none());

        assert_eq!(cache.remove("", "a").unwrap(), 1);
        assert_eq!(cache.items(), 0);
        assert!(cache.remove("", "a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let cache = cache();
        for id in ["c", "a", "b"] {
            cache.insert(&spec(id)).unwrap();
        }
        assert_eq!(ids(&cache), vec!["c", "a", "b"]);
        cache.remove("", "a").unwrap();
        assert_eq!(ids(&cache), vec!["c", "b"]);
    }

    #[test]
    fn test_rejected_insert_has_no_side_effects() {
        let cache = cache();
        let bad = SubscriptionSpec::new("", "bad").with_entity(EntitySelector::id_pattern("[", "T"));
        assert!(cache.insert(&bad).unwrap_err().is_validation());
        assert!(cache.insert(&spec("q").with_filter("((A>1)")).unwrap_err().is_validation());
        assert_eq!(cache.items(), 0);
        assert_eq!(cache.statistics(1024).inserts, 0);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        let err = cache.insert(&spec("a")).unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists { .. }));
        assert_eq!(cache.items(), 1);
        assert_eq!(cache.statistics(1024).inserts, 1);
    }

    #[test]
    fn test_single_tenant_folds_tenants() {
        let cache = cache();
        cache.insert(&SubscriptionSpec::new("acme", "a").watching(["x"])).unwrap();
        let record = cache.lookup("other", "a").unwrap();
        assert_eq!(record.tenant(), "");
    }

    #[test]
    fn test_multitenant_keeps_tenants_apart() {
        let cache = SubCache::new(&SubCacheConfig { multitenant: true, ..Default::default() });
        cache.insert(&SubscriptionSpec::new("t1", "a").watching(["x"])).unwrap();
        cache.insert(&SubscriptionSpec::new("t2", "a").watching(["x"])).unwrap();
        assert_eq!(cache.items(), 2);
        assert_eq!(cache.lookup("t2", "a").unwrap().tenant(), "t2");
        assert!(cache.lookup("t3", "a").is_none());
    }

    #[test]
    fn test_update_keeps_position_and_runtime() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        let original = cache.insert(&spec("b")).unwrap();
        cache.insert(&spec("c")).unwrap();
        original.record_outcome(NotifyOutcome::Success, 5.0, 3);

        let updated = cache.update(&spec("b").with_throttling(30.0)).unwrap();
        assert_eq!(ids(&cache), vec!["a", "b", "c"]);
        assert_eq!(updated.throttling(), 30.0);
        assert_eq!(updated.notification_state().last_notification, Some(5.0));
        assert!(updated.shares_runtime_with(&original));
        assert_eq!(cache.statistics(1024).updates, 1);
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let cache = cache();
        assert!(cache.update(&spec("nope")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_record_by_identity() {
        let cache = cache();
        let first = cache.insert(&spec("a")).unwrap();
        cache.update(&spec("a")).unwrap();
        // `first` was replaced by the update
        assert_eq!(cache.remove_record(&first), 0);
        let current = cache.lookup("", "a").unwrap();
        assert_eq!(cache.remove_record(&current), 1);
        assert_eq!(cache.items(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache();
        cache.insert(&spec("old").with_expiration(10.0)).unwrap();
        cache.insert(&spec("new").with_expiration(100.0)).unwrap();
        cache.insert(&spec("forever")).unwrap();
        assert_eq!(cache.purge_expired(50.0), 1);
        assert_eq!(ids(&cache), vec!["new", "forever"]);
        assert_eq!(cache.statistics(1024).removes, 1);
    }

    #[test]
    fn test_replace_population_swaps_everything() {
        let cache = cache();
        cache.insert(&spec("old")).unwrap();
        let epoch = cache.begin_cycle();
        let fresh = vec![cache.build_record(&spec("x")).unwrap(), cache.build_record(&spec("y")).unwrap()];
        assert_eq!(cache.replace_population(fresh, epoch), 0);
        assert_eq!(ids(&cache), vec!["x", "y"]);
    }

    #[test]
    fn test_late_insert_survives_swap() {
        let cache = cache();
        let epoch = cache.begin_cycle();
        cache.insert(&spec("late")).unwrap();
        let fresh = vec![cache.build_record(&spec("x")).unwrap()];
        assert_eq!(cache.replace_population(fresh, epoch), 1);
        assert_eq!(ids(&cache), vec!["x", "late"]);
    }

    #[test]
    fn test_late_update_wins_over_fetched_version() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        let epoch = cache.begin_cycle();
        cache.update(&spec("a").with_throttling(9.0)).unwrap();
        let fresh = vec![cache.build_record(&spec("a")).unwrap()];
        cache.replace_population(fresh, epoch);
        assert_eq!(cache.lookup("", "a").unwrap().throttling(), 9.0);
        assert_eq!(cache.items(), 1);
    }

    #[test]
    fn test_late_remove_survives_swap() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        cache.insert(&spec("b")).unwrap();
        let epoch = cache.begin_cycle();
        cache.remove("", "a").unwrap();
        let fresh = vec![cache.build_record(&spec("a")).unwrap(), cache.build_record(&spec("b")).unwrap()];
        cache.replace_population(fresh, epoch);
        assert_eq!(ids(&cache), vec!["b"]);
    }

    #[test]
    fn test_removal_outside_cycle_leaves_no_tombstone() {
        let cache = cache();
        cache.insert(&spec("a")).unwrap();
        cache.remove("", "a").unwrap();
        let epoch = cache.begin_cycle();
        let fresh = vec![cache.build_record(&spec("a")).unwrap()];
        cache.replace_population(fresh, epoch);
        assert_eq!(ids(&cache), vec!["a"]);
    }
}
