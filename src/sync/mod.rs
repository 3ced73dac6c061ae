//! Refresh cycles against the persistent store.
//!
//! The [`Synchronizer`] is either idle or synchronizing. A cycle:
//!
//! 1. pushes dirty notification counters back to the store (optional)
//! 2. fetches every active subscription in scope, with retry
//! 3. compiles each one off to the side, skipping and reporting bad records
//! 4. carries runtime state forward from the current population
//! 5. swaps the new population in under the store's write lock
//!
//! Only one cycle runs at a time. A trigger that arrives while a cycle is
//! running is coalesced into it. A failed fetch leaves the previous
//! population untouched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::cache::SubCache;
use crate::error::CacheError;
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::{StatsUpdate, StorageError, SubscriptionStore, TenantScope};
use crate::subscription::{epoch_secs, CachedSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Synchronizing,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Synchronizing => write!(f, "Synchronizing"),
        }
    }
}

/// A fetched subscription that did not make it into the new population.
#[derive(Debug, Clone)]
pub struct SkippedSubscription {
    pub tenant: String,
    pub subscription_id: String,
    pub error: CacheError,
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Records built from the fetch
    pub loaded: usize,
    pub skipped: Vec<SkippedSubscription>,
    /// Fetched records that were already expired
    pub expired: usize,
    /// Records whose runtime state came from the previous population
    pub carried_forward: usize,
    /// Records mutated during the cycle that overrode the fetch
    pub retained_late: usize,
    /// Notification counters pushed to the store first
    pub written_back: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another cycle was already running
    Coalesced,
}

impl RefreshOutcome {
    #[must_use]
    pub fn report(&self) -> Option<&RefreshReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Coalesced => None,
        }
    }

    #[must_use]
    pub fn is_coalesced(&self) -> bool {
        matches!(self, Self::Coalesced)
    }
}

pub struct Synchronizer {
    cache: Arc<SubCache>,
    store: Arc<dyn SubscriptionStore>,
    scope: TenantScope,
    retry: RwLock<RetryConfig>,
    write_back: AtomicBool,
    closed: AtomicBool,
    state: watch::Sender<SyncState>,
    state_rx: watch::Receiver<SyncState>,
    /// Held for the duration of a cycle
    cycle: Mutex<()>,
}

impl Synchronizer {
    pub fn new(cache: Arc<SubCache>, store: Arc<dyn SubscriptionStore>, scope: TenantScope) -> Self {
        let (state, state_rx) = watch::channel(SyncState::Idle);
        Self {
            cache,
            store,
            scope,
            retry: RwLock::new(RetryConfig::refresh()),
            write_back: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            state,
            state_rx,
            cycle: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_retry(self, config: RetryConfig) -> Self {
        *self.retry.write() = config;
        self
    }

    pub fn set_retry(&self, config: RetryConfig) {
        *self.retry.write() = config;
    }

    pub fn set_write_back(&self, enabled: bool) {
        self.write_back.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<SubCache> {
        &self.cache
    }

    /// Refuse further cycles. A running cycle is left to finish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until no cycle is running.
    pub async fn wait_idle(&self) {
        let _cycle = self.cycle.lock().await;
    }

    /// Run one refresh cycle, or coalesce into the one already running.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshOutcome, CacheError> {
        if self.is_closed() {
            return Err(CacheError::ShuttingDown);
        }
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("Refresh already in progress, trigger coalesced");
            crate::metrics::record_refresh_coalesced();
            return Ok(RefreshOutcome::Coalesced);
        };
        if self.is_closed() {
            return Err(CacheError::ShuttingDown);
        }

        let _ = self.state.send(SyncState::Synchronizing);
        let mut guard = CycleGuard {
            sync: self,
            swapped: false,
            finished: false,
        };
        let result = self.run_cycle(&mut guard).await;
        guard.finished = true;
        result.map(RefreshOutcome::Completed)
    }

    async fn run_cycle(&self, guard: &mut CycleGuard<'_>) -> Result<RefreshReport, CacheError> {
        let start = Instant::now();

        let written_back = if self.write_back.load(Ordering::Relaxed) {
            match self.write_back().await {
                Ok(written) => written,
                Err(e) => {
                    warn!(error = %e, "Notification write-back failed, counters stay dirty");
                    0
                }
            }
        } else {
            0
        };

        let cycle_epoch = self.cache.begin_cycle();
        let retry_config = self.retry.read().clone();
        let fetched = match retry("fetch_active_subscriptions", &retry_config, || {
            self.store.fetch_active_subscriptions(&self.scope)
        })
        .await
        {
            Ok(specs) => specs,
            Err(e) => {
                self.cache.abort_cycle();
                crate::metrics::record_refresh(false, start.elapsed());
                error!(error = %e, "Refresh failed, keeping previous subscriptions");
                return Err(CacheError::Storage(e));
            }
        };
        let fetched_count = fetched.len();

        let previous: HashMap<(String, String), Arc<CachedSubscription>> = self
            .cache
            .snapshot()
            .into_iter()
            .map(|r| ((r.tenant().to_string(), r.subscription_id().to_string()), r))
            .collect();

        let now = epoch_secs();
        let mut report = RefreshReport {
            written_back,
            ..Default::default()
        };
        let mut seen = HashSet::with_capacity(fetched_count);
        let mut fresh = Vec::with_capacity(fetched_count);

        for spec in fetched {
            if spec.is_expired_at(now) {
                report.expired += 1;
                continue;
            }
            let mut record = match self.cache.build_record(&spec) {
                Ok(record) => record,
                Err(error) => {
                    report.skipped.push(SkippedSubscription {
                        tenant: spec.tenant.clone(),
                        subscription_id: spec.subscription_id.clone(),
                        error,
                    });
                    continue;
                }
            };
            let key = (record.tenant().to_string(), record.subscription_id().to_string());
            if !seen.insert(key.clone()) {
                warn!(
                    tenant = %key.0,
                    subscription_id = %key.1,
                    "Store returned a duplicate subscription, keeping the first"
                );
                report.skipped.push(SkippedSubscription {
                    error: CacheError::AlreadyExists {
                        tenant: key.0.clone(),
                        subscription_id: key.1.clone(),
                    },
                    tenant: key.0,
                    subscription_id: key.1,
                });
                continue;
            }
            if let Some(existing) = previous.get(&key) {
                record.share_runtime_from(existing);
                report.carried_forward += 1;
            }
            fresh.push(record);
        }
        drop(previous);

        report.loaded = fresh.len();
        report.retained_late = self.cache.replace_population(fresh, cycle_epoch);
        guard.swapped = true;
        self.cache.increment_refreshes();
        report.duration = start.elapsed();

        crate::metrics::record_refresh(true, report.duration);
        crate::metrics::record_refresh_skipped(report.skipped.len());
        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "Refresh skipped invalid subscriptions");
        }
        info!(
            fetched = fetched_count,
            loaded = report.loaded,
            expired = report.expired,
            carried_forward = report.carried_forward,
            retained_late = report.retained_late,
            written_back = report.written_back,
            duration_ms = report.duration.as_millis() as u64,
            "Subscription cache refreshed"
        );
        Ok(report)
    }

    /// Push every dirty notification state to the store. On failure the
    /// records are marked dirty again.
    pub async fn write_back(&self) -> Result<usize, StorageError> {
        let mut taken = PendingWriteBack {
            records: Vec::new(),
            persisted: false,
        };
        let mut updates = Vec::new();
        for record in self.cache.snapshot() {
            if let Some(state) = record.take_dirty() {
                updates.push(StatsUpdate {
                    tenant: record.tenant().to_string(),
                    subscription_id: record.subscription_id().to_string(),
                    last_notification: state.last_notification,
                    last_success: state.last_success,
                    last_failure: state.last_failure,
                    count: state.count,
                });
                taken.records.push(record);
            }
        }
        if updates.is_empty() {
            return Ok(0);
        }

        match self.store.write_notification_stats(&updates).await {
            Ok(written) => {
                taken.persisted = true;
                crate::metrics::record_write_back(written, true);
                debug!(pending = updates.len(), written, "Notification counters written back");
                Ok(written)
            }
            Err(e) => {
                crate::metrics::record_write_back(0, false);
                Err(e)
            }
        }
    }
}

/// Ends a cycle however its future ends. Until the swap happens the
/// store's removal log is disarmed again on drop.
struct CycleGuard<'a> {
    sync: &'a Synchronizer,
    swapped: bool,
    finished: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.swapped {
            self.sync.cache.abort_cycle();
        }
        if !self.finished {
            warn!(swapped = self.swapped, "Refresh cycle cancelled before completing");
        }
        let _ = self.sync.state.send(SyncState::Idle);
    }
}

/// Records whose dirty flag was taken for a write-back. Dropped before
/// the store confirms, they are marked dirty again.
struct PendingWriteBack {
    records: Vec<Arc<CachedSubscription>>,
    persisted: bool,
}

impl Drop for PendingWriteBack {
    fn drop(&mut self) {
        if !self.persisted {
            for record in &self.records {
                record.mark_dirty();
            }
        }
    }
}
