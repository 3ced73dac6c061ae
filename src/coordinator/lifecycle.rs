//! Engine lifecycle management: start, run loop, shutdown.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::CacheError;
use crate::resilience::retry::RetryConfig;
use crate::subscription::epoch_secs;
use crate::sync::RefreshOutcome;

use super::{refresh_retry, EngineState, SubCacheEngine};

impl SubCacheEngine {
    /// Load the initial population from the store.
    ///
    /// Uses the more patient startup retry schedule. On failure the engine
    /// stays `Created`, so the caller may try again.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), CacheError> {
        if self.state() != EngineState::Created {
            return Err(CacheError::Internal(format!(
                "engine cannot start from state {}",
                self.state()
            )));
        }
        let startup_start = std::time::Instant::now();
        info!("Starting subscription cache engine...");
        self.set_state(EngineState::Starting);

        if !self.is_cache_enabled() {
            self.set_state(EngineState::Ready);
            info!("Subscription cache disabled, skipping initial load");
            return Ok(());
        }

        let configured = refresh_retry(&self.config.read());
        self.sync.set_retry(
            RetryConfig::startup().with_initial_delay(configured.initial_delay),
        );
        let result = self.sync.refresh().await;
        self.sync.set_retry(configured);

        match result {
            Ok(outcome) => {
                let loaded = outcome.report().map_or(0, |r| r.loaded);
                self.set_state(EngineState::Ready);
                info!(
                    loaded,
                    duration_ms = startup_start.elapsed().as_millis() as u64,
                    "Subscription cache engine ready"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Initial subscription load failed");
                self.set_state(EngineState::Created);
                Err(e)
            }
        }
    }

    /// Perform one timer tick by hand (for callers driving their own loop).
    pub async fn tick(&self) {
        self.timed_refresh().await;
    }

    /// Run the timer loop until [`shutdown()`](Self::shutdown).
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) {
        self.set_state(EngineState::Running);
        info!("Subscription cache engine running");

        let mut config_rx = self.config_rx.lock().await;
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }
        let mut ticker = refresh_ticker(self.config.read().refresh_interval_secs);

        loop {
            tokio::select! {
                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    let interval_changed =
                        new_config.refresh_interval_secs != self.config.read().refresh_interval_secs;
                    info!(
                        refresh_interval_secs = new_config.refresh_interval_secs,
                        failure_threshold = new_config.failure_threshold,
                        "Config updated"
                    );
                    if interval_changed {
                        ticker = refresh_ticker(new_config.refresh_interval_secs);
                    }
                    self.apply_config(new_config);
                }

                () = next_tick(&mut ticker) => {
                    if !self.timed_refresh().await {
                        break;
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Run loop stopped");
    }

    /// Refresh and purge on a timer tick. Returns false once the
    /// synchronizer has been closed.
    async fn timed_refresh(&self) -> bool {
        if !self.is_cache_enabled() {
            debug!("Subscription cache disabled, skipping timed refresh");
            return !self.sync.is_closed();
        }
        match self.sync.refresh().await {
            Ok(RefreshOutcome::Completed(_)) => {
                self.cache.purge_expired(epoch_secs());
                true
            }
            Ok(RefreshOutcome::Coalesced) => true,
            Err(CacheError::ShuttingDown) => false,
            // already logged by the synchronizer; the next tick retries
            Err(_) => true,
        }
    }

    /// Initiate graceful shutdown.
    ///
    /// Stops the run loop, waits for an in-flight refresh and writes dirty
    /// notification counters back one last time.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = std::time::Instant::now();
        info!("Initiating subscription cache shutdown...");
        self.set_state(EngineState::ShuttingDown);
        self.shutdown.send_replace(true);

        self.sync.close();
        self.sync.wait_idle().await;

        if self.config.read().write_back_on_refresh {
            match self.sync.write_back().await {
                Ok(written) => info!(written, "Final notification write-back complete"),
                Err(e) => warn!(error = %e, "Final notification write-back failed"),
            }
        }

        self.set_state(EngineState::Stopped);
        info!(
            duration_ms = shutdown_start.elapsed().as_millis() as u64,
            "Subscription cache shutdown complete"
        );
    }
}

/// `None` when the timer is disabled. The first tick is one full period
/// out, since `start()` just loaded.
fn refresh_ticker(interval_secs: u64) -> Option<Interval> {
    if interval_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::super::SubCacheEngine;
    use super::*;
    use crate::config::SubCacheConfig;
    use crate::storage::{InMemorySubscriptionStore, StorageError, SubscriptionStore, TenantScope};
    use crate::subscription::{EntitySelector, SubscriptionSpec};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::watch;

    struct DownStore;

    #[async_trait]
    impl SubscriptionStore for DownStore {
        async fn fetch_active_subscriptions(
            &self,
            _scope: &TenantScope,
        ) -> Result<Vec<SubscriptionSpec>, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
    }

    fn spec(id: &str) -> SubscriptionSpec {
        SubscriptionSpec::new("", id).with_entity(EntitySelector::exact("E", "T"))
    }

    fn fast_config() -> SubCacheConfig {
        SubCacheConfig {
            refresh_interval_secs: 1,
            refresh_retry_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_loads_and_becomes_ready() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store.put(spec("a"));
        let config = fast_config();
        let (_tx, rx) = watch::channel(config.clone());
        let engine = SubCacheEngine::new(config, rx, store);

        engine.start().await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.cache().items(), 1);
        assert!(engine.start().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_store_down() {
        let config = fast_config();
        let (_tx, rx) = watch::channel(config.clone());
        let engine = SubCacheEngine::new(config, rx, Arc::new(DownStore));

        assert!(matches!(engine.start().await, Err(CacheError::Storage(_))));
        assert_eq!(engine.state(), EngineState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_refreshes_on_timer() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let config = fast_config();
        let (_tx, rx) = watch::channel(config.clone());
        let engine = Arc::new(SubCacheEngine::new(config, rx, store.clone()));
        engine.start().await.unwrap();

        let runner = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run().await }
        });

        store.put(spec("later"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(engine.cache().items(), 1);
        assert_eq!(engine.state(), EngineState::Running);

        engine.shutdown().await;
        runner.await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_applied_by_run_loop() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let config = SubCacheConfig { refresh_interval_secs: 0, ..Default::default() };
        let (tx, rx) = watch::channel(config.clone());
        let engine = Arc::new(SubCacheEngine::new(config, rx, store));
        engine.start().await.unwrap();

        let runner = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run().await }
        });
        tokio::task::yield_now().await;

        tx.send(SubCacheConfig { failure_threshold: 9, ..Default::default() }).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.cache().failure_threshold(), 9);

        engine.shutdown().await;
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_cache_never_loads() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        store.put(spec("a"));
        let config = SubCacheConfig { cache_enabled: false, ..fast_config() };
        let (tx, rx) = watch::channel(config.clone());
        let engine = Arc::new(SubCacheEngine::new(config, rx, store));

        engine.start().await.unwrap();
        assert!(engine.is_ready());
        assert_eq!(engine.cache().items(), 0);

        let runner = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run().await }
        });
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(engine.cache().items(), 0);
        assert!(matches!(engine.refresh_now().await, Err(CacheError::Disabled)));

        // enabling at runtime resumes timed refreshes
        tx.send(fast_config()).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(engine.cache().items(), 1);

        engine.shutdown().await;
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_after_shutdown_refused() {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let config = SubCacheConfig::default();
        let (_tx, rx) = watch::channel(config.clone());
        let engine = SubCacheEngine::new(config, rx, store);
        engine.start().await.unwrap();
        engine.shutdown().await;
        assert!(matches!(engine.refresh_now().await, Err(CacheError::ShuttingDown)));
    }
}
