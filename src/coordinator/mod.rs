// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine coordinator.
//!
//! The [`SubCacheEngine`] ties together the components a broker process
//! needs:
//! - the [`SubCache`] record store and match dispatcher
//! - the [`Synchronizer`] and its refresh timer
//! - runtime configuration updates over a watch channel
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Ready → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subcache::{EngineState, InMemorySubscriptionStore, SubCacheConfig, SubCacheEngine};
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SubCacheConfig::default();
//! let (_tx, rx) = watch::channel(config.clone());
//! let store = Arc::new(InMemorySubscriptionStore::new());
//! let engine = SubCacheEngine::new(config, rx, store);
//!
//! assert_eq!(engine.state(), EngineState::Created);
//! engine.start().await.expect("initial load failed");
//! assert!(engine.is_ready());
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{EngineState, HealthCheck};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};

use crate::cache::SubCache;
use crate::config::SubCacheConfig;
use crate::resilience::retry::RetryConfig;
use crate::storage::{SubscriptionStore, TenantScope};
use crate::sync::Synchronizer;

/// Main subscription cache coordinator.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`. Wrap it in an `Arc` to run the timer loop
/// on one task while request handlers call the API from others.
pub struct SubCacheEngine {
    /// Configuration (can be updated at runtime via watch channel)
    pub(super) config: RwLock<SubCacheConfig>,

    /// Runtime config updates, owned by the run loop while it runs
    pub(super) config_rx: Mutex<watch::Receiver<SubCacheConfig>>,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<EngineState>,

    /// Signals the run loop to exit
    pub(super) shutdown: watch::Sender<bool>,

    pub(super) cache: Arc<SubCache>,

    pub(super) sync: Arc<Synchronizer>,
}

impl SubCacheEngine {
    /// Create a new engine over every tenant in the store.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to load subscriptions and transition to `Ready`.
    pub fn new(
        config: SubCacheConfig,
        config_rx: watch::Receiver<SubCacheConfig>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self::with_scope(config, config_rx, store, TenantScope::All)
    }

    /// Create a new engine that only loads the given tenants.
    pub fn with_scope(
        config: SubCacheConfig,
        config_rx: watch::Receiver<SubCacheConfig>,
        store: Arc<dyn SubscriptionStore>,
        scope: TenantScope,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown, _) = watch::channel(false);

        let cache = Arc::new(SubCache::new(&config));
        let sync = Synchronizer::new(Arc::clone(&cache), store, scope)
            .with_retry(refresh_retry(&config));
        sync.set_write_back(config.write_back_on_refresh);

        Self {
            config: RwLock::new(config),
            config_rx: Mutex::new(config_rx),
            state: state_tx,
            state_rx,
            shutdown,
            cache,
            sync: Arc::new(sync),
        }
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if the engine has loaded its subscriptions.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready | EngineState::Running)
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> SubCacheConfig {
        self.config.read().clone()
    }

    /// The underlying record store.
    #[must_use]
    pub fn cache(&self) -> &Arc<SubCache> {
        &self.cache
    }

    #[must_use]
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let ready = matches!(state, EngineState::Ready | EngineState::Running);
        let stats = self.cache.statistics(0);
        HealthCheck {
            state,
            ready,
            sync_state: self.sync.state(),
            items: stats.items,
            refreshes: stats.refreshes,
            needing_attention: stats.needing_attention,
            healthy: ready && stats.needing_attention == 0,
        }
    }

    #[must_use]
    pub fn is_cache_enabled(&self) -> bool {
        self.config.read().cache_enabled
    }

    pub(super) fn set_state(&self, state: EngineState) {
        let _ = self.state.send(state);
        crate::metrics::set_engine_state(state.as_u8());
    }

    /// Push tunable settings into the components. Tenancy is fixed at
    /// construction.
    pub(super) fn apply_config(&self, new_config: SubCacheConfig) {
        let mut config = self.config.write();
        if new_config.multitenant != config.multitenant {
            tracing::warn!(
                multitenant = config.multitenant,
                requested = new_config.multitenant,
                "Tenancy mode cannot change at runtime, ignoring"
            );
        }
        self.cache.set_failure_threshold(new_config.failure_threshold);
        self.cache.set_stats_list_max_bytes(new_config.stats_list_max_bytes);
        self.sync.set_write_back(new_config.write_back_on_refresh);
        self.sync.set_retry(refresh_retry(&new_config));
        *config = SubCacheConfig {
            multitenant: config.multitenant,
            ..new_config
        };
    }
}

pub(super) fn refresh_retry(config: &SubCacheConfig) -> RetryConfig {
    RetryConfig::refresh()
        .with_max_attempts(config.refresh_fetch_retries)
        .with_initial_delay(Duration::from_millis(config.refresh_retry_delay_ms))
}
