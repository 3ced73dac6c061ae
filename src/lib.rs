//! # Subcache
//!
//! An in-memory context subscription cache and matching engine for an
//! NGSI-style context broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  REST / notification layer                  │
//! │  • Subscription CRUD, entity updates, notification results │
//! └─────────────────────────────────────────────────────────────┘
//!              │ insert/update/remove        │ match / notify_outcome
//!              ▼                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SubCache (record store)                     │
//! │  • Insertion-ordered records behind one RwLock             │
//! │  • Compiled entity patterns and q filters per record       │
//! │  • Per-record notification state, individually locked      │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                   (off-lock rebuild, swap under lock)
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Synchronizer (refresh cycles)               │
//! │  • Timer-driven or explicit, one cycle at a time           │
//! │  • Runtime state carried forward, late writes win          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               SubscriptionStore (persistent)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use subcache::query::attributes_from_json;
//! use subcache::subscription::{EntitySelector, SubscriptionSpec};
//! use subcache::{EntityUpdate, InMemorySubscriptionStore, SubCacheConfig, SubCacheEngine};
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SubCacheConfig::default();
//!     let (_tx, rx) = watch::channel(config.clone());
//!     let store = Arc::new(InMemorySubscriptionStore::new());
//!     let engine = SubCacheEngine::new(config, rx, store);
//!     engine.start().await.expect("Failed to start");
//!
//!     engine
//!         .insert(
//!             &SubscriptionSpec::new("", "urn:ngsi-ld:Subscription:hot-rooms")
//!                 .with_entity(EntitySelector::id_pattern("Room.*", "Room"))
//!                 .with_filter("temperature>25"),
//!         )
//!         .expect("valid subscription");
//!
//!     let attributes = attributes_from_json(json!({"temperature": 28}));
//!     let update = EntityUpdate {
//!         tenant: "",
//!         service_path: "/",
//!         entity_id: "Room7",
//!         entity_type: "Room",
//!         attributes: &attributes,
//!     };
//!     for record in engine.match_attribute(&update, "temperature") {
//!         println!("notify {}", record.subscription_id());
//!     }
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SubCacheEngine`] lifecycle and API facade
//! - [`cache`]: Record store, match dispatcher, statistics
//! - [`sync`]: Refresh cycles against the persistent store
//! - [`query`]: `q` filter lexer, validator, parser and evaluator
//! - [`pattern`]: Entity id/type matchers
//! - [`subscription`]: Persisted and compiled subscription forms
//! - [`storage`]: Persistent store trait and in-memory implementation
//! - [`resilience`]: Retry with backoff

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod query;
pub mod resilience;
pub mod storage;
pub mod subscription;
pub mod sync;

pub use cache::{CacheStatistics, EntityUpdate, SubCache};
pub use config::SubCacheConfig;
pub use coordinator::{EngineState, HealthCheck, SubCacheEngine};
pub use error::CacheError;
pub use metrics::LatencyTimer;
pub use query::{EntityAttributes, QueryError, QueryFilter};
pub use resilience::retry::RetryConfig;
pub use storage::{InMemorySubscriptionStore, StatsUpdate, StorageError, SubscriptionStore, TenantScope};
pub use subscription::{CachedSubscription, NotifyOutcome, SubscriptionSpec};
pub use sync::{RefreshOutcome, RefreshReport, Synchronizer};
