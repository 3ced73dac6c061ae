//! Configuration for the subscription cache.
//!
//! # Example
//!
//! ```
//! use subcache::SubCacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SubCacheConfig::default();
//! assert_eq!(config.refresh_interval_secs, 60);
//!
//! // Multi-tenant broker that refreshes every 10 seconds
//! let config = SubCacheConfig {
//!     multitenant: true,
//!     refresh_interval_secs: 10,
//!     failure_threshold: 5,
//!     ..Default::default()
//! };
//! assert!(config.write_back_on_refresh);
//! ```

use serde::Deserialize;

/// Configuration for the subscription cache.
///
/// All fields have sensible defaults. Most deployments only tune
/// `refresh_interval_secs` and `multitenant`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubCacheConfig {
    /// Seconds between timer-driven refresh cycles (0 = timer disabled)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// When false every tenant string is folded into the default tenant ("")
    #[serde(default)]
    pub multitenant: bool,

    /// Consecutive notification failures before a subscription is flagged
    /// for administrative attention (0 = never flag)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Default byte bound of the identifier list in statistics snapshots
    #[serde(default = "default_stats_list_max_bytes")]
    pub stats_list_max_bytes: usize,

    /// Store fetch attempts per refresh cycle
    #[serde(default = "default_refresh_fetch_retries")]
    pub refresh_fetch_retries: usize,

    /// Initial backoff between fetch attempts, in milliseconds
    #[serde(default = "default_refresh_retry_delay_ms")]
    pub refresh_retry_delay_ms: u64,

    /// Push dirty notification counters to the store before each refresh
    #[serde(default = "default_write_back_on_refresh")]
    pub write_back_on_refresh: bool,

    /// When false the store is never loaded and statistics read as zero
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
}

fn default_refresh_interval_secs() -> u64 { 60 }
fn default_failure_threshold() -> u32 { 3 }
fn default_stats_list_max_bytes() -> usize { 1024 }
fn default_refresh_fetch_retries() -> usize { 3 }
fn default_refresh_retry_delay_ms() -> u64 { 100 }
fn default_write_back_on_refresh() -> bool { true }
fn default_cache_enabled() -> bool { true }

impl Default for SubCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            multitenant: false,
            failure_threshold: default_failure_threshold(),
            stats_list_max_bytes: default_stats_list_max_bytes(),
            refresh_fetch_retries: default_refresh_fetch_retries(),
            refresh_retry_delay_ms: default_refresh_retry_delay_ms(),
            write_back_on_refresh: default_write_back_on_refresh(),
            cache_enabled: default_cache_enabled(),
        }
    }
}
