// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the subscription cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding broker is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `subcache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: insert, update, remove, lookup
//! - `status`: success, rejected, duplicate, not_found, hit, miss
//! - `result`: matched, throttled

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a store operation
pub fn record_operation(operation: &str, status: &str) {
    counter!(
        "subcache_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "subcache_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a rejected subscription (`pattern`, `filter`, `subscription`)
pub fn record_validation_error(kind: &str) {
    counter!(
        "subcache_validation_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set current number of cached subscriptions
pub fn set_items(count: usize) {
    gauge!("subcache_items").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// MATCHING - Dispatcher throughput
// ═══════════════════════════════════════════════════════════════════════════

/// Record one dispatcher pass
pub fn record_match_latency(duration: Duration) {
    histogram!("subcache_match_seconds").record(duration.as_secs_f64());
}

/// Record subscriptions matched or suppressed in one pass
pub fn record_matches(result: &'static str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "subcache_matches_total",
        "result" => result
    )
    .increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REFRESH - Synchronizer cycles
// ═══════════════════════════════════════════════════════════════════════════

/// Record a refresh cycle
pub fn record_refresh(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "subcache_refresh_total",
        "status" => status
    )
    .increment(1);
    histogram!("subcache_refresh_seconds").record(duration.as_secs_f64());
}

/// Record a refresh trigger that coalesced into a running cycle
pub fn record_refresh_coalesced() {
    counter!(
        "subcache_refresh_total",
        "status" => "coalesced"
    )
    .increment(1);
}

/// Record subscriptions skipped while rebuilding
pub fn record_refresh_skipped(count: usize) {
    if count > 0 {
        counter!("subcache_refresh_skipped_total").increment(count as u64);
    }
}

/// Record notification counters written back to the store
pub fn record_write_back(count: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "subcache_write_back_total",
        "status" => status
    )
    .increment(1);

    if success {
        counter!("subcache_written_back_items_total").increment(count as u64);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS - Outcome tracking
// ═══════════════════════════════════════════════════════════════════════════

/// Record a notification attempt outcome
pub fn record_notification(outcome: &'static str) {
    counter!(
        "subcache_notifications_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a subscription crossing the failure threshold
pub fn record_attention() {
    counter!("subcache_attention_total").increment(1);
}

/// Set engine state (numeric, for dashboards)
pub fn set_engine_state(state: u8) {
    gauge!("subcache_engine_state").set(f64::from(state));
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
