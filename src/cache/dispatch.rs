//! Match dispatcher.
//!
//! Walks the store under the read lock and returns, in insertion order,
//! every subscription an entity change must notify. A record matches when
//! all of the following hold:
//!
//! 1. tenant and service path scope the entity
//! 2. it is active and not expired
//! 3. one of its selectors matches the entity id and type (no selectors
//!    matches any entity)
//! 4. some changed attribute passes both the watched-attribute set
//!    (inverted when blacklisted) and the notify-condition set
//! 5. its `q` filter, if any, holds for the entity's full current state
//! 6. it is not inside its throttling window
//!
//! Throttled records are counted on the record and left out of the result.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use super::SubCache;
use crate::pattern::any_matches;
use crate::query::EntityAttributes;
use crate::subscription::CachedSubscription;

/// An incoming entity change.
#[derive(Debug, Clone, Copy)]
pub struct EntityUpdate<'a> {
    pub tenant: &'a str,
    pub service_path: &'a str,
    pub entity_id: &'a str,
    pub entity_type: &'a str,
    /// The entity's full current attribute state
    pub attributes: &'a EntityAttributes,
}

/// Hierarchical service-path scoping: `/a` covers `/a` and `/a/b`, `/`
/// covers everything. A trailing `/#` is accepted and means the same.
#[must_use]
pub fn service_path_matches(subscription_path: &str, entity_path: &str) -> bool {
    let scope = normalize_path(subscription_path);
    if scope.is_empty() {
        return true;
    }
    let path = normalize_path(entity_path);
    path == scope || path.strip_prefix(scope).is_some_and(|rest| rest.starts_with('/'))
}

/// `/a/b/#` and `/a/b/` become `/a/b`; `/` becomes empty.
fn normalize_path(path: &str) -> &str {
    let path = path.strip_suffix("/#").unwrap_or(path);
    path.trim_end_matches('/')
}

impl SubCache {
    /// Subscriptions to notify for a change of one attribute.
    pub fn match_attribute(
        &self,
        update: &EntityUpdate<'_>,
        changed: &str,
        now: f64,
    ) -> Vec<Arc<CachedSubscription>> {
        self.match_attributes(update, &[changed], now)
    }

    /// Subscriptions to notify for a change of several attributes.
    ///
    /// Same result as calling [`match_attribute`](Self::match_attribute)
    /// once per changed attribute and merging without duplicates.
    pub fn match_attributes<S: AsRef<str>>(
        &self,
        update: &EntityUpdate<'_>,
        changed: &[S],
        now: f64,
    ) -> Vec<Arc<CachedSubscription>> {
        let start = Instant::now();
        let tenant = self.tenant_key(update.tenant);
        let mut matched = Vec::new();
        let mut throttled = 0usize;

        {
            let records = self.records.read();
            for record in records.iter() {
                if !conditions_hold(record, tenant, update, changed, now) {
                    continue;
                }
                if record.check_throttle(now) {
                    trace!(subscription_id = %record.subscription_id(), "Match throttled");
                    throttled += 1;
                    continue;
                }
                matched.push(Arc::clone(record));
            }
        }

        crate::metrics::record_match_latency(start.elapsed());
        crate::metrics::record_matches("matched", matched.len());
        crate::metrics::record_matches("throttled", throttled);
        debug!(
            entity_id = %update.entity_id,
            entity_type = %update.entity_type,
            matched = matched.len(),
            throttled,
            "Entity change matched"
        );
        matched
    }
}

fn conditions_hold<S: AsRef<str>>(
    record: &CachedSubscription,
    tenant: &str,
    update: &EntityUpdate<'_>,
    changed: &[S],
    now: f64,
) -> bool {
    record.tenant() == tenant
        && service_path_matches(record.service_path(), update.service_path)
        && record.is_active_at(now)
        && (record.entities().is_empty() || any_matches(record.entities(), update.entity_id, update.entity_type))
        && changed.iter().any(|a| attribute_triggers(record, a.as_ref()))
        && record.filter().map_or(true, |f| f.evaluate(update.attributes))
}

/// Watched-attribute and notify-condition checks for one changed attribute.
fn attribute_triggers(record: &CachedSubscription, attr: &str) -> bool {
    let watched = record.watched_attributes();
    let watch_ok = watched.is_empty() || (watched.iter().any(|w| w == attr) != record.blacklist());
    let conditions = record.notify_conditions();
    let condition_ok = conditions.is_empty() || conditions.iter().any(|c| c == attr);
    watch_ok && condition_ok
}
