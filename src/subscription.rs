//! Subscription data model.
//!
//! [`SubscriptionSpec`] is the raw field set exchanged with the persistent
//! store. [`CachedSubscription`] is the compiled, matchable form the cache
//! holds: selectors and filter are compiled once at admission, and the
//! per-record [`NotificationState`] sits behind its own lock so statistics
//! updates never need the store lock.
//!
//! # Example
//!
//! ```
//! use subcache::subscription::{CachedSubscription, EntitySelector, SubscriptionSpec};
//!
//! let spec = SubscriptionSpec::new("", "urn:ngsi-ld:Subscription:1")
//!     .with_entity(EntitySelector::exact("Room1", "Room"))
//!     .watching(["temperature"])
//!     .with_filter("temperature>20")
//!     .with_throttling(10.0);
//!
//! let record = CachedSubscription::compile(&spec).unwrap();
//! assert_eq!(record.subscription_id(), "urn:ngsi-ld:Subscription:1");
//! assert!(record.filter().is_some());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::pattern::EntityInfo;
use crate::query::QueryFilter;
use crate::storage::StorageError;

/// Seconds since the Unix epoch, as the store records timestamps.
#[must_use]
pub fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

// ═══════════════════════════════════════════════════════════════════════════
// RAW FIELDS - what the store and REST layer exchange
// ═══════════════════════════════════════════════════════════════════════════

/// An (id, type) selector; either side may be a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySelector {
    pub id: String,
    #[serde(default)]
    pub id_is_pattern: bool,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub type_is_pattern: bool,
}

impl EntitySelector {
    #[must_use]
    pub fn exact(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            id_is_pattern: false,
            entity_type: entity_type.into(),
            type_is_pattern: false,
        }
    }

    #[must_use]
    pub fn id_pattern(pattern: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: pattern.into(),
            id_is_pattern: true,
            entity_type: entity_type.into(),
            type_is_pattern: false,
        }
    }

    /// Any entity of the given type (id pattern `.*`).
    #[must_use]
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self::id_pattern(".*", entity_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderFormat {
    Legacy,
    #[default]
    Normalized,
    KeyValues,
    Values,
    Concise,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeType {
    #[default]
    Json,
    JsonLd,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

/// Notification endpoint descriptor, passed through to the notifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpInfo {
    pub url: String,
    pub verb: HttpVerb,
    pub headers: BTreeMap<String, String>,
    pub payload: Option<String>,
    pub mime_type: MimeType,
    pub custom: bool,
}

/// Geo-query clause. Carried and rendered, never evaluated here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeoQuery {
    pub geometry: String,
    pub coordinates: String,
    pub georel: String,
    pub geoproperty: Option<String>,
}

/// A subscription as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub tenant: String,
    #[serde(rename = "id")]
    pub subscription_id: String,
    pub service_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ld_context: Option<String>,
    pub entities: Vec<EntitySelector>,
    pub watched_attributes: Vec<String>,
    pub watched_metadata: Vec<String>,
    pub notify_conditions: Vec<String>,
    pub blacklist: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_query: Option<GeoQuery>,
    /// Minimum seconds between notifications (0 = unthrottled)
    pub throttling: f64,
    /// Epoch seconds; `None` never expires
    pub expiration: Option<f64>,
    pub render_format: RenderFormat,
    pub http_info: HttpInfo,
    pub status: SubscriptionStatus,
    pub last_notification: Option<f64>,
    pub last_success: Option<f64>,
    pub last_failure: Option<f64>,
    pub count: u64,
}

impl Default for SubscriptionSpec {
    fn default() -> Self {
        Self {
            tenant: String::new(),
            subscription_id: String::new(),
            service_path: "/".to_string(),
            name: None,
            description: None,
            ld_context: None,
            entities: Vec::new(),
            watched_attributes: Vec::new(),
            watched_metadata: Vec::new(),
            notify_conditions: Vec::new(),
            blacklist: false,
            q: None,
            geo_query: None,
            throttling: 0.0,
            expiration: None,
            render_format: RenderFormat::default(),
            http_info: HttpInfo::default(),
            status: SubscriptionStatus::default(),
            last_notification: None,
            last_success: None,
            last_failure: None,
            count: 0,
        }
    }
}

impl SubscriptionSpec {
    #[must_use]
    pub fn new(tenant: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            subscription_id: subscription_id.into(),
            ..Default::default()
        }
    }

    /// Decode a stored document. The error names the document's `id`
    /// when it has one.
    pub fn from_document(document: serde_json::Value) -> Result<Self, StorageError> {
        let id = document
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        serde_json::from_value(document).map_err(|e| StorageError::Corrupt {
            id,
            reason: e.to_string(),
        })
    }

    /// Fresh NGSI-LD subscription identifier.
    #[must_use]
    pub fn generate_id() -> String {
        format!("urn:ngsi-ld:Subscription:{}", uuid::Uuid::new_v4())
    }

    #[must_use]
    pub fn with_entity(mut self, selector: EntitySelector) -> Self {
        self.entities.push(selector);
        self
    }

    #[must_use]
    pub fn watching<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched_attributes.extend(attrs.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_conditions<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notify_conditions.extend(attrs.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_filter(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    #[must_use]
    pub fn with_throttling(mut self, secs: f64) -> Self {
        self.throttling = secs;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, epoch_secs: f64) -> Self {
        self.expiration = Some(epoch_secs);
        self
    }

    #[must_use]
    pub fn with_service_path(mut self, path: impl Into<String>) -> Self {
        self.service_path = path.into();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.http_info.url = url.into();
        self
    }

    #[must_use]
    pub fn blacklisted(mut self) -> Self {
        self.blacklist = true;
        self
    }

    #[must_use]
    pub fn paused(mut self) -> Self {
        self.status = SubscriptionStatus::Paused;
        self
    }

    /// Field-level checks that don't need compilation.
    pub fn validate(&self) -> Result<(), CacheError> {
        const TITLE: &str = "Invalid subscription";
        if self.subscription_id.is_empty() {
            return Err(CacheError::validation(TITLE, "subscription id is empty"));
        }
        if self.entities.is_empty() && self.watched_attributes.is_empty() {
            return Err(CacheError::validation(
                TITLE,
                "at least one of 'entities' or 'watchedAttributes' must be present",
            ));
        }
        if !self.throttling.is_finite() || self.throttling < 0.0 {
            return Err(CacheError::validation(TITLE, "throttling must be a non-negative number"));
        }
        if self.expiration.is_some_and(|e| !e.is_finite()) {
            return Err(CacheError::validation(TITLE, "expiration must be a number"));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.expiration.is_some_and(|e| e <= now)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RUNTIME STATE - notification bookkeeping
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Success,
    Failure,
}

impl NotifyOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Runtime-only fields, carried across refresh cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    pub last_notification: Option<f64>,
    pub last_success: Option<f64>,
    pub last_failure: Option<f64>,
    pub count: u64,
    pub consecutive_failures: u32,
    pub needs_attention: bool,
    /// Matches suppressed by throttling
    pub throttled: u64,
    /// Changed since the last write-back
    pub dirty: bool,
}

impl NotificationState {
    /// Apply a notification attempt. Returns true when this attempt pushed
    /// the subscription over the failure threshold (0 = never).
    pub fn record(&mut self, outcome: NotifyOutcome, timestamp: f64, failure_threshold: u32) -> bool {
        self.last_notification = Some(timestamp);
        self.count += 1;
        self.dirty = true;
        match outcome {
            NotifyOutcome::Success => {
                self.last_success = Some(timestamp);
                self.consecutive_failures = 0;
                self.needs_attention = false;
                false
            }
            NotifyOutcome::Failure => {
                self.last_failure = Some(timestamp);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let flag = failure_threshold > 0
                    && self.consecutive_failures >= failure_threshold
                    && !self.needs_attention;
                if flag {
                    self.needs_attention = true;
                }
                flag
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_throttled(&self, throttling: f64, now: f64) -> bool {
        throttling > 0.0 && self.last_notification.is_some_and(|last| now - last < throttling)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHED RECORD
// ═══════════════════════════════════════════════════════════════════════════

/// One admitted subscription, compiled for matching.
#[derive(Debug)]
pub struct CachedSubscription {
    tenant: String,
    subscription_id: String,
    service_path: String,
    name: Option<String>,
    description: Option<String>,
    ld_context: Option<String>,
    entities: Vec<EntityInfo>,
    watched_attributes: Vec<String>,
    watched_metadata: Vec<String>,
    notify_conditions: Vec<String>,
    blacklist: bool,
    filter: Option<QueryFilter>,
    geo_query: Option<GeoQuery>,
    throttling: f64,
    expiration: Option<f64>,
    render_format: RenderFormat,
    http_info: HttpInfo,
    status: SubscriptionStatus,
    runtime: Arc<Mutex<NotificationState>>,
    /// Cache mutation epoch at which this record was built
    pub(crate) epoch: u64,
}

impl CachedSubscription {
    /// Validate and compile. Nothing is admitted if any part fails.
    pub fn compile(spec: &SubscriptionSpec) -> Result<Self, CacheError> {
        spec.validate()?;

        let entities = spec
            .entities
            .iter()
            .map(EntityInfo::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let filter = match spec.q.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => Some(QueryFilter::parse(q)?),
            _ => None,
        };

        let runtime = NotificationState {
            last_notification: spec.last_notification,
            last_success: spec.last_success,
            last_failure: spec.last_failure,
            count: spec.count,
            ..Default::default()
        };

        Ok(Self {
            tenant: spec.tenant.clone(),
            subscription_id: spec.subscription_id.clone(),
            service_path: spec.service_path.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            ld_context: spec.ld_context.clone(),
            entities,
            watched_attributes: spec.watched_attributes.clone(),
            watched_metadata: spec.watched_metadata.clone(),
            notify_conditions: spec.notify_conditions.clone(),
            blacklist: spec.blacklist,
            filter,
            geo_query: spec.geo_query.clone(),
            throttling: spec.throttling,
            expiration: spec.expiration,
            render_format: spec.render_format,
            http_info: spec.http_info.clone(),
            status: spec.status,
            runtime: Arc::new(Mutex::new(runtime)),
            epoch: 0,
        })
    }

    pub(crate) fn with_tenant(mut self, tenant: String) -> Self {
        self.tenant = tenant;
        self
    }

    /// Take over another record's runtime state (same subscription, newer
    /// definition).
    pub(crate) fn share_runtime_from(&mut self, other: &CachedSubscription) {
        self.runtime = Arc::clone(&other.runtime);
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (&self.tenant, &self.subscription_id)
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    #[must_use]
    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn entities(&self) -> &[EntityInfo] {
        &self.entities
    }

    #[must_use]
    pub fn watched_attributes(&self) -> &[String] {
        &self.watched_attributes
    }

    #[must_use]
    pub fn watched_metadata(&self) -> &[String] {
        &self.watched_metadata
    }

    #[must_use]
    pub fn notify_conditions(&self) -> &[String] {
        &self.notify_conditions
    }

    #[must_use]
    pub fn blacklist(&self) -> bool {
        self.blacklist
    }

    #[must_use]
    pub fn filter(&self) -> Option<&QueryFilter> {
        self.filter.as_ref()
    }

    #[must_use]
    pub fn geo_query(&self) -> Option<&GeoQuery> {
        self.geo_query.as_ref()
    }

    #[must_use]
    pub fn throttling(&self) -> f64 {
        self.throttling
    }

    #[must_use]
    pub fn expiration(&self) -> Option<f64> {
        self.expiration
    }

    #[must_use]
    pub fn render_format(&self) -> RenderFormat {
        self.render_format
    }

    #[must_use]
    pub fn http_info(&self) -> &HttpInfo {
        &self.http_info
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    /// Active and not expired.
    #[must_use]
    pub fn is_active_at(&self, now: f64) -> bool {
        self.status == SubscriptionStatus::Active && self.expiration.map_or(true, |e| e > now)
    }

    /// Snapshot of the runtime fields.
    #[must_use]
    pub fn notification_state(&self) -> NotificationState {
        self.runtime.lock().clone()
    }

    /// Returns true when the subscription just crossed the failure threshold.
    pub fn record_outcome(&self, outcome: NotifyOutcome, timestamp: f64, failure_threshold: u32) -> bool {
        self.runtime.lock().record(outcome, timestamp, failure_threshold)
    }

    /// Throttle check for a match at `now`; a suppressed match is counted.
    pub(crate) fn check_throttle(&self, now: f64) -> bool {
        let mut state = self.runtime.lock();
        let throttled = state.is_throttled(self.throttling, now);
        if throttled {
            state.throttled += 1;
        }
        throttled
    }

    pub(crate) fn needs_attention(&self) -> bool {
        self.runtime.lock().needs_attention
    }

    /// Clears the dirty flag and returns the state if it was set.
    pub(crate) fn take_dirty(&self) -> Option<NotificationState> {
        let mut state = self.runtime.lock();
        if !state.dirty {
            return None;
        }
        state.dirty = false;
        Some(state.clone())
    }

    pub(crate) fn mark_dirty(&self) {
        self.runtime.lock().dirty = true;
    }

    #[cfg(test)]
    pub(crate) fn shares_runtime_with(&self, other: &CachedSubscription) -> bool {
        Arc::ptr_eq(&self.runtime, &other.runtime)
    }

    /// Back to the persisted form, runtime fields included.
    #[must_use]
    pub fn to_spec(&self) -> SubscriptionSpec {
        let state = self.notification_state();
        SubscriptionSpec {
            tenant: self.tenant.clone(),
            subscription_id: self.subscription_id.clone(),
            service_path: self.service_path.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            ld_context: self.ld_context.clone(),
            entities: self.entities.iter().map(EntityInfo::to_selector).collect(),
            watched_attributes: self.watched_attributes.clone(),
            watched_metadata: self.watched_metadata.clone(),
            notify_conditions: self.notify_conditions.clone(),
            blacklist: self.blacklist,
            q: self.filter.as_ref().map(|f| f.text().to_string()),
            geo_query: self.geo_query.clone(),
            throttling: self.throttling,
            expiration: self.expiration,
            render_format: self.render_format,
            http_info: self.http_info.clone(),
            status: self.status,
            last_notification: state.last_notification,
            last_success: state.last_success,
            last_failure: state.last_failure,
            count: state.count,
        }
    }
}
