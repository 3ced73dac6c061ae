use async_trait::async_trait;
use thiserror::Error;

use crate::subscription::SubscriptionSpec;

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Subscription '{tenant}/{subscription_id}' not found in store")]
    NotFound { tenant: String, subscription_id: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt subscription '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// Which tenants a fetch covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TenantScope {
    #[default]
    All,
    Only(Vec<String>),
}

impl TenantScope {
    #[must_use]
    pub fn includes(&self, tenant: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(tenants) => tenants.iter().any(|t| t == tenant),
        }
    }
}

/// Runtime counters pushed back to the store for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsUpdate {
    pub tenant: String,
    pub subscription_id: String,
    pub last_notification: Option<f64>,
    pub last_success: Option<f64>,
    pub last_failure: Option<f64>,
    pub count: u64,
}

/// The persistent subscription store, as seen by the synchronizer.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All non-expired subscriptions in scope, in a stable order.
    async fn fetch_active_subscriptions(
        &self,
        scope: &TenantScope,
    ) -> Result<Vec<SubscriptionSpec>, StorageError>;

    /// Persist notification counters. Returns how many were written.
    /// Stores that don't track counters can keep the default.
    async fn write_notification_stats(&self, updates: &[StatsUpdate]) -> Result<usize, StorageError> {
        let _ = updates;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_scope_includes() {
        assert!(TenantScope::All.includes("any"));
        let scope = TenantScope::Only(vec!["t1".into(), "".into()]);
        assert!(scope.includes("t1"));
        assert!(scope.includes(""));
        assert!(!scope.includes("t2"));
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Corrupt {
            id: "sub1".into(),
            reason: "missing entities".into(),
        };
        assert_eq!(err.to_string(), "Corrupt subscription 'sub1': missing entities");

        let err = StorageError::NotFound {
            tenant: "t1".into(),
            subscription_id: "sub2".into(),
        };
        assert_eq!(err.to_string(), "Subscription 't1/sub2' not found in store");
    }
}
