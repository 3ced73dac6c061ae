// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-level error type.

use thiserror::Error;

use crate::pattern::PatternError;
use crate::query::QueryError;
use crate::storage::StorageError;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Malformed subscription, pattern or filter. Never admitted to the cache.
    #[error("{title}: {detail}")]
    Validation { title: String, detail: String },

    #[error("Subscription '{subscription_id}' already exists for tenant '{tenant}'")]
    AlreadyExists { tenant: String, subscription_id: String },

    #[error("Subscription '{subscription_id}' not found for tenant '{tenant}'")]
    NotFound { tenant: String, subscription_id: String },

    #[error("Subscription store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Subscription cache is shutting down")]
    ShuttingDown,

    #[error("Subscription cache is disabled")]
    Disabled,
}

impl CacheError {
    pub fn validation(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn not_found(tenant: &str, subscription_id: &str) -> Self {
        Self::NotFound {
            tenant: tenant.to_string(),
            subscription_id: subscription_id.to_string(),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<QueryError> for CacheError {
    fn from(e: QueryError) -> Self {
        Self::Validation {
            title: e.title,
            detail: e.detail,
        }
    }
}

impl From<PatternError> for CacheError {
    fn from(e: PatternError) -> Self {
        Self::Validation {
            title: "Invalid entity pattern".to_string(),
            detail: format!("{}: {}", e.pattern, e.reason),
        }
    }
}
