// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity id / type matching.
//!
//! A selector's id and type are each either a literal, compared byte for
//! byte, or a regular expression compiled once when the subscription is
//! admitted. Patterns use unanchored search semantics: `room` matches
//! `urn:room:1`. Callers that want a full match write `^...$`.
//!
//! The compiled [`Regex`] is owned by its [`Matcher`] and released with it,
//! so there is no separate "compiled" flag to keep in sync.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::subscription::EntitySelector;

/// Upper bound on compiled regex size, shared with the filter engine.
pub(crate) const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid entity pattern '{pattern}': {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

/// A literal or compiled pattern.
#[derive(Debug)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    /// Compile `text` as a pattern, or keep it as a literal.
    pub fn compile(text: &str, is_pattern: bool) -> Result<Self, PatternError> {
        if !is_pattern {
            return Ok(Self::Exact(text.to_string()));
        }
        RegexBuilder::new(text)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map(Self::Pattern)
            .map_err(|e| PatternError {
                pattern: text.to_string(),
                reason: e.to_string(),
            })
    }

    #[inline]
    #[must_use]
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(s) => s == candidate,
            Self::Pattern(re) => re.is_match(candidate),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) => s,
            Self::Pattern(re) => re.as_str(),
        }
    }

    #[must_use]
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }
}

/// One compiled entity selector.
///
/// An empty literal type matches any entity type.
#[derive(Debug)]
pub struct EntityInfo {
    id: Matcher,
    entity_type: Matcher,
}

impl EntityInfo {
    pub fn compile(selector: &EntitySelector) -> Result<Self, PatternError> {
        Ok(Self {
            id: Matcher::compile(&selector.id, selector.id_is_pattern)?,
            entity_type: Matcher::compile(&selector.entity_type, selector.type_is_pattern)?,
        })
    }

    /// Id AND type must match.
    #[must_use]
    pub fn matches(&self, entity_id: &str, entity_type: &str) -> bool {
        let type_ok = match &self.entity_type {
            Matcher::Exact(t) if t.is_empty() => true,
            m => m.is_match(entity_type),
        };
        type_ok && self.id.is_match(entity_id)
    }

    #[must_use]
    pub fn id(&self) -> &Matcher {
        &self.id
    }

    #[must_use]
    pub fn entity_type(&self) -> &Matcher {
        &self.entity_type
    }

    /// Back to the raw selector form, for write-back and listing.
    #[must_use]
    pub fn to_selector(&self) -> EntitySelector {
        EntitySelector {
            id: self.id.as_str().to_string(),
            id_is_pattern: self.id.is_pattern(),
            entity_type: self.entity_type.as_str().to_string(),
            type_is_pattern: self.entity_type.is_pattern(),
        }
    }
}

/// OR across selectors.
#[must_use]
pub fn any_matches(selectors: &[EntityInfo], entity_id: &str, entity_type: &str) -> bool {
    selectors.iter().any(|s| s.matches(entity_id, entity_type))
}
