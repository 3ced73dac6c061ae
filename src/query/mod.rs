//! Boolean filter engine for `q=` expressions.
//!
//! A filter goes through three stages before it is usable:
//!
//! ```text
//! text ──lex──▶ tokens ──check──▶ validated tokens ──parse──▶ QueryNode tree
//! ```
//!
//! Every failure along the way is a [`QueryError`] with a title and a
//! detail, so the REST layer can render it as-is.
//!
//! # Example
//!
//! ```
//! use subcache::query::{QueryFilter, attributes_from_json};
//! use serde_json::json;
//!
//! let filter = QueryFilter::parse("(!P1;A>12)|(A<4)").unwrap();
//! assert!(filter.evaluate(&attributes_from_json(json!({"A": 20}))));
//! assert!(!filter.evaluate(&attributes_from_json(json!({"A": 20, "P1": 1}))));
//!
//! let err = QueryFilter::parse("A>").unwrap_err();
//! assert_eq!(err.detail, "end of expression");
//! ```

pub mod check;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod value;

pub use parser::{AttrPath, CompareOp, Literal, Operand, QueryNode};
pub use token::{SpannedToken, Token, TokenKind};
pub use value::{attributes_from_json, AttrValue, EntityAttributes};

use std::fmt;
use thiserror::Error;

/// A filter that failed lexing, structural validation or parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{title}: {detail}")]
pub struct QueryError {
    pub title: String,
    pub detail: String,
}

impl QueryError {
    pub fn new(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// A compiled `q` filter.
#[derive(Clone)]
pub struct QueryFilter {
    text: String,
    root: QueryNode,
}

impl QueryFilter {
    /// Lex, validate and parse a filter expression.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let tokens = lexer::lex(text)?;
        check::check(&tokens)?;
        let root = parser::parse(&tokens)?;
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    /// The expression as it was given.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn root(&self) -> &QueryNode {
        &self.root
    }

    /// Evaluate against the entity's full current attribute set.
    #[must_use]
    pub fn evaluate(&self, attrs: &EntityAttributes) -> bool {
        eval::evaluate(&self.root, attrs)
    }
}

impl fmt::Debug for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFilter").field("text", &self.text).finish()
    }
}

/// Validate a filter without keeping the compiled form.
pub fn validate(text: &str) -> Result<(), QueryError> {
    QueryFilter::parse(text).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::new("ngsi-ld query language: invalid start token", "And");
        assert_eq!(err.to_string(), "ngsi-ld query language: invalid start token: And");
    }

    #[test]
    fn test_filter_keeps_text() {
        let filter = QueryFilter::parse("A>12").unwrap();
        assert_eq!(filter.text(), "A>12");
        assert!(matches!(filter.root(), QueryNode::Compare { .. }));
    }

    #[test]
    fn test_deeply_nested_filter_rejected_cleanly() {
        let depth = 10_000;
        let text = format!("{}A>1{}", "(".repeat(depth), ")".repeat(depth));
        let err = QueryFilter::parse(&text).unwrap_err();
        assert!(err.title.contains("mismatched parenthesis"));
        assert!(err.detail.contains("too deeply nested"));

        let mixed = format!("{}A>1{}", "(A;".repeat(depth), ")".repeat(depth));
        assert!(QueryFilter::parse(&mixed).is_err());
    }

    #[test]
    fn test_validate_surfaces_each_stage() {
        assert!(validate("A>12").is_ok());
        assert!(validate("A=1").unwrap_err().title.contains("invalid operator"));
        assert!(validate("((A>1)").unwrap_err().title.contains("mismatched parenthesis"));
        assert!(validate("A~=/(/").unwrap_err().title.contains("invalid regular expression"));
    }
}
