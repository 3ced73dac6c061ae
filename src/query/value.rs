//! Typed attribute values the filter evaluates against.

use std::collections::{BTreeMap, HashMap};

/// A typed attribute value extracted from an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Object(BTreeMap<String, AttrValue>),
    Array(Vec<AttrValue>),
}

/// An entity's current attribute values, keyed by attribute name.
pub type EntityAttributes = HashMap<String, AttrValue>;

impl AttrValue {
    /// Numeric view for comparisons; integers widen to `f64`.
    #[inline]
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Child value of an object by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Build [`EntityAttributes`] from a JSON object; anything else yields an
/// empty map.
#[must_use]
pub fn attributes_from_json(value: serde_json::Value) -> EntityAttributes {
    match value {
        serde_json::Value::Object(map) => map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect(),
        _ => EntityAttributes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(AttrValue::from(json!(3)), AttrValue::Integer(3));
        assert_eq!(AttrValue::from(json!(2.5)), AttrValue::Float(2.5));
        assert_eq!(AttrValue::from(json!(3)).as_number(), Some(3.0));
    }

    #[test]
    fn test_from_json_nested() {
        let value = AttrValue::from(json!({"a": {"b": [1, "x"]}}));
        let inner = value.get("a").and_then(|a| a.get("b")).unwrap();
        assert_eq!(inner, &AttrValue::Array(vec![AttrValue::Integer(1), AttrValue::Text("x".into())]));
    }

    #[test]
    fn test_attributes_from_json() {
        let attrs = attributes_from_json(json!({"temperature": 21.5, "name": "room"}));
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["name"].as_text(), Some("room"));
        assert!(attributes_from_json(json!([1, 2])).is_empty());
    }
}
