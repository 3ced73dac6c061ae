//! Evaluation of a parsed filter against entity attributes.
//!
//! An attribute the entity doesn't have makes its clause false. Operands
//! of different types never compare, which is also false rather than an
//! error. For array values a clause holds when any element satisfies it.

use std::cmp::Ordering;

use super::parser::{AttrPath, CompareOp, Literal, Operand, QueryNode};
use super::value::{AttrValue, EntityAttributes};

/// Evaluate `node` against the entity's current attribute values.
#[must_use]
pub fn evaluate(node: &QueryNode, attrs: &EntityAttributes) -> bool {
    match node {
        QueryNode::Exists(path) => resolve(path, attrs).is_some(),
        QueryNode::NotExists(path) => resolve(path, attrs).is_none(),
        QueryNode::Compare { path, op, operand } => {
            resolve(path, attrs).is_some_and(|v| any_element(v, |x| compare(x, *op, operand)))
        }
        QueryNode::Pattern { path, regex, negated } => resolve(path, attrs).is_some_and(|v| {
            any_element(v, |x| x.as_text().is_some_and(|s| regex.is_match(s) != *negated))
        }),
        QueryNode::And(terms) => terms.iter().all(|t| evaluate(t, attrs)),
        QueryNode::Or(terms) => terms.iter().any(|t| evaluate(t, attrs)),
    }
}

/// An attribute literally named like the path wins; otherwise walk
/// object members segment by segment.
fn resolve<'a>(path: &AttrPath, attrs: &'a EntityAttributes) -> Option<&'a AttrValue> {
    if let Some(v) = attrs.get(&path.name) {
        return Some(v);
    }
    let (first, rest) = path.segments.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut current = attrs.get(first)?;
    for segment in rest {
        current = current.get(segment)?;
    }
    Some(current)
}

fn any_element(value: &AttrValue, test: impl Fn(&AttrValue) -> bool) -> bool {
    match value {
        AttrValue::Array(items) => items.iter().any(|x| test(x)),
        scalar => test(scalar),
    }
}

fn compare(value: &AttrValue, op: CompareOp, operand: &Operand) -> bool {
    match operand {
        Operand::Single(lit) => apply(value, op, lit),
        Operand::List(items) => match op {
            CompareOp::Ne => items.iter().all(|lit| equals(value, lit) == Some(false)),
            _ => items.iter().any(|lit| equals(value, lit) == Some(true)),
        },
        Operand::Range(low, high) => {
            let (Some(lo), Some(hi)) = (ordering(value, low), ordering(value, high)) else {
                return false;
            };
            let inside = lo != Ordering::Less && hi != Ordering::Greater;
            match op {
                CompareOp::Ne => !inside,
                _ => inside,
            }
        }
    }
}

fn apply(value: &AttrValue, op: CompareOp, lit: &Literal) -> bool {
    match op {
        CompareOp::Eq => equals(value, lit) == Some(true),
        CompareOp::Ne => equals(value, lit) == Some(false),
        CompareOp::Gt => ordering(value, lit) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering(value, lit), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering(value, lit) == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering(value, lit), Some(Ordering::Less | Ordering::Equal)),
    }
}

/// `None` when the types don't compare.
fn equals(value: &AttrValue, lit: &Literal) -> Option<bool> {
    match (value, lit) {
        (AttrValue::Bool(b), Literal::Bool(l)) => Some(b == l),
        (AttrValue::Text(s), Literal::Str(l)) => Some(s == l),
        _ => ordering(value, lit).map(|o| o == Ordering::Equal),
    }
}

/// Numeric for numbers, lexical for text, `None` otherwise.
fn ordering(value: &AttrValue, lit: &Literal) -> Option<Ordering> {
    match lit {
        Literal::Integer(i) => value.as_number()?.partial_cmp(&(*i as f64)),
        Literal::Float(f) => value.as_number()?.partial_cmp(f),
        Literal::Str(s) => Some(value.as_text()?.cmp(s.as_str())),
        Literal::Bool(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryFilter;
    use crate::query::value::attributes_from_json;
    use serde_json::json;

    fn eval(text: &str, attrs: serde_json::Value) -> bool {
        QueryFilter::parse(text).unwrap().evaluate(&attributes_from_json(attrs))
    }

    #[test]
    fn test_numeric_comparisons() {
        let attrs = json!({"A": 13});
        assert!(eval("A>12", attrs.clone()));
        assert!(!eval("A<12", attrs.clone()));
        assert!(eval("A>=13", attrs.clone()));
        assert!(eval("A<=13.0", attrs.clone()));
        assert!(eval("A==13", attrs.clone()));
        assert!(eval("A!=14", attrs));
    }

    #[test]
    fn test_integer_and_float_compare_numerically() {
        assert!(eval("A==2", json!({"A": 2.0})));
        assert!(eval("A>1.5", json!({"A": 2})));
    }

    #[test]
    fn test_string_comparison_is_lexical() {
        let attrs = json!({"name": "beta"});
        assert!(eval("name>alpha", attrs.clone()));
        assert!(eval("name<gamma", attrs.clone()));
        assert!(eval(r#"name=="beta""#, attrs));
    }

    #[test]
    fn test_bool_equality_only() {
        let attrs = json!({"on": true});
        assert!(eval("on==true", attrs.clone()));
        assert!(eval("on!=false", attrs.clone()));
        assert!(!eval("on>false", attrs));
    }

    #[test]
    fn test_mismatched_types_are_false() {
        let attrs = json!({"A": "12"});
        assert!(!eval("A==12", attrs.clone()));
        assert!(!eval("A!=12", attrs.clone()));
        assert!(!eval("A>1", attrs));
    }

    #[test]
    fn test_missing_attribute_is_false_not_error() {
        assert!(!eval("A>12", json!({"B": 20})));
        assert!(!eval("A~=/x/", json!({})));
    }

    #[test]
    fn test_existence_and_negation() {
        assert!(eval("P1", json!({"P1": 1})));
        assert!(!eval("!P1", json!({"P1": 1})));
        assert!(eval("!P1", json!({"A": 1})));
    }

    #[test]
    fn test_compound_expression() {
        let text = "(!P1;A>12)|(A<4)";
        assert!(eval(text, json!({"A": 20})));
        assert!(eval(text, json!({"A": 2, "P1": true})));
        assert!(!eval(text, json!({"A": 20, "P1": true})));
        assert!(!eval(text, json!({"A": 8})));
    }

    #[test]
    fn test_value_list() {
        assert!(eval("A==1,2,3", json!({"A": 2})));
        assert!(!eval("A==1,2,3", json!({"A": 5})));
        assert!(eval("A!=1,2,3", json!({"A": 5})));
        assert!(!eval("A!=1,2,3", json!({"A": 1})));
    }

    #[test]
    fn test_value_range_inclusive() {
        assert!(eval("A==1..5", json!({"A": 1})));
        assert!(eval("A==1..5", json!({"A": 5})));
        assert!(!eval("A==1..5", json!({"A": 6})));
        assert!(eval("A!=1..5", json!({"A": 6})));
        assert!(eval("code==a..c", json!({"code": "b"})));
    }

    #[test]
    fn test_regex_match_and_no_match() {
        let attrs = json!({"plate": "ABC123"});
        assert!(eval("plate~=/[0-9]+/", attrs.clone()));
        assert!(!eval("plate!~=/[0-9]+/", attrs.clone()));
        assert!(eval("plate!~=/^Z/", attrs));
        assert!(!eval("n~=/1/", json!({"n": 1})));
    }

    #[test]
    fn test_array_any_element() {
        let attrs = json!({"tags": ["red", "blue"], "levels": [1, 7]});
        assert!(eval(r#"tags=="blue""#, attrs.clone()));
        assert!(eval("levels>5", attrs.clone()));
        assert!(!eval("levels>9", attrs.clone()));
        assert!(eval("tags~=/^bl/", attrs));
    }

    #[test]
    fn test_nested_navigation() {
        let attrs = json!({"address": {"city": "Madrid", "zip": {"code": 28001}}});
        assert!(eval(r#"address.city=="Madrid""#, attrs.clone()));
        assert!(eval("address[zip][code]==28001", attrs.clone()));
        assert!(!eval("address.country", attrs));
    }

    #[test]
    fn test_literal_dotted_name_wins_over_navigation() {
        let attrs = json!({"a.b": 1, "a": {"b": 2}});
        assert!(eval("a.b==1", attrs));
    }
}
