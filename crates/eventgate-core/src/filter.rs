//! Structural filter predicates for subscription fan-out.
//!
//! A filter is either a single field-constraint map (AND semantics across
//! fields) or a sequence of maps (OR semantics across the sequence). Field
//! keys are dotted paths into the event body; a missing field fails the whole
//! map. Only subscriptions whose filter matches the published body receive
//! the delivery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A filter predicate: one constraint map, or an OR-sequence of them.
///
/// Structural equality on this type is subscription identity — two
/// subscriptions with equal `(client, path, filter)` triples are the same
/// subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryFilter {
    /// OR over the sequence; an empty sequence matches nothing.
    Any(Vec<WhereFilter>),
    /// AND over the map's entries; an empty map matches everything.
    All(WhereFilter),
}

/// A single constraint map: dotted field path to constraint.
///
/// `BTreeMap` keeps structural equality independent of insertion order.
pub type WhereFilter = BTreeMap<String, Constraint>;

impl QueryFilter {
    /// The match-everything filter (an empty constraint map).
    pub fn empty() -> Self {
        QueryFilter::All(WhereFilter::new())
    }
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self::empty()
    }
}

/// Constraint on a single field: an operator map, or a bare literal
/// (shorthand for equality).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    /// Operator map, e.g. `{ "gte": 10, "lt": 20 }`.
    Where(WhereCondition),
    /// Bare literal, shorthand for `{ "eq": literal }`.
    Literal(Value),
}

/// Operator map for a field constraint. All operators present must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct WhereCondition {
    /// Value equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    /// Value inequality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<Value>,
    /// Numeric greater-than; non-numeric field values never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,
    /// Numeric greater-or-equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    /// Numeric less-than.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
    /// Numeric less-or-equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    /// Set membership.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub is_in: Option<Vec<Value>>,
    /// Set non-membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_in: Option<Vec<Value>>,
    /// Substring containment; non-string field values never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Inclusive numeric range `[low, high]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<[f64; 2]>,
}

/// Does `data` satisfy `filter`?
pub fn matches(data: &Value, filter: &QueryFilter) -> bool {
    match filter {
        QueryFilter::Any(filters) => filters.iter().any(|f| matches_all(data, f)),
        QueryFilter::All(filter) => matches_all(data, filter),
    }
}

/// AND over every entry of a constraint map. A field whose dotted path is
/// absent from `data` fails the map immediately.
fn matches_all(data: &Value, filter: &WhereFilter) -> bool {
    for (key, constraint) in filter {
        let Some(target) = lookup(data, key) else {
            return false;
        };

        let ok = match constraint {
            Constraint::Literal(literal) => value_eq(target, literal),
            Constraint::Where(condition) => matches_condition(target, condition),
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Evaluate an operator map against a resolved field value.
fn matches_condition(target: &Value, condition: &WhereCondition) -> bool {
    if let Some(eq) = &condition.eq {
        if !value_eq(target, eq) {
            return false;
        }
    }
    if let Some(neq) = &condition.neq {
        if value_eq(target, neq) {
            return false;
        }
    }
    if let Some(gt) = condition.gt {
        if !as_number(target).is_some_and(|n| n > gt) {
            return false;
        }
    }
    if let Some(gte) = condition.gte {
        if !as_number(target).is_some_and(|n| n >= gte) {
            return false;
        }
    }
    if let Some(lt) = condition.lt {
        if !as_number(target).is_some_and(|n| n < lt) {
            return false;
        }
    }
    if let Some(lte) = condition.lte {
        if !as_number(target).is_some_and(|n| n <= lte) {
            return false;
        }
    }
    if let Some(set) = &condition.is_in {
        if !set.iter().any(|v| value_eq(target, v)) {
            return false;
        }
    }
    if let Some(set) = &condition.not_in {
        if set.iter().any(|v| value_eq(target, v)) {
            return false;
        }
    }
    if let Some(needle) = &condition.contains {
        if !target.as_str().is_some_and(|s| s.contains(needle.as_str())) {
            return false;
        }
    }
    if let Some([low, high]) = condition.between {
        if !as_number(target).is_some_and(|n| low <= n && n <= high) {
            return false;
        }
    }
    true
}

/// Resolve a dotted path (`meta.owner.id`, `items.0.sku`) inside a value.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Equality that treats `1` and `1.0` as equal when both sides are numbers.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_number().and_then(serde_json::Number::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(raw: Value) -> QueryFilter {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn literal_shorthand_is_equality() {
        let f = filter(json!({"status": "open"}));
        assert!(matches(&json!({"status": "open"}), &f));
        assert!(!matches(&json!({"status": "closed"}), &f));
    }

    #[test]
    fn missing_field_never_matches() {
        let f = filter(json!({"status": "open", "kind": "order"}));
        assert!(!matches(&json!({"status": "open"}), &f));
    }

    #[test]
    fn empty_map_matches_everything() {
        let f = QueryFilter::empty();
        assert!(matches(&json!({"anything": 1}), &f));
        assert!(matches(&json!({}), &f));
    }

    #[test]
    fn empty_sequence_matches_nothing() {
        let f = QueryFilter::Any(Vec::new());
        assert!(!matches(&json!({"anything": 1}), &f));
    }

    #[test]
    fn single_element_sequence_equals_bare_map() {
        let bare = filter(json!({"n": {"gte": 10}}));
        let seq = filter(json!([{"n": {"gte": 10}}]));
        for data in [json!({"n": 10}), json!({"n": 9}), json!({"m": 10})] {
            assert_eq!(matches(&data, &seq), matches(&data, &bare));
        }
    }

    #[test]
    fn or_sequence_matches_any_branch() {
        let f = filter(json!([{"status": "open"}, {"status": "pending"}]));
        assert!(matches(&json!({"status": "open"}), &f));
        assert!(matches(&json!({"status": "pending"}), &f));
        assert!(!matches(&json!({"status": "closed"}), &f));
    }

    #[test]
    fn and_within_map() {
        let f = filter(json!({"status": "open", "total": {"gt": 100}}));
        assert!(matches(&json!({"status": "open", "total": 150}), &f));
        assert!(!matches(&json!({"status": "open", "total": 50}), &f));
        assert!(!matches(&json!({"status": "closed", "total": 150}), &f));
    }

    #[test]
    fn numeric_operators() {
        let f = filter(json!({"n": {"gt": 1, "gte": 2, "lt": 10, "lte": 9}}));
        assert!(matches(&json!({"n": 2}), &f));
        assert!(matches(&json!({"n": 9}), &f));
        assert!(!matches(&json!({"n": 1}), &f));
        assert!(!matches(&json!({"n": 10}), &f));
    }

    #[test]
    fn numeric_operator_on_non_number_fails() {
        let f = filter(json!({"n": {"gt": 1}}));
        assert!(!matches(&json!({"n": "2"}), &f));
        assert!(!matches(&json!({"n": null}), &f));
    }

    #[test]
    fn eq_neq_operators() {
        let f = filter(json!({"a": {"eq": 1}, "b": {"neq": "x"}}));
        assert!(matches(&json!({"a": 1, "b": "y"}), &f));
        assert!(!matches(&json!({"a": 2, "b": "y"}), &f));
        assert!(!matches(&json!({"a": 1, "b": "x"}), &f));
    }

    #[test]
    fn integer_and_float_compare_equal() {
        let f = filter(json!({"a": {"eq": 1.0}}));
        assert!(matches(&json!({"a": 1}), &f));
    }

    #[test]
    fn membership_operators() {
        let f = filter(json!({"status": {"in": ["open", "pending"]}}));
        assert!(matches(&json!({"status": "pending"}), &f));
        assert!(!matches(&json!({"status": "closed"}), &f));

        let f = filter(json!({"status": {"notIn": ["closed"]}}));
        assert!(matches(&json!({"status": "open"}), &f));
        assert!(!matches(&json!({"status": "closed"}), &f));
    }

    #[test]
    fn contains_operator() {
        let f = filter(json!({"name": {"contains": "gate"}}));
        assert!(matches(&json!({"name": "eventgate"}), &f));
        assert!(!matches(&json!({"name": "dispatch"}), &f));
        // Non-string target never matches.
        assert!(!matches(&json!({"name": 42}), &f));
    }

    #[test]
    fn between_is_inclusive() {
        let f = filter(json!({"n": {"between": [10, 20]}}));
        assert!(matches(&json!({"n": 10}), &f));
        assert!(matches(&json!({"n": 15}), &f));
        assert!(matches(&json!({"n": 20}), &f));
        assert!(!matches(&json!({"n": 9}), &f));
        assert!(!matches(&json!({"n": 21}), &f));
        assert!(!matches(&json!({"n": "15"}), &f));
    }

    #[test]
    fn dotted_path_lookup() {
        let f = filter(json!({"meta.owner.id": 7}));
        assert!(matches(&json!({"meta": {"owner": {"id": 7}}}), &f));
        assert!(!matches(&json!({"meta": {"owner": {}}}), &f));
    }

    #[test]
    fn dotted_path_through_array_index() {
        let f = filter(json!({"items.0.sku": "a-1"}));
        assert!(matches(&json!({"items": [{"sku": "a-1"}]}), &f));
        assert!(!matches(&json!({"items": []}), &f));
    }

    #[test]
    fn multiple_operators_all_must_hold() {
        let f = filter(json!({"n": {"gte": 10, "neq": 13}}));
        assert!(matches(&json!({"n": 12}), &f));
        assert!(!matches(&json!({"n": 13}), &f));
        assert!(!matches(&json!({"n": 9}), &f));
    }

    #[test]
    fn structural_equality_ignores_key_order() {
        let a = filter(json!({"a": 1, "b": 2}));
        let b = filter(json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn operator_map_and_literal_map_are_distinct() {
        // {"eq": 1} must parse as an operator, not an object literal.
        let f = filter(json!({"a": {"eq": 1}}));
        assert!(matches(&json!({"a": 1}), &f));
        assert!(!matches(&json!({"a": {"eq": 1}}), &f));
        // An object with non-operator keys is an object literal.
        let f = filter(json!({"a": {"nested": 1}}));
        assert!(matches(&json!({"a": {"nested": 1}}), &f));
    }
}
