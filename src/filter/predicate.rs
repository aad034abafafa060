//! Predicate Compilation
//!
//! Turns a [`Filter`] into a predicate over node options. A field the node
//! does not declare never excludes it.

use super::spec::{Filter, FilterSpec, FilterValue, Operator, Predicate};
use crate::domain::ports::NodeOptions;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

/// Compile a filter into a reusable predicate
pub fn compile(filter: &Filter) -> Predicate {
    match filter {
        Filter::Predicate(predicate) => predicate.clone(),
        Filter::Spec(spec) => {
            let spec = spec.clone();
            Arc::new(move |options: &NodeOptions| matches_spec(&spec, options))
        }
    }
}

/// Evaluate a spec against one node's options
pub fn matches_spec(spec: &FilterSpec, options: &NodeOptions) -> bool {
    spec.fields().all(|(name, value)| match options.get(name.as_str()) {
        None => true,
        Some(option) => matches_value(value, option),
    })
}

fn matches_value(value: &FilterValue, option: &Value) -> bool {
    match value {
        FilterValue::Literal(literal) => strict_eq(literal, option),
        FilterValue::Pattern(re) => re.is_match(&text(option)),
        FilterValue::Function(f) => f(option),
        FilterValue::Operators(ops) => ops.iter().all(|op| op.matches(option)),
    }
}

impl Operator {
    /// Apply the operator with `option` on the left
    pub fn matches(&self, option: &Value) -> bool {
        match self {
            Operator::Eq(v) => strict_eq(option, v),
            Operator::Ne(v) => !strict_eq(option, v),
            Operator::Aeq(v) => loose_eq(option, v),
            Operator::Gt(v) => compare(option, v) == Some(Ordering::Greater),
            Operator::Gte(v) => matches!(
                compare(option, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt(v) => compare(option, v) == Some(Ordering::Less),
            Operator::Lte(v) => matches!(compare(option, v), Some(Ordering::Less | Ordering::Equal)),
            Operator::Between(low, high) => {
                compare(option, low) == Some(Ordering::Greater)
                    && compare(option, high) == Some(Ordering::Less)
            }
            Operator::Regex(re) => re.is_match(&text(option)),
            Operator::In(values) => values.iter().any(|v| strict_eq(option, v)),
            Operator::Nin(values) => !values.iter().any(|v| strict_eq(option, v)),
            Operator::Contains(v) => contains(option, v),
            Operator::ContainsAny(values) => intersects(option, values),
            Operator::ContainsNone(values) => !intersects(option, values),
        }
    }
}

// =============================================================================
// Value Semantics
// =============================================================================

/// Equality without coercion; numbers compare by value (1 == 1.0)
pub(crate) fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Equality with the usual scripting coercions between numbers, numeric
/// strings and booleans
fn loose_eq(a: &Value, b: &Value) -> bool {
    if strict_eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            numeric(s) == n.as_f64()
        }
        (Value::Bool(flag), other) | (other, Value::Bool(flag)) => {
            let as_number = Value::from(if *flag { 1 } else { 0 });
            !other.is_boolean() && loose_eq(&as_number, other)
        }
        _ => false,
    }
}

fn numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed.parse().ok()
}

/// Ordering of two values when they are comparable
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&numeric(y)?),
        (Value::String(x), Value::Number(y)) => numeric(x)?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

fn text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

fn contains(option: &Value, needle: &Value) -> bool {
    match option {
        Value::Array(items) => items.iter().any(|item| strict_eq(item, needle)),
        Value::String(haystack) => haystack.contains(&*text(needle)),
        _ => false,
    }
}

fn intersects(option: &Value, values: &[Value]) -> bool {
    let elements: &[Value] = match option {
        Value::Array(items) => items.as_slice(),
        single => std::slice::from_ref(single),
    };
    elements
        .iter()
        .any(|element| values.iter().any(|v| strict_eq(element, v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use regex::Regex;
    use serde_json::json;

    fn options(value: Value) -> NodeOptions {
        value.as_object().cloned().unwrap()
    }

    fn check(spec: FilterSpec, value: Value) -> bool {
        compile(&Filter::Spec(spec))(&options(value))
    }

    #[test]
    fn test_literal_and_missing_fields() {
        let spec = FilterSpec::new().field("serviceName", "foo").field("region", "eu");

        assert!(check(spec.clone(), json!({"serviceName": "foo", "region": "eu"})));
        assert!(!check(spec.clone(), json!({"serviceName": "bar", "region": "eu"})));
        // Missing field does not exclude the node
        assert!(check(spec.clone(), json!({"serviceName": "foo"})));
        assert!(check(spec, json!({})));
    }

    #[test]
    fn test_literal_is_strict() {
        let spec = FilterSpec::new().field("weight", 5);
        assert!(check(spec.clone(), json!({"weight": 5})));
        assert!(check(spec.clone(), json!({"weight": 5.0})));
        assert!(!check(spec, json!({"weight": "5"})));
    }

    #[test]
    fn test_pattern_field() {
        let spec = FilterSpec::new().field("serviceName", Regex::new("^foo").unwrap());
        assert!(check(spec.clone(), json!({"serviceName": "foobar"})));
        assert!(!check(spec, json!({"serviceName": "barfoo"})));
    }

    #[test]
    fn test_function_field() {
        let spec = FilterSpec::new().field(
            "cores",
            FilterValue::function(|v| v.as_u64().map(|n| n >= 4).unwrap_or(false)),
        );
        assert!(check(spec.clone(), json!({"cores": 8})));
        assert!(!check(spec, json!({"cores": 2})));
    }

    #[test]
    fn test_equality_operators() {
        let eq = FilterSpec::new().field("v", Operator::Eq(json!(1)));
        assert!(check(eq.clone(), json!({"v": 1})));
        assert!(!check(eq, json!({"v": "1"})));

        let ne = FilterSpec::new().field("v", Operator::Ne(json!(1)));
        assert!(check(ne.clone(), json!({"v": "1"})));
        assert!(!check(ne, json!({"v": 1})));

        let aeq = FilterSpec::new().field("v", Operator::Aeq(json!(1)));
        assert!(check(aeq.clone(), json!({"v": "1"})));
        assert!(check(aeq.clone(), json!({"v": true})));
        assert!(!check(aeq, json!({"v": "2"})));
    }

    #[test]
    fn test_ordering_operators() {
        let gt = FilterSpec::new().field("load", Operator::Gt(json!(10)));
        assert!(check(gt.clone(), json!({"load": 11})));
        assert!(!check(gt, json!({"load": 10})));

        let gte = FilterSpec::new().field("load", Operator::Gte(json!(10)));
        assert!(check(gte, json!({"load": 10})));

        let lt = FilterSpec::new().field("load", Operator::Lt(json!(10)));
        assert!(check(lt.clone(), json!({"load": 9.5})));
        assert!(!check(lt, json!({"load": 10})));

        let lte = FilterSpec::new().field("load", Operator::Lte(json!(10)));
        assert!(check(lte, json!({"load": 10})));

        let strings = FilterSpec::new().field("zone", Operator::Gt(json!("b")));
        assert!(check(strings.clone(), json!({"zone": "c"})));
        assert!(!check(strings, json!({"zone": "a"})));

        // Incomparable types never satisfy an ordering
        let mixed = FilterSpec::new().field("load", Operator::Gt(json!(1)));
        assert!(!check(mixed, json!({"load": [5]})));
    }

    #[test]
    fn test_between_is_exclusive() {
        let spec = FilterSpec::new().field("n", Operator::Between(json!(1), json!(5)));
        assert!(check(spec.clone(), json!({"n": 3})));
        assert!(!check(spec.clone(), json!({"n": 1})));
        assert!(!check(spec, json!({"n": 5})));
    }

    #[test]
    fn test_regex_operator() {
        let spec = FilterSpec::new().field("host", Operator::Regex(Regex::new(r"^eu-\d+$").unwrap()));
        assert!(check(spec.clone(), json!({"host": "eu-12"})));
        assert!(!check(spec, json!({"host": "us-12"})));
    }

    #[test]
    fn test_membership_operators() {
        let within = FilterSpec::new().field("region", Operator::In(vec![json!("eu"), json!("us")]));
        assert!(check(within.clone(), json!({"region": "eu"})));
        assert!(!check(within, json!({"region": "ap"})));

        let outside = FilterSpec::new().field("region", Operator::Nin(vec![json!("eu")]));
        assert!(check(outside.clone(), json!({"region": "ap"})));
        assert!(!check(outside, json!({"region": "eu"})));
    }

    #[test]
    fn test_contains_operators() {
        let contains = FilterSpec::new().field("tags", Operator::Contains(json!("gpu")));
        assert!(check(contains.clone(), json!({"tags": ["ssd", "gpu"]})));
        assert!(!check(contains.clone(), json!({"tags": ["ssd"]})));
        assert!(check(contains, json!({"tags": "gpu,ssd"})));

        let any = FilterSpec::new().field("tags", Operator::ContainsAny(vec![json!("gpu"), json!("tpu")]));
        assert!(check(any.clone(), json!({"tags": ["tpu"]})));
        assert!(!check(any, json!({"tags": ["cpu"]})));

        let none = FilterSpec::new().field("tags", Operator::ContainsNone(vec![json!("gpu")]));
        assert!(check(none.clone(), json!({"tags": ["cpu"]})));
        assert!(!check(none, json!({"tags": ["gpu", "cpu"]})));
    }

    #[test]
    fn test_all_operators_on_field_must_hold() {
        let spec = FilterSpec::new().field(
            "load",
            vec![Operator::Gte(json!(2)), Operator::Lt(json!(4))],
        );
        assert!(check(spec.clone(), json!({"load": 3})));
        assert!(!check(spec, json!({"load": 4})));
    }

    #[test]
    fn test_raw_predicate_is_used_verbatim() {
        let filter = Filter::predicate(|options| options.len() == 2);
        let predicate = compile(&filter);
        assert!(predicate(&options(json!({"a": 1, "b": 2}))));
        assert!(!predicate(&options(json!({"a": 1}))));
    }
}
