//! Filter Specifications
//!
//! Declarative description of which nodes a message may be routed to.

use crate::domain::ports::{NodeOptions, SERVICE_NAME_KEY};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Compiled whole-node predicate
pub type Predicate = Arc<dyn Fn(&NodeOptions) -> bool + Send + Sync>;

/// Predicate over a single option value
pub type FieldPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// =============================================================================
// Operators
// =============================================================================

/// Operator applied to one option value (the option is always the left operand)
#[derive(Debug, Clone)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    /// Loose, type-coercing equality
    Aeq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Strictly between the two bounds
    Between(Value, Value),
    Regex(Regex),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Contains(Value),
    ContainsAny(Vec<Value>),
    ContainsNone(Vec<Value>),
}

impl Operator {
    /// Wire name of the operator
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq(_) => "$eq",
            Operator::Ne(_) => "$ne",
            Operator::Aeq(_) => "$aeq",
            Operator::Gt(_) => "$gt",
            Operator::Gte(_) => "$gte",
            Operator::Lt(_) => "$lt",
            Operator::Lte(_) => "$lte",
            Operator::Between(_, _) => "$between",
            Operator::Regex(_) => "$regex",
            Operator::In(_) => "$in",
            Operator::Nin(_) => "$nin",
            Operator::Contains(_) => "$contains",
            Operator::ContainsAny(_) => "$containsAny",
            Operator::ContainsNone(_) => "$containsNone",
        }
    }
}

// =============================================================================
// Filter Value
// =============================================================================

/// Condition attached to one field of a filter
#[derive(Clone)]
pub enum FilterValue {
    /// Strict equality with a JSON literal
    Literal(Value),
    /// Regular expression tested against the option's text form
    Pattern(Regex),
    /// Arbitrary predicate over the option value (process-local only)
    Function(FieldPredicate),
    /// All operators must hold
    Operators(Vec<Operator>),
}

impl FilterValue {
    pub fn function(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        FilterValue::Function(Arc::new(f))
    }
}

impl std::fmt::Debug for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::Literal(v) => write!(f, "Literal({})", v),
            FilterValue::Pattern(re) => write!(f, "Pattern(/{}/)", re.as_str()),
            FilterValue::Function(_) => write!(f, "Function(..)"),
            FilterValue::Operators(ops) => f.debug_tuple("Operators").field(ops).finish(),
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Literal(v)
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Literal(Value::from(s))
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Literal(Value::from(s))
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        FilterValue::Literal(Value::from(n))
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Literal(Value::from(n))
    }
}

impl From<u64> for FilterValue {
    fn from(n: u64) -> Self {
        FilterValue::Literal(Value::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Literal(Value::from(n))
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Literal(Value::from(b))
    }
}

impl From<Regex> for FilterValue {
    fn from(re: Regex) -> Self {
        FilterValue::Pattern(re)
    }
}

impl From<Operator> for FilterValue {
    fn from(op: Operator) -> Self {
        FilterValue::Operators(vec![op])
    }
}

impl From<Vec<Operator>> for FilterValue {
    fn from(ops: Vec<Operator>) -> Self {
        FilterValue::Operators(ops)
    }
}

// =============================================================================
// Filter Spec
// =============================================================================

/// Ordered field -> condition mapping; a node must satisfy every field
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    fields: Vec<(String, FilterValue)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`FilterSpec::insert`]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set the condition for a field, replacing any previous one
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FilterValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.fields.iter().map(|(name, value)| (name, value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Service name this filter targets, when it pins one exactly
    pub fn service_name(&self) -> Option<&str> {
        match self.get(SERVICE_NAME_KEY)? {
            FilterValue::Literal(Value::String(name)) => Some(name),
            FilterValue::Operators(ops) => ops.iter().find_map(|op| match op {
                Operator::Eq(Value::String(name)) => Some(name.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

/// A routing filter: declarative spec or a raw predicate over node options
#[derive(Clone)]
pub enum Filter {
    Spec(FilterSpec),
    Predicate(Predicate),
}

impl Filter {
    /// Filter matching every node
    pub fn any() -> Self {
        Filter::Spec(FilterSpec::new())
    }

    /// Filter selecting nodes of one service
    pub fn service(name: impl Into<String>) -> Self {
        Filter::Spec(FilterSpec::new().field(SERVICE_NAME_KEY, name.into()))
    }

    pub fn predicate(f: impl Fn(&NodeOptions) -> bool + Send + Sync + 'static) -> Self {
        Filter::Predicate(Arc::new(f))
    }

    pub fn service_name(&self) -> Option<&str> {
        match self {
            Filter::Spec(spec) => spec.service_name(),
            Filter::Predicate(_) => None,
        }
    }

    /// Human-readable form for error messages
    pub fn describe(&self) -> String {
        match self {
            Filter::Spec(spec) => match spec.to_wire() {
                Ok(wire) => wire.to_string(),
                Err(_) => {
                    let names: Vec<&str> = spec.fields().map(|(n, _)| n.as_str()).collect();
                    format!("{{{}}}", names.join(", "))
                }
            },
            Filter::Predicate(_) => "<predicate>".to_string(),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::any()
    }
}

impl From<FilterSpec> for Filter {
    fn from(spec: FilterSpec) -> Self {
        Filter::Spec(spec)
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Spec(spec) => f.debug_tuple("Spec").field(spec).finish(),
            Filter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_replaces_existing_field() {
        let spec = FilterSpec::new()
            .field("serviceName", "foo")
            .field("region", "eu")
            .field("serviceName", "bar");

        assert_eq!(spec.len(), 2);
        assert_eq!(spec.service_name(), Some("bar"));
    }

    #[test]
    fn test_service_name_from_eq_operator() {
        let spec = FilterSpec::new().field("serviceName", Operator::Eq(json!("foo")));
        assert_eq!(spec.service_name(), Some("foo"));

        let spec = FilterSpec::new().field("serviceName", Regex::new("^foo").unwrap());
        assert_eq!(spec.service_name(), None);
    }

    #[test]
    fn test_describe_function_filter() {
        let filter: Filter = FilterSpec::new()
            .field("weight", FilterValue::function(|v| v.is_number()))
            .into();
        assert_eq!(filter.describe(), "{weight}");
        assert_eq!(Filter::service("foo").describe(), r#"{"serviceName":"foo"}"#);
    }
}
