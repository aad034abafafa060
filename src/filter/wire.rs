//! Filter Wire Form
//!
//! Filters travel inside envelopes as plain JSON. Literals are kept as-is,
//! regular expressions become `{"type": "RegExp", "value": <source>}` and
//! operators become `{"$op": value}`. Function predicates only exist in the
//! process that created them.

use super::spec::{Filter, FilterSpec, FilterValue, Operator};
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde_json::{json, Map, Value};

/// Tag marking a serialized regular expression
pub const REGEXP_TYPE: &str = "RegExp";

impl FilterSpec {
    /// Serialize into the wire form
    pub fn to_wire(&self) -> Result<Value> {
        let mut map = Map::new();
        for (name, value) in self.fields() {
            map.insert(name.clone(), value_to_wire(name, value)?);
        }
        Ok(Value::Object(map))
    }

    /// Parse the wire form. `null` is the empty filter.
    pub fn from_wire(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let mut spec = Self::new();
                for (name, raw) in map {
                    spec.insert(name.clone(), value_from_wire(name, raw)?);
                }
                Ok(spec)
            }
            other => Err(Error::InvalidFilter(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }
}

impl Filter {
    pub fn to_wire(&self) -> Result<Value> {
        match self {
            Filter::Spec(spec) => spec.to_wire(),
            Filter::Predicate(_) => Err(Error::InvalidFilter(
                "predicate filters cannot be serialized".into(),
            )),
        }
    }

    pub fn from_wire(value: &Value) -> Result<Self> {
        FilterSpec::from_wire(value).map(Filter::Spec)
    }
}

// =============================================================================
// Encoding
// =============================================================================

fn value_to_wire(name: &str, value: &FilterValue) -> Result<Value> {
    match value {
        FilterValue::Literal(literal) => Ok(literal.clone()),
        FilterValue::Pattern(re) => Ok(regex_to_wire(re)),
        FilterValue::Function(_) => Err(Error::InvalidFilter(format!(
            "field '{}' uses a function predicate, which cannot be serialized",
            name
        ))),
        FilterValue::Operators(ops) => {
            let mut map = Map::new();
            for op in ops {
                map.insert(op.name().to_string(), operator_argument(op));
            }
            Ok(Value::Object(map))
        }
    }
}

fn regex_to_wire(re: &Regex) -> Value {
    json!({ "type": REGEXP_TYPE, "value": re.as_str() })
}

fn operator_argument(op: &Operator) -> Value {
    match op {
        Operator::Eq(v)
        | Operator::Ne(v)
        | Operator::Aeq(v)
        | Operator::Gt(v)
        | Operator::Gte(v)
        | Operator::Lt(v)
        | Operator::Lte(v)
        | Operator::Contains(v) => v.clone(),
        Operator::Between(low, high) => json!([low, high]),
        Operator::Regex(re) => regex_to_wire(re),
        Operator::In(values)
        | Operator::Nin(values)
        | Operator::ContainsAny(values)
        | Operator::ContainsNone(values) => Value::Array(values.clone()),
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn value_from_wire(name: &str, raw: &Value) -> Result<FilterValue> {
    if let Some(re) = regex_from_wire(raw)? {
        return Ok(FilterValue::Pattern(re));
    }

    if let Value::Object(map) = raw {
        if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) {
            let ops = map
                .iter()
                .map(|(op, arg)| operator_from_wire(name, op, arg))
                .collect::<Result<Vec<_>>>()?;
            return Ok(FilterValue::Operators(ops));
        }
    }

    Ok(FilterValue::Literal(raw.clone()))
}

/// Decode `{"type": "RegExp", "value": ..., "flags"?: ...}`
fn regex_from_wire(raw: &Value) -> Result<Option<Regex>> {
    let Value::Object(map) = raw else {
        return Ok(None);
    };
    if map.get("type").and_then(Value::as_str) != Some(REGEXP_TYPE) {
        return Ok(None);
    }

    let source = map
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidFilter("RegExp without a string value".into()))?;
    let flags = map.get("flags").and_then(Value::as_str).unwrap_or("");

    build_regex(source, flags).map(Some)
}

fn build_regex(source: &str, flags: &str) -> Result<Regex> {
    RegexBuilder::new(source)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .build()
        .map_err(|e| Error::InvalidFilter(format!("bad regular expression '{}': {}", source, e)))
}

fn operator_from_wire(field: &str, op: &str, arg: &Value) -> Result<Operator> {
    let list = |arg: &Value| -> Result<Vec<Value>> {
        arg.as_array().cloned().ok_or_else(|| {
            Error::InvalidFilter(format!("{} on '{}' expects an array", op, field))
        })
    };

    let operator = match op {
        "$eq" => Operator::Eq(arg.clone()),
        "$ne" => Operator::Ne(arg.clone()),
        "$aeq" => Operator::Aeq(arg.clone()),
        "$gt" => Operator::Gt(arg.clone()),
        "$gte" => Operator::Gte(arg.clone()),
        "$lt" => Operator::Lt(arg.clone()),
        "$lte" => Operator::Lte(arg.clone()),
        "$between" => match arg.as_array().map(Vec::as_slice) {
            Some([low, high]) => Operator::Between(low.clone(), high.clone()),
            _ => {
                return Err(Error::InvalidFilter(format!(
                    "$between on '{}' expects [low, high]",
                    field
                )))
            }
        },
        "$regex" => match arg {
            Value::String(source) => Operator::Regex(build_regex(source, "")?),
            other => match regex_from_wire(other)? {
                Some(re) => Operator::Regex(re),
                None => {
                    return Err(Error::InvalidFilter(format!(
                        "$regex on '{}' expects a pattern",
                        field
                    )))
                }
            },
        },
        "$in" => Operator::In(list(arg)?),
        "$nin" => Operator::Nin(list(arg)?),
        "$contains" => Operator::Contains(arg.clone()),
        "$containsAny" => Operator::ContainsAny(list(arg)?),
        "$containsNone" => Operator::ContainsNone(list(arg)?),
        unknown => {
            return Err(Error::InvalidFilter(format!(
                "unknown operator {} on '{}'",
                unknown, field
            )))
        }
    };
    Ok(operator)
}
