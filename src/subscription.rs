//! Subscription Tracker
//!
//! Subscriptions live inside a node's declared options under `subscribed`:
//! a map from event name to `"*"` or a list of publisher service names.
//! Routers read them from the registry to resolve PUBLISH envelopes.

use crate::domain::ports::NodeOptions;
use crate::filter::Predicate;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Option key holding the subscription table
pub const SUBSCRIBED_KEY: &str = "subscribed";

/// Wildcard accepting every publisher
pub const ANY_PUBLISHER: &str = "*";

/// Publishers a subscription accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    Any,
    Service(String),
    Services(Vec<String>),
}

impl From<&str> for SubscriptionTarget {
    fn from(s: &str) -> Self {
        if s == ANY_PUBLISHER {
            SubscriptionTarget::Any
        } else {
            SubscriptionTarget::Service(s.to_string())
        }
    }
}

impl From<String> for SubscriptionTarget {
    fn from(s: String) -> Self {
        SubscriptionTarget::from(s.as_str())
    }
}

impl From<Vec<String>> for SubscriptionTarget {
    fn from(names: Vec<String>) -> Self {
        if names.iter().any(|name| name == ANY_PUBLISHER) {
            SubscriptionTarget::Any
        } else {
            SubscriptionTarget::Services(names)
        }
    }
}

impl From<Vec<&str>> for SubscriptionTarget {
    fn from(names: Vec<&str>) -> Self {
        names
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into()
    }
}

/// Add `target` to the subscription of `event`. Lists are merged as sets and
/// a wildcard, once set, is never narrowed.
pub fn subscribe(options: &mut NodeOptions, event: &str, target: impl Into<SubscriptionTarget>) {
    let table = options
        .entry(SUBSCRIBED_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !table.is_object() {
        *table = Value::Object(Map::new());
    }
    let Some(table) = table.as_object_mut() else {
        return;
    };

    let names = match target.into() {
        SubscriptionTarget::Any => {
            table.insert(event.to_string(), Value::from(ANY_PUBLISHER));
            return;
        }
        SubscriptionTarget::Service(name) => vec![name],
        SubscriptionTarget::Services(names) => names,
    };

    let current = table
        .entry(event.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match current {
        Value::String(s) if s.as_str() == ANY_PUBLISHER => {}
        Value::Array(existing) => {
            for name in names {
                if !existing.iter().any(|v| v.as_str() == Some(name.as_str())) {
                    existing.push(Value::from(name));
                }
            }
        }
        other => *other = Value::Array(names.into_iter().map(Value::from).collect()),
    }
}

/// Whether `options` subscribe to `event` from `publisher`
pub fn matches(event: &str, publisher: Option<&str>, options: &NodeOptions) -> bool {
    let Some(entry) = options
        .get(SUBSCRIBED_KEY)
        .and_then(Value::as_object)
        .and_then(|table| table.get(event))
    else {
        return false;
    };

    match entry {
        Value::String(s) => s == ANY_PUBLISHER || Some(s.as_str()) == publisher,
        Value::Array(names) => names.iter().any(|name| match name.as_str() {
            Some(ANY_PUBLISHER) => true,
            Some(name) => Some(name) == publisher,
            None => false,
        }),
        _ => false,
    }
}

/// [`matches`] packaged as a registry predicate
pub fn publish_predicate(event: &str, publisher: Option<&str>) -> Predicate {
    let event = event.to_string();
    let publisher = publisher.map(str::to_string);
    Arc::new(move |options: &NodeOptions| matches(&event, publisher.as_deref(), options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_merges_as_set() {
        let mut options = NodeOptions::new();
        subscribe(&mut options, "news", "foo");
        subscribe(&mut options, "news", vec!["foo", "bar"]);

        assert_eq!(options[SUBSCRIBED_KEY], json!({"news": ["foo", "bar"]}));
    }

    #[test]
    fn test_wildcard_is_never_narrowed() {
        let mut options = NodeOptions::new();
        subscribe(&mut options, "news", "foo");
        subscribe(&mut options, "news", "*");
        subscribe(&mut options, "news", "bar");

        assert_eq!(options[SUBSCRIBED_KEY], json!({"news": "*"}));
        assert!(matches("news", Some("anyone"), &options));
        assert!(matches("news", None, &options));
    }

    #[test]
    fn test_matches_exact_event_and_publisher() {
        let mut options = NodeOptions::new();
        subscribe(&mut options, "news", vec!["foo"]);

        assert!(matches("news", Some("foo"), &options));
        assert!(!matches("news", Some("bar"), &options));
        assert!(!matches("news", None, &options));
        assert!(!matches("news.sport", Some("foo"), &options));
        assert!(!matches("news", Some("foo"), &NodeOptions::new()));
    }

    #[test]
    fn test_publish_predicate() {
        let options = json!({"subscribed": {"news": "*"}}).as_object().cloned().unwrap();
        assert!(publish_predicate("news", Some("foo"))(&options));
        assert!(!publish_predicate("weather", Some("foo"))(&options));
    }
}
