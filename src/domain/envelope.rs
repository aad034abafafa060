//! Message Envelope
//!
//! Every message a service node hands to a router travels as an envelope
//! under the [`ROUTER_MESSAGE`] event. The envelope names how the router
//! picks recipients and which event the recipients finally receive.

use super::ports::NodeId;
use crate::error::{Error, Result};
use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Event under which envelopes are sent to routers
pub const ROUTER_MESSAGE: &str = "mesh.router.message";

/// Federation announcement carrying a router address
pub const NEW_ROUTER: &str = "mesh.network.new_router";

/// How a router chooses the recipients of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// One node, addressed by id
    #[serde(rename = "to")]
    EmitTo,
    /// One node among those matching the filter, picked by the load balancer
    #[serde(rename = "any")]
    EmitAny,
    /// Every node matching the filter
    #[serde(rename = "broadcast")]
    Broadcast,
    /// Every node subscribed to the event
    #[serde(rename = "publish")]
    Publish,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::EmitTo => "to",
            MessageType::EmitAny => "any",
            MessageType::Broadcast => "broadcast",
            MessageType::Publish => "publish",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed message
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: MessageType,
    /// Recipient of an EMIT_TO envelope
    pub to: Option<NodeId>,
    pub event: String,
    pub data: Value,
    pub filter: Filter,
    /// Reply deadline for requests; the router default applies when absent
    pub timeout: Option<Duration>,
}

impl Envelope {
    fn new(kind: MessageType, event: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            to: None,
            event: event.into(),
            data,
            filter: Filter::any(),
            timeout: None,
        }
    }

    pub fn to(id: impl Into<NodeId>, event: impl Into<String>, data: Value) -> Self {
        Self {
            to: Some(id.into()),
            ..Self::new(MessageType::EmitTo, event, data)
        }
    }

    pub fn any(event: impl Into<String>, data: Value, filter: impl Into<Filter>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::new(MessageType::EmitAny, event, data)
        }
    }

    pub fn broadcast(event: impl Into<String>, data: Value, filter: impl Into<Filter>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::new(MessageType::Broadcast, event, data)
        }
    }

    pub fn publish(event: impl Into<String>, data: Value) -> Self {
        Self::new(MessageType::Publish, event, data)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Encode for the wire. Fails for predicate filters.
    pub fn to_wire(&self) -> Result<Value> {
        let filter = match &self.filter {
            Filter::Spec(spec) if spec.is_empty() => None,
            filter => Some(filter.to_wire()?),
        };
        let wire = WireEnvelope {
            kind: self.kind,
            id: self.to.clone(),
            event: self.event.clone(),
            data: self.data.clone(),
            timeout: self.timeout.map(|t| t.as_millis() as u64),
            filter,
        };
        Ok(serde_json::to_value(wire)?)
    }

    /// Decode the wire form
    pub fn from_wire(value: Value) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_value(value)
            .map_err(|e| Error::InvalidArgument(format!("malformed envelope: {}", e)))?;

        let filter = match &wire.filter {
            Some(raw) => Filter::from_wire(raw)?,
            None => Filter::any(),
        };

        Ok(Self {
            kind: wire.kind,
            to: wire.id,
            event: wire.event,
            data: wire.data,
            filter,
            timeout: wire.timeout.map(Duration::from_millis),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<NodeId>,
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterSpec, Operator};
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::to("node-1", "ping", json!({"n": 1}))
            .with_timeout(Duration::from_millis(500));
        assert_eq!(
            envelope.to_wire().unwrap(),
            json!({"type": "to", "id": "node-1", "event": "ping", "data": {"n": 1}, "timeout": 500})
        );

        let envelope = Envelope::publish("news", Value::Null);
        assert_eq!(
            envelope.to_wire().unwrap(),
            json!({"type": "publish", "event": "news", "data": null})
        );
    }

    #[test]
    fn test_filter_survives_the_wire() {
        let filter = FilterSpec::new()
            .field("serviceName", "foo")
            .field("version", Operator::Gte(json!(2)));
        let envelope = Envelope::any("work", json!([1, 2]), filter);

        let decoded = Envelope::from_wire(envelope.to_wire().unwrap()).unwrap();
        assert_eq!(decoded.kind, MessageType::EmitAny);
        assert_eq!(decoded.filter.service_name(), Some("foo"));
        assert_eq!(decoded.timeout, None);
    }

    #[test]
    fn test_malformed_envelopes() {
        assert_matches!(
            Envelope::from_wire(json!({"type": "sideways", "event": "x"})),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            Envelope::from_wire(json!({"type": "any", "event": "x", "filter": {"v": {"$near": 1}}})),
            Err(Error::InvalidFilter(_))
        );

        let envelope = Envelope::broadcast("x", Value::Null, Filter::predicate(|_| true));
        assert_matches!(envelope.to_wire(), Err(Error::InvalidFilter(_)));
    }
}
