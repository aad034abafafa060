//! Inbound Handlers
//!
//! Tick and request handlers registered by a network service, keyed by an
//! exact event name or a regular expression over event names.

use crate::domain::ports::{NodeId, Responder};
use crate::error::Error;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Selects the events a handler receives
#[derive(Debug, Clone)]
pub enum EventPattern {
    Exact(String),
    Regex(Regex),
}

impl EventPattern {
    pub fn matches(&self, event: &str) -> bool {
        match self {
            EventPattern::Exact(name) => name == event,
            EventPattern::Regex(re) => re.is_match(event),
        }
    }

    fn same_as(&self, other: &EventPattern) -> bool {
        match (self, other) {
            (EventPattern::Exact(a), EventPattern::Exact(b)) => a == b,
            (EventPattern::Regex(a), EventPattern::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl From<&str> for EventPattern {
    fn from(name: &str) -> Self {
        EventPattern::Exact(name.to_string())
    }
}

impl From<String> for EventPattern {
    fn from(name: String) -> Self {
        EventPattern::Exact(name)
    }
}

impl From<Regex> for EventPattern {
    fn from(re: Regex) -> Self {
        EventPattern::Regex(re)
    }
}

/// Fire-and-forget message delivered to this service
#[derive(Debug, Clone)]
pub struct InboundTick {
    /// Router that delivered the message
    pub from: NodeId,
    pub event: String,
    pub body: Value,
}

/// Request delivered to this service; answer it through `responder`
#[derive(Debug)]
pub struct InboundRequest {
    pub from: NodeId,
    pub event: String,
    pub body: Value,
    pub responder: Responder,
}

pub type TickHandler = Arc<dyn Fn(InboundTick) + Send + Sync>;
pub type RequestHandler = Arc<dyn Fn(InboundRequest) + Send + Sync>;

/// Registered handlers. Every matching tick handler runs; the first
/// matching request handler answers.
#[derive(Default)]
pub struct HandlerTable {
    ticks: RwLock<Vec<(EventPattern, TickHandler)>>,
    requests: RwLock<Vec<(EventPattern, RequestHandler)>>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("ticks", &self.ticks.read().len())
            .field("requests", &self.requests.read().len())
            .finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tick(&self, pattern: EventPattern, handler: TickHandler) {
        self.ticks.write().push((pattern, handler));
    }

    pub fn on_request(&self, pattern: EventPattern, handler: RequestHandler) {
        self.requests.write().push((pattern, handler));
    }

    /// Remove every tick handler registered under `pattern`
    pub fn off_tick(&self, pattern: &EventPattern) -> usize {
        let mut ticks = self.ticks.write();
        let before = ticks.len();
        ticks.retain(|(existing, _)| !existing.same_as(pattern));
        before - ticks.len()
    }

    /// Remove every request handler registered under `pattern`
    pub fn off_request(&self, pattern: &EventPattern) -> usize {
        let mut requests = self.requests.write();
        let before = requests.len();
        requests.retain(|(existing, _)| !existing.same_as(pattern));
        before - requests.len()
    }

    /// Run the matching tick handlers. Returns how many ran.
    pub fn dispatch_tick(&self, tick: InboundTick) -> usize {
        // Handlers run outside the lock so they may register others
        let matching: Vec<TickHandler> = self
            .ticks
            .read()
            .iter()
            .filter(|(pattern, _)| pattern.matches(&tick.event))
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in &matching {
            handler(tick.clone());
        }
        matching.len()
    }

    /// Hand the request to the first matching handler, or reject it
    pub fn dispatch_request(&self, request: InboundRequest) -> bool {
        let handler = self
            .requests
            .read()
            .iter()
            .find(|(pattern, _)| pattern.matches(&request.event))
            .map(|(_, handler)| handler.clone());
        match handler {
            Some(handler) => {
                handler(request);
                true
            }
            None => {
                let error = Error::InvalidArgument(format!("no handler for '{}'", request.event));
                request.responder.fail(&error);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick(event: &str) -> InboundTick {
        InboundTick {
            from: NodeId::new("router"),
            event: event.to_string(),
            body: Value::Null,
        }
    }

    #[test]
    fn test_exact_and_regex_patterns() {
        let table = HandlerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        table.on_tick("user.created".into(), Arc::new(move |_: InboundTick| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = hits.clone();
        table.on_tick(Regex::new(r"^user\.").unwrap().into(), Arc::new(move |_: InboundTick| {
            counter.fetch_add(10, Ordering::SeqCst);
        }));

        assert_eq!(table.dispatch_tick(tick("user.created")), 2);
        assert_eq!(table.dispatch_tick(tick("user.deleted")), 1);
        assert_eq!(table.dispatch_tick(tick("order.created")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_off_removes_by_pattern() {
        let table = HandlerTable::new();
        table.on_tick("a".into(), Arc::new(|_: InboundTick| {}));
        table.on_tick("a".into(), Arc::new(|_: InboundTick| {}));
        table.on_tick(Regex::new("a").unwrap().into(), Arc::new(|_: InboundTick| {}));

        assert_eq!(table.off_tick(&"a".into()), 2);
        assert_eq!(table.dispatch_tick(tick("a")), 1);
        assert_eq!(table.off_tick(&Regex::new("a").unwrap().into()), 1);
        assert_eq!(table.dispatch_tick(tick("a")), 0);
    }

    #[tokio::test]
    async fn test_unhandled_request_is_rejected() {
        let table = HandlerTable::new();
        table.on_request("sum".into(), Arc::new(|request: InboundRequest| {
            let total: i64 = request
                .body
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            request.responder.reply(json!(total));
        }));

        let (responder, rx) = Responder::channel();
        assert!(table.dispatch_request(InboundRequest {
            from: NodeId::new("router"),
            event: "sum".into(),
            body: json!([1, 2, 3]),
            responder,
        }));
        assert_eq!(rx.await.unwrap().unwrap(), json!(6));

        let (responder, rx) = Responder::channel();
        assert!(!table.dispatch_request(InboundRequest {
            from: NodeId::new("router"),
            event: "product".into(),
            body: Value::Null,
            responder,
        }));
        assert_eq!(rx.await.unwrap().unwrap_err().kind, ErrorKind::InvalidArgument);
    }
}
