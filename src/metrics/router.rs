//! Router Metrics
//!
//! Prometheus instruments for dispatch activity, kept in a registry owned by
//! each router so several routers can live in one process.

use crate::domain::envelope::MessageType;
use crate::error::{ErrorKind, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Dispatch counters and gauges
#[derive(Clone)]
pub struct RouterMetrics {
    registry: Registry,
    envelopes: IntCounterVec,
    failures: IntCounterVec,
    connected_nodes: IntGauge,
    request_duration: Histogram,
}

impl std::fmt::Debug for RouterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetrics")
            .field("connected_nodes", &self.connected_nodes.get())
            .finish()
    }
}

impl RouterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let envelopes = IntCounterVec::new(
            Opts::new("mesh_router_envelopes_total", "Envelopes dispatched by type"),
            &["type"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("mesh_router_failures_total", "Dispatch failures by error kind"),
            &["kind"],
        )?;
        let connected_nodes = IntGauge::new(
            "mesh_router_connected_nodes",
            "Nodes currently connected to the router",
        )?;
        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "mesh_router_request_duration_seconds",
            "Round trip of routed requests",
        ))?;

        registry.register(Box::new(envelopes.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(connected_nodes.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            envelopes,
            failures,
            connected_nodes,
            request_duration,
        })
    }

    #[inline]
    pub fn record_envelope(&self, kind: MessageType) {
        self.envelopes.with_label_values(&[kind.as_str()]).inc();
    }

    #[inline]
    pub fn record_failure(&self, kind: ErrorKind) {
        self.failures.with_label_values(&[&kind.to_string()]).inc();
    }

    #[inline]
    pub fn record_request(&self, elapsed: Duration) {
        self.request_duration.observe(elapsed.as_secs_f64());
    }

    pub fn set_connected_nodes(&self, count: usize) {
        self.connected_nodes.set(count as i64);
    }

    pub fn envelopes(&self, kind: MessageType) -> u64 {
        self.envelopes.with_label_values(&[kind.as_str()]).get()
    }

    pub fn failures(&self, kind: ErrorKind) -> u64 {
        self.failures.with_label_values(&[&kind.to_string()]).get()
    }

    /// Text exposition of every instrument
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_exposition() {
        let metrics = RouterMetrics::new().unwrap();
        metrics.record_envelope(MessageType::EmitAny);
        metrics.record_envelope(MessageType::EmitAny);
        metrics.record_failure(ErrorKind::NoOnlineNode);
        metrics.set_connected_nodes(3);

        assert_eq!(metrics.envelopes(MessageType::EmitAny), 2);
        assert_eq!(metrics.failures(ErrorKind::NoOnlineNode), 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("mesh_router_connected_nodes 3"));
        assert!(text.contains("type=\"any\""));
    }

    #[test]
    fn test_independent_registries() {
        let a = RouterMetrics::new().unwrap();
        let b = RouterMetrics::new().unwrap();
        a.record_envelope(MessageType::Publish);
        assert_eq!(b.envelopes(MessageType::Publish), 0);
    }
}
