//! Envelope Dispatcher
//!
//! Decides which connected nodes receive an envelope and delivers it:
//! EMIT_TO by id, EMIT_ANY through the filter engine and the load balancer,
//! BROADCAST to every matching node and PUBLISH to every subscriber.

use crate::balancer::{LoadBalancer, StrategyTable};
use crate::domain::envelope::{Envelope, MessageType};
use crate::domain::ports::{NodeId, Transport};
use crate::error::{Error, Result};
use crate::filter::compile;
use crate::metrics::{LatencyCollector, RouterMetrics};
use crate::registry::NodeRegistry;
use crate::subscription::publish_predicate;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    strategies: Arc<StrategyTable>,
    balancer: LoadBalancer,
    transport: Arc<dyn Transport>,
    latency: Arc<LatencyCollector>,
    metrics: RouterMetrics,
    default_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        strategies: Arc<StrategyTable>,
        transport: Arc<dyn Transport>,
        latency: Arc<LatencyCollector>,
        metrics: RouterMetrics,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            strategies,
            balancer: LoadBalancer::new(latency.clone()),
            transport,
            latency,
            metrics,
            default_timeout,
        }
    }

    /// Recipients of `envelope`. `origin` is the node that sent it and
    /// names the publisher of PUBLISH envelopes.
    pub fn resolve(&self, origin: Option<&NodeId>, envelope: &Envelope) -> Result<Vec<NodeId>> {
        match envelope.kind {
            MessageType::EmitTo => {
                let to = envelope.to.as_ref().ok_or_else(|| {
                    Error::InvalidArgument("EMIT_TO envelope without a recipient id".into())
                })?;
                if !self.registry.contains(to) {
                    return Err(Error::NodeNotFound {
                        node_id: to.to_string(),
                    });
                }
                Ok(vec![to.clone()])
            }
            MessageType::EmitAny => {
                let predicate = compile(&envelope.filter);
                let candidates = self.registry.snapshot(Some(&predicate));
                if candidates.is_empty() {
                    return Err(Error::NoOnlineNode {
                        filter: envelope.filter.describe(),
                    });
                }
                let config = self.strategies.resolve(envelope.filter.service_name());
                let winner = self.balancer.select(&candidates, &config)?;
                debug!(
                    event = %envelope.event,
                    strategy = %config.strategy,
                    winner = %winner,
                    candidates = candidates.len(),
                    "Selected node"
                );
                Ok(vec![winner])
            }
            MessageType::Broadcast => {
                let predicate = compile(&envelope.filter);
                Ok(self.registry.list(Some(&predicate)))
            }
            MessageType::Publish => {
                let publisher = origin
                    .and_then(|id| self.registry.get(id))
                    .and_then(|entry| entry.service_name().map(str::to_string));
                let predicate = publish_predicate(&envelope.event, publisher.as_deref());
                Ok(self.registry.list(Some(&predicate)))
            }
        }
    }

    /// Deliver fire-and-forget. Returns the number of recipients; delivery
    /// failures to single recipients are logged, not returned.
    pub async fn tick(&self, origin: Option<&NodeId>, envelope: &Envelope) -> Result<usize> {
        self.metrics.record_envelope(envelope.kind);
        let targets = match self.resolve(origin, envelope) {
            Ok(targets) => targets,
            Err(e) => {
                self.metrics.record_failure(e.kind());
                return Err(e);
            }
        };

        for target in &targets {
            if let Err(e) = self
                .transport
                .tick(target, &envelope.event, envelope.data.clone())
                .await
            {
                self.metrics.record_failure(e.kind());
                warn!(node = %target, event = %envelope.event, error = %e, "Tick delivery failed");
            }
        }
        debug!(kind = %envelope.kind, event = %envelope.event, targets = targets.len(), "Dispatched tick");
        Ok(targets.len())
    }

    /// Deliver to one node and wait for its reply
    pub async fn request(&self, origin: Option<&NodeId>, envelope: &Envelope) -> Result<Value> {
        self.metrics.record_envelope(envelope.kind);
        let result = self.request_inner(origin, envelope).await;
        if let Err(e) = &result {
            self.metrics.record_failure(e.kind());
        }
        result
    }

    async fn request_inner(&self, origin: Option<&NodeId>, envelope: &Envelope) -> Result<Value> {
        if !matches!(envelope.kind, MessageType::EmitTo | MessageType::EmitAny) {
            return Err(Error::InvalidArgument(format!(
                "requests cannot be sent as '{}'",
                envelope.kind
            )));
        }

        let target = self
            .resolve(origin, envelope)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("resolution returned no recipient".into()))?;
        let timeout = envelope.timeout.unwrap_or(self.default_timeout);

        let started = Instant::now();
        let reply = self
            .transport
            .request(&target, &envelope.event, envelope.data.clone(), timeout)
            .await?;
        let elapsed = started.elapsed();

        self.latency.record(&target, elapsed);
        self.metrics.record_request(elapsed);
        debug!(node = %target, event = %envelope.event, elapsed_ms = elapsed.as_millis() as u64, "Request answered");
        Ok(reply)
    }

    /// Dispatch a wire envelope received as a tick
    pub async fn handle_tick(&self, from: &NodeId, body: Value) -> Result<usize> {
        let envelope = Envelope::from_wire(body)?;
        self.tick(Some(from), &envelope).await
    }

    /// Dispatch a wire envelope received as a request
    pub async fn handle_request(&self, from: &NodeId, body: Value) -> Result<Value> {
        let envelope = Envelope::from_wire(body)?;
        self.request(Some(from), &envelope).await
    }
}
