//! Router Service
//!
//! Owns the registry of connected service nodes and turns transport events
//! into registry updates and envelope dispatches. One event loop per router
//! serializes connection handling and tick dispatch; requests are answered
//! from spawned tasks.

use super::dispatcher::Dispatcher;
use crate::balancer::{Strategy, StrategyOptions, StrategyTable};
use crate::config::RouterConfig;
use crate::domain::envelope::{Envelope, NEW_ROUTER, ROUTER_MESSAGE};
use crate::domain::ports::{NodeId, Responder, Transport, TransportEvent};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::lifecycle::{Lifecycle, ServiceInfo, ServiceStatus};
use crate::metrics::{LatencyCollector, RouterMetrics};
use crate::registry::NodeRegistry;
use crate::transport::TcpNode;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name reported by [`RouterService::info`]
const SERVICE_NAME: &str = "router";

pub struct RouterService {
    id: NodeId,
    transport: Arc<dyn Transport>,
    events: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
    registry: Arc<NodeRegistry>,
    strategies: Arc<StrategyTable>,
    latency: Arc<LatencyCollector>,
    metrics: RouterMetrics,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
    bind: String,
    address: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RouterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterService")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("address", &self.address())
            .field("nodes", &self.registry.len())
            .finish()
    }
}

impl RouterService {
    /// Build a router over an existing transport and its event stream
    pub fn new(
        transport: Arc<dyn Transport>,
        events: UnboundedReceiver<TransportEvent>,
        config: &RouterConfig,
    ) -> Result<Arc<Self>> {
        let strategies = Arc::new(StrategyTable::new());
        for definition in &config.strategies {
            strategies.define_from(definition)?;
        }

        let registry = NodeRegistry::new();
        let latency = Arc::new(LatencyCollector::new());
        let metrics = RouterMetrics::new()?;
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            strategies.clone(),
            transport.clone(),
            latency.clone(),
            metrics.clone(),
            config.request_timeout(),
        ));

        Ok(Arc::new(Self {
            id: transport.id().clone(),
            transport,
            events: Mutex::new(Some(events)),
            registry,
            strategies,
            latency,
            metrics,
            dispatcher,
            lifecycle: Mutex::new(Lifecycle::new()),
            bind: config.bind.clone(),
            address: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Build a router on the bundled TCP transport
    pub fn from_config(config: &RouterConfig) -> Result<Arc<Self>> {
        let (node, events) = TcpNode::new(config.node_id(), config.options.clone(), config.node_config());
        Self::new(node, events, config)
    }

    /// Bind the transport and start handling events. Returns the bound address.
    pub async fn start(self: &Arc<Self>) -> Result<String> {
        let events = {
            let lifecycle = self.lifecycle.lock();
            lifecycle.begin_start(&self.id)?;
            self.events
                .lock()
                .take()
                .ok_or_else(|| Error::AlreadyStarted { id: self.id.to_string() })?
        };

        let address = match self.transport.bind(&self.bind).await {
            Ok(address) => address,
            Err(e) => {
                // Still INIT; allow another attempt
                *self.events.lock() = Some(events);
                return Err(e);
            }
        };
        *self.address.lock() = Some(address.clone());
        self.lifecycle.lock().mark_online();

        let router = self.clone();
        tokio::spawn(async move { router.run(events).await });

        info!(router = %self.id, address = %address, "Router online");
        Ok(address)
    }

    /// Stop the router. A router that is not online is left untouched.
    pub async fn stop(&self) -> Result<()> {
        if !self.lifecycle.lock().mark_offline() {
            debug!(router = %self.id, "Stop ignored, router not online");
            return Ok(());
        }
        self.shutdown.cancel();
        self.transport.stop().await?;
        info!(router = %self.id, "Router offline");
        Ok(())
    }

    /// Announce this router to the network served by the router at `address`
    pub async fn connect_to_existing_network(&self, address: &str) -> Result<()> {
        self.lifecycle
            .lock()
            .require_online(&self.id, "connect to an existing network")?;
        let own = self
            .address()
            .ok_or_else(|| Error::Internal("online router without an address".into()))?;

        let link = self.transport.connect(address).await?;
        let announcement = Envelope::broadcast(NEW_ROUTER, json!(own), Filter::any()).to_wire()?;
        let sent = self.transport.tick(&link.id, ROUTER_MESSAGE, announcement).await;
        self.transport.disconnect(address).await?;
        sent?;

        info!(router = %self.id, peer = %link.id, address = %address, "Announced to existing network");
        Ok(())
    }

    /// Define a strategy from its JSON description
    /// (`{service?, strategy, options?}`)
    pub fn define_load_balancing_strategy(&self, definition: &Value) -> Result<()> {
        self.strategies.define_from_value(definition)
    }

    /// Define the strategy for one service, or the default when `service` is `None`
    pub fn define_strategy(
        &self,
        service: Option<&str>,
        strategy: Strategy,
        options: StrategyOptions,
    ) -> Result<()> {
        self.strategies.define(service, strategy, options)
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn status(&self) -> ServiceStatus {
        self.lifecycle.lock().status()
    }

    pub fn info(&self) -> ServiceInfo {
        self.lifecycle
            .lock()
            .info(&self.id, SERVICE_NAME, self.transport.options())
    }

    /// Bound address once started
    pub fn address(&self) -> Option<String> {
        self.address.lock().clone()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    async fn run(self: Arc<Self>, mut events: UnboundedReceiver<TransportEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        debug!(router = %self.id, "Router event loop finished");
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::ClientConnected { id, address, options } => {
                info!(router = %self.id, node = %id, address = %address, "Node connected");
                self.registry.add(id, address, options);
                self.metrics.set_connected_nodes(self.registry.len());
            }
            TransportEvent::ClientStop { id, .. } => {
                info!(router = %self.id, node = %id, "Node left");
                self.forget(&id);
            }
            TransportEvent::ClientFailure { id, .. } => {
                warn!(router = %self.id, node = %id, "Node link failed");
                self.forget(&id);
            }
            TransportEvent::OptionsSync { id, options } => {
                if let Err(e) = self.registry.update_options(&id, options) {
                    warn!(router = %self.id, node = %id, error = %e, "Options sync for unknown node");
                }
            }
            TransportEvent::Tick { from, event, data } if event == ROUTER_MESSAGE => {
                if let Err(e) = self.dispatcher.handle_tick(&from, data).await {
                    warn!(router = %self.id, node = %from, error = %e, "Tick dispatch failed");
                }
            }
            TransportEvent::Request { from, event, data, responder } if event == ROUTER_MESSAGE => {
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    answer(responder, dispatcher.handle_request(&from, data).await);
                });
            }
            TransportEvent::Request { from, event, responder, .. } => {
                debug!(router = %self.id, node = %from, event = %event, "Rejecting request for unknown event");
                responder.fail(&Error::InvalidArgument(format!(
                    "router does not handle '{}'",
                    event
                )));
            }
            other => {
                debug!(router = %self.id, event = other.name(), "Ignoring transport event");
            }
        }
    }

    fn forget(&self, id: &NodeId) {
        self.registry.remove(id);
        self.latency.forget(id);
        self.metrics.set_connected_nodes(self.registry.len());
    }
}

fn answer(responder: Responder, result: Result<Value>) {
    let delivered = match &result {
        Ok(data) => responder.reply(data.clone()),
        Err(e) => responder.fail(e),
    };
    if !delivered {
        error!("Request reply dropped, transport no longer waiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> RouterConfig {
        RouterConfig {
            bind: "127.0.0.1:0".into(),
            ..RouterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let router = RouterService::from_config(&config()).unwrap();
        assert_eq!(router.status(), ServiceStatus::Init);

        // Stop before start is a no-op
        router.stop().await.unwrap();
        assert_eq!(router.status(), ServiceStatus::Init);

        let address = router.start().await.unwrap();
        assert!(address.starts_with("127.0.0.1:"));
        assert_eq!(router.status(), ServiceStatus::Online);
        assert_matches!(router.start().await, Err(Error::AlreadyStarted { .. }));

        router.stop().await.unwrap();
        assert_eq!(router.status(), ServiceStatus::Offline);
        assert!(router.info().stopped.is_some());
        assert_matches!(router.start().await, Err(Error::AlreadyStarted { .. }));
    }

    #[tokio::test]
    async fn test_federation_requires_online() {
        let router = RouterService::from_config(&config()).unwrap();
        assert_matches!(
            router.connect_to_existing_network("127.0.0.1:1").await,
            Err(Error::NotStarted { .. })
        );
    }

    #[tokio::test]
    async fn test_strategies_from_config() {
        let config = RouterConfig {
            strategies: serde_json::from_value(json!([
                {"service": "foo", "strategy": "LATENCY_OPTIMIZED"}
            ]))
            .unwrap(),
            ..config()
        };
        let router = RouterService::from_config(&config).unwrap();
        assert_eq!(router.strategies.resolve(Some("foo")).strategy, Strategy::LatencyOptimized);
        assert_eq!(router.strategies.resolve(Some("bar")).strategy, Strategy::RoundRobin);

        assert_matches!(
            router.define_load_balancing_strategy(&json!({"service": 42, "strategy": "x"})),
            Err(Error::InvalidArgument(_))
        );
    }
}
