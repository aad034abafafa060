//! Network Service
//!
//! Client side of the mesh. A network service connects to one or more
//! routers, declares its options to them and sends envelopes through any
//! connected router. Known router addresses survive restarts through the
//! peer router set.

use super::events::NetworkEvent;
use super::handlers::{
    EventPattern, HandlerTable, InboundRequest, InboundTick, RequestHandler, TickHandler,
};
use crate::config::{declare_service_name, NetworkConfig};
use crate::domain::envelope::{Envelope, NEW_ROUTER, ROUTER_MESSAGE};
use crate::domain::ports::{
    NodeId, NodeOptions, Storage, Transport, TransportEvent, SERVICE_NAME_KEY,
};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterSpec};
use crate::lifecycle::{Lifecycle, ServiceInfo, ServiceStatus};
use crate::storage::{PeerRecord, PeerRouterSet};
use crate::subscription::{self, SubscriptionTarget};
use crate::transport::TcpNode;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc::UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct NetworkService {
    id: NodeId,
    name: String,
    transport: Arc<dyn Transport>,
    events: Mutex<Option<UnboundedReceiver<TransportEvent>>>,
    peers: PeerRouterSet,
    /// Routers used when none are stored for this id
    seeds: Vec<String>,
    request_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
    handlers: HandlerTable,
    event_sender: broadcast::Sender<NetworkEvent>,
    /// Held from reading the declared options until they are written back
    options_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for NetworkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkService")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl NetworkService {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: UnboundedReceiver<TransportEvent>,
        storage: Arc<dyn Storage>,
        config: &NetworkConfig,
    ) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(256);
        let id = transport.id().clone();
        Arc::new(Self {
            peers: PeerRouterSet::new(storage, id.clone()),
            id,
            name: config.name.clone(),
            transport,
            events: Mutex::new(Some(events)),
            seeds: config.routers.clone(),
            request_timeout: config.request_timeout(),
            lifecycle: Mutex::new(Lifecycle::new()),
            handlers: HandlerTable::new(),
            event_sender,
            options_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Build a network service on the bundled TCP transport
    pub fn from_config(config: &NetworkConfig, storage: Arc<dyn Storage>) -> Arc<Self> {
        let (node, events) =
            TcpNode::new(config.node_id(), config.declared_options(), config.node_config());
        Self::new(node, events, storage, config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Go online and connect to the known routers. Routers that cannot be
    /// reached are logged and skipped.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let events = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.begin_start(&self.id)?;
            let events = self
                .events
                .lock()
                .take()
                .ok_or_else(|| Error::AlreadyStarted { id: self.id.to_string() })?;
            lifecycle.mark_online();
            events
        };

        let service = self.clone();
        tokio::spawn(async move { service.run(events).await });

        // Transports built outside `from_config` may not carry the name yet
        self.update_options(|options| declare_service_name(options, &self.name))
            .await?;

        let mut addresses = self.peers.addresses().await?;
        if addresses.is_empty() {
            addresses = self.seeds.clone();
        }
        let attempts = addresses.iter().map(|address| self.connect(address));
        for (address, result) in addresses.iter().zip(join_all(attempts).await) {
            if let Err(e) = result {
                warn!(service = %self.id, address = %address, error = %e, "Cannot reach router");
            }
        }

        info!(
            service = %self.id,
            name = %self.name,
            routers = self.transport.servers().len(),
            "Network service online"
        );
        Ok(())
    }

    /// Stop the service. A service that is not online is left untouched.
    pub async fn stop(&self) -> Result<()> {
        if !self.lifecycle.lock().mark_offline() {
            debug!(service = %self.id, "Stop ignored, service not online");
            return Ok(());
        }
        self.shutdown.cancel();
        self.transport.stop().await?;
        info!(service = %self.id, "Network service offline");
        Ok(())
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
            .info(&self.id, &self.name, self.transport.options())
    }

    /// Membership events; subscribe before `start` to see every one
    pub fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.event_sender.subscribe()
    }

    fn require_online(&self, reason: &str) -> Result<()> {
        self.lifecycle.lock().require_online(&self.id, reason)
    }

    // =========================================================================
    // Routers
    // =========================================================================

    /// Connect to a router and remember its address
    pub async fn connect(&self, address: &str) -> Result<PeerRecord> {
        self.require_online("connect to a router")?;
        let link = self.transport.connect(address).await?;
        let record = self.peers.add(address).await?;
        debug!(service = %self.id, router = %link.id, address = %address, "Connected to router");
        Ok(record)
    }

    /// Disconnect from a router and forget it. Unknown addresses yield `None`.
    pub async fn disconnect(&self, address: &str) -> Result<Option<PeerRecord>> {
        self.transport.disconnect(address).await?;
        self.peers.remove(address).await
    }

    /// Remember a router address without connecting
    pub async fn add_router(&self, address: &str) -> Result<PeerRecord> {
        self.peers.add(address).await
    }

    pub async fn remove_router(&self, address: &str) -> Result<Option<PeerRecord>> {
        self.peers.remove(address).await
    }

    /// Stored router addresses of this service
    pub async fn routers(&self) -> Result<Vec<PeerRecord>> {
        self.peers.list().await
    }

    /// Ids of the routers currently linked
    pub fn connected_routers(&self) -> Vec<NodeId> {
        self.transport.servers().into_iter().map(|link| link.id).collect()
    }

    fn pick_router(&self) -> Result<NodeId> {
        let servers = self.transport.servers();
        servers
            .choose(&mut rand::thread_rng())
            .map(|link| link.id.clone())
            .ok_or_else(|| Error::NoOnlineRouter {
                service_id: self.id.to_string(),
            })
    }

    // =========================================================================
    // Options and Subscriptions
    // =========================================================================

    pub fn options(&self) -> NodeOptions {
        self.transport.options()
    }

    /// Replace the declared options and sync them to every router
    pub async fn set_options(&self, options: NodeOptions) -> Result<()> {
        let _guard = self.options_lock.lock().await;
        self.transport.set_options(options).await
    }

    /// Change the declared options in place. `change` returns whether
    /// anything changed; only then are routers told.
    async fn update_options(&self, change: impl FnOnce(&mut NodeOptions) -> bool) -> Result<()> {
        let _guard = self.options_lock.lock().await;
        let mut options = self.transport.options();
        if change(&mut options) {
            self.transport.set_options(options).await?;
        }
        Ok(())
    }

    /// Subscribe to `event` published by `target` and handle it
    pub async fn subscribe(
        &self,
        event: &str,
        target: impl Into<SubscriptionTarget>,
        handler: impl Fn(InboundTick) + Send + Sync + 'static,
    ) -> Result<()> {
        let target = target.into();
        self.update_options(|options| {
            subscription::subscribe(options, event, target);
            true
        })
        .await?;
        self.handlers
            .on_tick(EventPattern::Exact(event.to_string()), Arc::new(handler));
        Ok(())
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    pub fn on_tick(
        &self,
        pattern: impl Into<EventPattern>,
        handler: impl Fn(InboundTick) + Send + Sync + 'static,
    ) {
        let handler: TickHandler = Arc::new(handler);
        self.handlers.on_tick(pattern.into(), handler);
    }

    pub fn on_request(
        &self,
        pattern: impl Into<EventPattern>,
        handler: impl Fn(InboundRequest) + Send + Sync + 'static,
    ) {
        let handler: RequestHandler = Arc::new(handler);
        self.handlers.on_request(pattern.into(), handler);
    }

    pub fn off_tick(&self, pattern: impl Into<EventPattern>) -> usize {
        self.handlers.off_tick(&pattern.into())
    }

    pub fn off_request(&self, pattern: impl Into<EventPattern>) -> usize {
        self.handlers.off_request(&pattern.into())
    }

    // =========================================================================
    // Proxy API
    // =========================================================================

    async fn send_tick(&self, envelope: Envelope) -> Result<()> {
        self.require_online("tick")?;
        let router = self.pick_router()?;
        let wire = envelope.to_wire()?;
        self.transport.tick(&router, ROUTER_MESSAGE, wire).await
    }

    async fn send_request(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<Value> {
        self.require_online("request")?;
        let router = self.pick_router()?;
        let timeout = timeout.unwrap_or(self.request_timeout);
        let wire = envelope.with_timeout(timeout).to_wire()?;
        self.transport.request(&router, ROUTER_MESSAGE, wire, timeout).await
    }

    /// Send `event` to the node with id `to`
    pub async fn proxy_tick(&self, to: &NodeId, event: &str, data: Value) -> Result<()> {
        self.send_tick(Envelope::to(to.clone(), event, data)).await
    }

    /// Send `event` to one node matching `filter`
    pub async fn proxy_tick_any(
        &self,
        event: &str,
        data: Value,
        filter: impl Into<Filter>,
    ) -> Result<()> {
        self.send_tick(Envelope::any(event, data, filter)).await
    }

    /// Send `event` to every node matching `filter`
    pub async fn proxy_tick_all(
        &self,
        event: &str,
        data: Value,
        filter: impl Into<Filter>,
    ) -> Result<()> {
        self.send_tick(Envelope::broadcast(event, data, filter)).await
    }

    pub async fn proxy_request(
        &self,
        to: &NodeId,
        event: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.send_request(Envelope::to(to.clone(), event, data), timeout)
            .await
    }

    pub async fn proxy_request_any(
        &self,
        event: &str,
        data: Value,
        filter: impl Into<Filter>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.send_request(Envelope::any(event, data, filter), timeout)
            .await
    }

    /// Deliver `event` to every subscriber of it
    pub async fn publish(&self, event: &str, data: Value) -> Result<()> {
        self.send_tick(Envelope::publish(event, data)).await
    }

    /// Messaging scoped to the nodes of one service
    pub fn service(&self, name: impl Into<String>) -> ServiceHandle<'_> {
        ServiceHandle {
            network: self,
            name: name.into(),
        }
    }

    /// Tick a router directly, outside envelope routing
    pub async fn tick_router(&self, to: &NodeId, event: &str, data: Value) -> Result<()> {
        self.require_online("tick a router")?;
        self.transport.tick(to, event, data).await
    }

    /// Request a router directly, outside envelope routing
    pub async fn request_router(
        &self,
        to: &NodeId,
        event: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.require_online("request a router")?;
        self.transport
            .request(to, event, data, timeout.unwrap_or(self.request_timeout))
            .await
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
        debug!(service = %self.id, "Network event loop finished");
    }

    async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Tick { event, data, .. } if event == NEW_ROUTER => {
                self.on_new_router(data).await;
            }
            TransportEvent::Tick { from, event, data } => {
                let handled = self.handlers.dispatch_tick(InboundTick {
                    from,
                    event: event.clone(),
                    body: data,
                });
                if handled == 0 {
                    debug!(service = %self.id, event = %event, "No tick handler");
                }
            }
            TransportEvent::Request { from, event, data, responder } => {
                self.handlers.dispatch_request(InboundRequest {
                    from,
                    event,
                    body: data,
                    responder,
                });
            }
            TransportEvent::ServerFailure { id, address } => {
                warn!(service = %self.id, router = %id, address = %address, "Router link failed");
                self.forget_router(&address).await;
                self.emit(NetworkEvent::RouterFail { id, address });
            }
            TransportEvent::ServerReconnect { id, address } => {
                info!(service = %self.id, router = %id, address = %address, "Router reconnected");
                if let Err(e) = self.peers.add(&address).await {
                    warn!(service = %self.id, address = %address, error = %e, "Cannot store router");
                }
                self.emit(NetworkEvent::RouterReconnect { id, address });
            }
            TransportEvent::ServerReconnectFailure { address } => {
                warn!(service = %self.id, address = %address, "Gave up reconnecting to router");
                self.emit(NetworkEvent::RouterReconnectFailure { address });
            }
            TransportEvent::ServerStop { id, address } => {
                info!(service = %self.id, router = %id, address = %address, "Router stopped");
                if let Err(e) = self.transport.disconnect(&address).await {
                    warn!(service = %self.id, address = %address, error = %e, "Disconnect failed");
                }
                self.forget_router(&address).await;
                self.emit(NetworkEvent::RouterStop { id, address });
            }
            other => {
                debug!(service = %self.id, event = other.name(), "Ignoring transport event");
            }
        }
    }

    async fn on_new_router(&self, data: Value) {
        let Some(address) = data.as_str() else {
            warn!(service = %self.id, data = %data, "Malformed router announcement");
            return;
        };
        let known = self.transport.servers().iter().any(|link| link.address == address);
        match self.connect(address).await {
            Ok(_) if known => debug!(service = %self.id, address = %address, "Router already known"),
            Ok(_) => {
                info!(service = %self.id, address = %address, "Joined announced router");
                self.emit(NetworkEvent::NewRouter {
                    address: address.to_string(),
                });
            }
            Err(e) => warn!(service = %self.id, address = %address, error = %e, "Cannot join announced router"),
        }
    }

    async fn forget_router(&self, address: &str) {
        if let Err(e) = self.peers.remove(address).await {
            warn!(service = %self.id, address = %address, error = %e, "Cannot forget router");
        }
    }

    fn emit(&self, event: NetworkEvent) {
        // No receivers is fine
        let _ = self.event_sender.send(event);
    }
}

// =============================================================================
// Service Handle
// =============================================================================

/// Proxy calls restricted to nodes whose `serviceName` is `name`
#[derive(Debug)]
pub struct ServiceHandle<'a> {
    network: &'a NetworkService,
    name: String,
}

impl ServiceHandle<'_> {
    fn filter(&self) -> FilterSpec {
        FilterSpec::new().field(SERVICE_NAME_KEY, self.name.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn tick_any(&self, event: &str, data: Value) -> Result<()> {
        self.network.proxy_tick_any(event, data, self.filter()).await
    }

    pub async fn tick_all(&self, event: &str, data: Value) -> Result<()> {
        self.network.proxy_tick_all(event, data, self.filter()).await
    }

    pub async fn request_any(
        &self,
        event: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.network
            .proxy_request_any(event, data, self.filter(), timeout)
            .await
    }
}
