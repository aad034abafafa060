//! Mesh Router - Filtered Message Routing for Service Meshes
//!
//! Service nodes connect to routers and declare options (service name,
//! version, region, subscriptions...). Routers deliver their messages by
//! id, to one node picked by a load-balancing strategy among those matching
//! a filter, to every matching node, or to every subscriber of an event.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐             ┌───────────────────────┐
//! │    Network Service    │  envelopes  │    Network Service    │
//! │  (proxy / handlers)   │◄───────┐┌──►│  (proxy / handlers)   │
//! └───────────┬───────────┘        ││   └───────────────────────┘
//!             │ TCP                ││
//! ┌───────────▼────────────────────┴┴─────────────────────────────┐
//! │                         Router Service                        │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌───────────────┐  │
//! │  │  Node Registry  │  │  Filter Engine  │  │ Load Balancer │  │
//! │  └────────┬────────┘  └────────┬────────┘  └───────┬───────┘  │
//! │           └────────────────────┼───────────────────┘          │
//! │                     ┌──────────┴──────────┐                   │
//! │                     │ Envelope Dispatcher │                   │
//! │                     └─────────────────────┘                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`router`]: Router service and envelope dispatcher
//! - [`network`]: Client side of the mesh
//! - [`registry`]: Connected nodes and their options
//! - [`filter`]: Filter specifications and predicate compilation
//! - [`balancer`]: Load-balancing strategies
//! - [`subscription`]: Publish/subscribe tables inside node options
//! - [`transport`]: TCP transport with line-delimited JSON frames
//! - [`storage`]: Peer router persistence
//! - [`metrics`]: Latency samples and Prometheus metrics
//! - [`domain`]: Envelopes and collaborator traits
//! - [`error`]: Error types and handling

pub mod balancer;
pub mod config;
pub mod domain;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod metrics;
pub mod network;
pub mod registry;
pub mod router;
pub mod storage;
pub mod subscription;
pub mod transport;

// Re-export commonly used types
pub use balancer::{LoadBalancer, Strategy, StrategyConfig, StrategyOptions, StrategyTable, VersionRule};

pub use config::{NetworkConfig, RouterConfig};

pub use domain::envelope::{Envelope, MessageType, NEW_ROUTER, ROUTER_MESSAGE};
pub use domain::ports::{
    LatencySource, NodeId, NodeOptions, PeerLink, Responder, Storage, Transport, TransportEvent,
};

pub use error::{Error, ErrorKind, RemoteError, Result};

pub use filter::{Filter, FilterSpec, FilterValue, Operator};

pub use lifecycle::{ServiceInfo, ServiceStatus};

pub use metrics::{LatencyCollector, RouterMetrics};

pub use network::{EventPattern, InboundRequest, InboundTick, NetworkEvent, NetworkService, ServiceHandle};

pub use registry::{NodeEntry, NodeRegistry, RegistryEvent};

pub use router::{Dispatcher, RouterService};

pub use storage::{FileStorage, MemoryStorage, PeerRecord, PeerRouterSet};

pub use subscription::SubscriptionTarget;

pub use transport::{NodeConfig, TcpNode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
