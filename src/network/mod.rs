//! Network Service
//!
//! The client side of the mesh: service nodes connect to routers, declare
//! their options and exchange messages through envelopes.

pub mod events;
pub mod handlers;
pub mod service;

pub use events::NetworkEvent;
pub use handlers::{EventPattern, HandlerTable, InboundRequest, InboundTick};
pub use service::{NetworkService, ServiceHandle};
