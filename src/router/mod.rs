//! Router
//!
//! The hub of the mesh: service nodes connect to a router, which keeps
//! their options in a registry and routes their envelopes.

pub mod dispatcher;
pub mod service;

pub use dispatcher::Dispatcher;
pub use service::RouterService;
