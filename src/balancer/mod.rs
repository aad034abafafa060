//! Load Balancing
//!
//! Strategy table and the selector that picks one node for EMIT_ANY
//! envelopes.

pub mod selector;
pub mod strategy;
pub mod version;

pub use selector::LoadBalancer;
pub use strategy::{
    Strategy, StrategyConfig, StrategyDefinition, StrategyOptions, StrategyTable, VersionRule,
    DEFAULT_SERVICE_KEY,
};
