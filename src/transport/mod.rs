//! Transport Module
//!
//! Bundled TCP implementation of the
//! [`Transport`](crate::domain::ports::Transport) port.

pub mod frame;
pub mod node;

pub use frame::Frame;
pub use node::{NodeConfig, TcpNode};
