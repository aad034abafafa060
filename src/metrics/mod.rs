//! Metrics Module
//!
//! Per-node latency samples for load balancing and Prometheus instruments
//! for dispatch activity.

pub mod latency;
pub mod router;

pub use latency::{LatencyCollector, LatencyStats, CACHE_LINE_SIZE};
pub use router::RouterMetrics;
