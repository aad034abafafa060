//! Latency Collector
//!
//! Cache-line aligned per-node request latency statistics, read by the
//! latency-optimized load balancing strategy.

use crate::domain::ports::{LatencySource, NodeId};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Latency statistics for one node, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct LatencyStats {
    /// Number of samples
    pub samples: AtomicU64,
    /// Sum of all samples in microseconds
    pub total_us: AtomicU64,
    /// Most recent sample in microseconds
    pub last_us: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 32],
}

const _: () = assert!(std::mem::size_of::<LatencyStats>() <= CACHE_LINE_SIZE);

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            samples: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            last_us: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 32],
        }
    }
}

impl LatencyStats {
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(micros, Ordering::Relaxed);
        self.last_us.store(micros, Ordering::Relaxed);
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Mean latency in milliseconds
    pub fn mean_ms(&self) -> Option<f64> {
        let samples = self.samples.load(Ordering::Relaxed);
        if samples == 0 {
            return None;
        }
        Some(self.total_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0)
    }
}

/// Per-node latency collector
#[derive(Debug, Default)]
pub struct LatencyCollector {
    nodes: DashMap<NodeId, Arc<LatencyStats>>,
}

impl LatencyCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful request round trip
    pub fn record(&self, node: &NodeId, elapsed: Duration) {
        let stats = self
            .nodes
            .entry(node.clone())
            .or_insert_with(|| Arc::new(LatencyStats::default()))
            .clone();
        stats.record(elapsed);
    }

    /// Drop the samples of a node that left
    pub fn forget(&self, node: &NodeId) {
        self.nodes.remove(node);
    }

    pub fn stats(&self, node: &NodeId) -> Option<Arc<LatencyStats>> {
        self.nodes.get(node).map(|stats| stats.clone())
    }

    pub fn tracked_nodes(&self) -> usize {
        self.nodes.len()
    }
}

impl LatencySource for LatencyCollector {
    fn mean_latency_ms(&self, node: &NodeId) -> Option<f64> {
        self.nodes.get(node).and_then(|stats| stats.mean_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats_alignment() {
        assert_eq!(std::mem::align_of::<LatencyStats>(), CACHE_LINE_SIZE);
    }

    #[test]
    fn test_mean_latency() {
        let collector = LatencyCollector::new();
        let node = NodeId::new("a");
        assert_eq!(collector.mean_latency_ms(&node), None);

        collector.record(&node, Duration::from_millis(10));
        collector.record(&node, Duration::from_millis(30));
        let mean = collector.mean_latency_ms(&node).unwrap();
        assert!((mean - 20.0).abs() < 1e-6);

        collector.forget(&node);
        assert_eq!(collector.mean_latency_ms(&node), None);
        assert_eq!(collector.tracked_nodes(), 0);
    }
}
