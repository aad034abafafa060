//! Load Balancer
//!
//! Picks exactly one winner from a non-empty candidate set according to a
//! [`StrategyConfig`].

use super::strategy::{Strategy, StrategyConfig};
use super::version;
use crate::domain::ports::{LatencySource, NodeId};
use crate::error::{Error, Result};
use crate::registry::NodeEntry;
use rand::Rng;
use std::sync::Arc;

/// Strategy-driven node selection
pub struct LoadBalancer {
    latency: Arc<dyn LatencySource>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer").finish_non_exhaustive()
    }
}

impl LoadBalancer {
    pub fn new(latency: Arc<dyn LatencySource>) -> Self {
        Self { latency }
    }

    /// Select one candidate using the thread-local generator
    pub fn select(&self, candidates: &[NodeEntry], config: &StrategyConfig) -> Result<NodeId> {
        self.select_with(candidates, config, &mut rand::thread_rng())
    }

    /// Select one candidate with an explicit random source
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        candidates: &[NodeEntry],
        config: &StrategyConfig,
        rng: &mut R,
    ) -> Result<NodeId> {
        let winner = match config.strategy {
            Strategy::RoundRobin | Strategy::CpuOptimized => version::uniform(candidates, rng),
            Strategy::LatencyOptimized => self.fastest(candidates),
            Strategy::VersionCustomized => {
                version::pick(candidates, &config.options.version_info, rng)
            }
        };

        winner
            .map(|entry| entry.id.clone())
            .ok_or_else(|| Error::Internal("load balancer called without candidates".into()))
    }

    /// Lowest mean latency; unknown nodes count as 0 ms, ties keep the first
    fn fastest<'a>(&self, candidates: &'a [NodeEntry]) -> Option<&'a NodeEntry> {
        let mut best: Option<(&NodeEntry, f64)> = None;
        for candidate in candidates {
            let latency = self.latency.mean_latency_ms(&candidate.id).unwrap_or(0.0);
            match best {
                Some((_, current)) if latency >= current => {}
                _ => best = Some((candidate, latency)),
            }
        }
        best.map(|(entry, _)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::{StrategyOptions, VersionRule};
    use crate::metrics::LatencyCollector;
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn node(id: &str, version: &str) -> NodeEntry {
        let options = json!({"serviceName": "foo", "version": version});
        NodeEntry::new(NodeId::new(id), id.to_string(), options.as_object().cloned().unwrap())
    }

    fn config(strategy: Strategy) -> StrategyConfig {
        StrategyConfig {
            strategy,
            options: StrategyOptions::default(),
        }
    }

    fn tally(
        balancer: &LoadBalancer,
        candidates: &[NodeEntry],
        config: &StrategyConfig,
        trials: usize,
    ) -> HashMap<NodeId, usize> {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = HashMap::new();
        for _ in 0..trials {
            let winner = balancer.select_with(candidates, config, &mut rng).unwrap();
            *counts.entry(winner).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_round_robin_is_uniform() {
        let balancer = LoadBalancer::new(Arc::new(LatencyCollector::new()));
        let candidates = vec![node("a", "1.0.0"), node("b", "1.0.0"), node("c", "1.0.0")];

        let counts = tally(&balancer, &candidates, &config(Strategy::RoundRobin), 3_000);
        for candidate in &candidates {
            let share = counts[&candidate.id] as f64 / 3_000.0;
            assert!((share - 1.0 / 3.0).abs() < 0.1, "share {}", share);
        }
    }

    #[test]
    fn test_latency_optimized_picks_fastest() {
        let latency = Arc::new(LatencyCollector::new());
        latency.record(&NodeId::new("a"), Duration::from_millis(50));
        latency.record(&NodeId::new("b"), Duration::from_millis(10));
        latency.record(&NodeId::new("c"), Duration::from_millis(30));

        let balancer = LoadBalancer::new(latency);
        let candidates = vec![node("a", "1.0.0"), node("b", "1.0.0"), node("c", "1.0.0")];

        let counts = tally(&balancer, &candidates, &config(Strategy::LatencyOptimized), 100);
        assert_eq!(counts.get(&NodeId::new("b")), Some(&100));
    }

    #[test]
    fn test_latency_ties_keep_candidate_order() {
        let balancer = LoadBalancer::new(Arc::new(LatencyCollector::new()));
        let candidates = vec![node("x", "1.0.0"), node("y", "1.0.0")];
        let winner = balancer
            .select(&candidates, &config(Strategy::LatencyOptimized))
            .unwrap();
        assert_eq!(winner, NodeId::new("x"));
    }

    #[test]
    fn test_version_customized_distribution() {
        let balancer = LoadBalancer::new(Arc::new(LatencyCollector::new()));
        let mut candidates = Vec::new();
        for i in 0..10 {
            candidates.push(node(&format!("one-{}", i), "1.4.2"));
        }
        for i in 0..5 {
            candidates.push(node(&format!("two-{}", i), "2.1.0"));
        }

        let config = StrategyConfig {
            strategy: Strategy::VersionCustomized,
            options: StrategyOptions {
                version_info: vec![
                    VersionRule {
                        version: "^1.0.0".into(),
                        prob: 0.7,
                    },
                    VersionRule {
                        version: "^2.0.0".into(),
                        prob: 0.3,
                    },
                ],
            },
        };

        let counts = tally(&balancer, &candidates, &config, 10_000);
        let ones: usize = counts
            .iter()
            .filter(|(id, _)| id.as_str().starts_with("one-"))
            .map(|(_, n)| n)
            .sum();
        let twos = 10_000 - ones;

        assert!((ones as f64 - 7_000.0).abs() <= 350.0, "ones {}", ones);
        assert!((twos as f64 - 3_000.0).abs() <= 150.0, "twos {}", twos);
    }

    #[test]
    fn test_empty_candidates() {
        let balancer = LoadBalancer::new(Arc::new(LatencyCollector::new()));
        assert_matches!(
            balancer.select(&[], &config(Strategy::RoundRobin)),
            Err(Error::Internal(_))
        );
    }
}
