//! Benchmarks for the routing hot path
//!
//! Candidate selection over a registry of 1,000 nodes.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mesh_router::balancer::{LoadBalancer, Strategy, StrategyConfig, StrategyOptions, VersionRule};
use mesh_router::filter::{compile, Filter, FilterSpec, Operator};
use mesh_router::metrics::LatencyCollector;
use mesh_router::registry::NodeRegistry;
use mesh_router::NodeId;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SERVICES: [&str; 4] = ["billing", "orders", "search", "users"];

fn populated_registry() -> Arc<NodeRegistry> {
    let registry = NodeRegistry::new();
    for i in 0..1000 {
        let options = json!({
            "serviceName": SERVICES[i % SERVICES.len()],
            "version": if i % 3 == 0 { "2.1.0" } else { "1.4.2" },
            "region": if i % 2 == 0 { "eu-west" } else { "us-east" },
            "load": i % 100,
        });
        registry.add(
            format!("node-{:04}", i),
            format!("10.0.{}.{}:7600", i / 256, i % 256),
            options.as_object().cloned().unwrap_or_default(),
        );
    }
    registry
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    group.throughput(Throughput::Elements(1000));
    let registry = populated_registry();

    let by_service = compile(&Filter::service("orders"));
    group.bench_function("service_literal_1000_nodes", |b| {
        b.iter(|| black_box(registry.list(Some(&by_service))));
    });

    let complex: Filter = FilterSpec::new()
        .field("serviceName", Regex::new("^(orders|search)$").unwrap())
        .field("region", Operator::In(vec![json!("eu-west")]))
        .field("load", vec![Operator::Gte(json!(10)), Operator::Lt(json!(60))])
        .into();
    let complex = compile(&complex);
    group.bench_function("regex_and_operators_1000_nodes", |b| {
        b.iter(|| black_box(registry.snapshot(Some(&complex))));
    });

    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("balancer");
    group.throughput(Throughput::Elements(1));

    let registry = populated_registry();
    let candidates = registry.snapshot(Some(&compile(&Filter::service("orders"))));
    let latency = Arc::new(LatencyCollector::new());
    for (i, entry) in candidates.iter().enumerate() {
        latency.record(&entry.id, Duration::from_millis(5 + (i as u64 % 40)));
    }
    let balancer = LoadBalancer::new(latency);

    let round_robin = StrategyConfig::default();
    group.bench_function("round_robin_250", |b| {
        b.iter(|| black_box(balancer.select(&candidates, &round_robin)));
    });

    let fastest = StrategyConfig {
        strategy: Strategy::LatencyOptimized,
        options: StrategyOptions::default(),
    };
    group.bench_function("latency_optimized_250", |b| {
        b.iter(|| black_box(balancer.select(&candidates, &fastest)));
    });

    let versioned = StrategyConfig {
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
    group.bench_function("version_customized_250", |b| {
        b.iter(|| black_box(balancer.select(&candidates, &versioned)));
    });

    group.finish();
}

fn bench_registry_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));
    let registry = populated_registry();

    group.bench_function("options_update", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let id = NodeId::new(format!("node-{:04}", counter % 1000));
            let options = json!({"serviceName": "orders", "load": counter % 100});
            let _ = registry.update_options(
                black_box(&id),
                options.as_object().cloned().unwrap_or_default(),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_filter, bench_select, bench_registry_churn);
criterion_main!(benches);
