// Criterion benchmarks for helmsman-orchestrator routing
//
// Run benchmarks with:
//   cargo bench -p helmsman-orchestrator
//
// For detailed output with plots:
//   cargo bench -p helmsman-orchestrator -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use helmsman_common::{LoadMetrics, NodeInfo, OrchestratorMessage, RoutingAlgorithm};
use helmsman_metrics::OrchestratorMetricsCollector;
use helmsman_orchestrator::config::RoutingConfig;
use helmsman_orchestrator::IntelligentRoutingService;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn service(rt: &Runtime, algorithm: RoutingAlgorithm, node_count: usize) -> IntelligentRoutingService {
    let config = RoutingConfig {
        algorithm,
        ..RoutingConfig::default()
    };
    let service = IntelligentRoutingService::new(config, OrchestratorMetricsCollector::new());
    rt.block_on(async {
        for i in 0..node_count {
            let node = NodeInfo::new(format!("node{}", i), "fed", "10.0.0.1", 8080 + i as u16)
                .with_region(if i % 2 == 0 { "eu" } else { "us" });
            service.add_node(&node).await;
            service
                .update_node_load(
                    &node.node_id,
                    LoadMetrics {
                        cpu_usage: (i * 7 % 100) as f64,
                        memory_usage: (i * 13 % 100) as f64,
                        response_time: (i * 3 % 200) as f64,
                        ..Default::default()
                    },
                )
                .await;
        }
    });
    service
}

fn bench_route_message(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("route_message");

    for algorithm in [
        RoutingAlgorithm::RoundRobin,
        RoutingAlgorithm::WeightedRoundRobin,
        RoutingAlgorithm::LeastConnections,
        RoutingAlgorithm::Adaptive,
    ] {
        for node_count in [5, 50].iter() {
            let service = service(&rt, algorithm, *node_count);
            let message = OrchestratorMessage::new("task", serde_json::Value::Null);
            group.bench_with_input(
                BenchmarkId::new(algorithm.as_str(), node_count),
                node_count,
                |b, _| {
                    b.iter(|| rt.block_on(service.route_message(black_box(&message))));
                },
            );
        }
    }

    group.finish();
}

fn bench_geographic(c: &mut Criterion) {
    let rt = runtime();
    let service = service(&rt, RoutingAlgorithm::Geographic, 20);
    let message = OrchestratorMessage::new("task", serde_json::Value::Null).with_region_hint("eu");

    c.bench_function("route_message_geographic_20_nodes", |b| {
        b.iter(|| rt.block_on(service.route_message(black_box(&message))));
    });
}

criterion_group!(benches, bench_route_message, bench_geographic);
criterion_main!(benches);
