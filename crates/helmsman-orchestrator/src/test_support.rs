//! Fakes shared by the unit tests of this crate.

use async_trait::async_trait;
use helmsman_common::{
    HealthPayload, Heartbeat, LoadMetrics, NodeInfo, NodeTransport, TransportError,
    TransportResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Transport answering from canned per-node data.
///
/// Nodes are healthy and accept heartbeats unless told otherwise. Metrics
/// requests fail for nodes without a configured sample.
#[derive(Default)]
pub struct FakeTransport {
    pub registry: Mutex<Vec<NodeInfo>>,
    pub registry_failures_left: AtomicU32,
    pub registry_calls: AtomicU32,
    pub health: Mutex<HashMap<String, bool>>,
    pub metrics: Mutex<HashMap<String, LoadMetrics>>,
    pub heartbeat_ok: Mutex<HashMap<String, bool>>,
    pub sequences: Mutex<Vec<u64>>,
}

impl FakeTransport {
    pub fn set_registry(&self, nodes: Vec<NodeInfo>) {
        *self.registry.lock().unwrap() = nodes;
    }

    pub fn set_health(&self, node_id: &str, healthy: bool) {
        self.health.lock().unwrap().insert(node_id.to_string(), healthy);
    }

    pub fn set_metrics(&self, node_id: &str, metrics: LoadMetrics) {
        self.metrics.lock().unwrap().insert(node_id.to_string(), metrics);
    }

    pub fn set_heartbeat_ok(&self, node_id: &str, ok: bool) {
        self.heartbeat_ok.lock().unwrap().insert(node_id.to_string(), ok);
    }
}

#[async_trait]
impl NodeTransport for FakeTransport {
    async fn fetch_registry(&self, _url: &str, _timeout: Duration) -> TransportResult<Vec<NodeInfo>> {
        self.registry_calls.fetch_add(1, Ordering::SeqCst);
        if self.registry_failures_left.load(Ordering::SeqCst) > 0 {
            self.registry_failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Connection("refused".to_string()));
        }
        Ok(self.registry.lock().unwrap().clone())
    }

    async fn probe_health(&self, node: &NodeInfo, _timeout: Duration) -> TransportResult<HealthPayload> {
        let healthy = *self.health.lock().unwrap().get(&node.node_id).unwrap_or(&true);
        if healthy {
            Ok(HealthPayload::healthy())
        } else {
            Err(TransportError::Status(503))
        }
    }

    async fn fetch_metrics(&self, node: &NodeInfo, _timeout: Duration) -> TransportResult<LoadMetrics> {
        self.metrics
            .lock()
            .unwrap()
            .get(&node.node_id)
            .cloned()
            .ok_or(TransportError::Status(404))
    }

    async fn send_heartbeat(
        &self,
        node: &NodeInfo,
        heartbeat: &Heartbeat,
        _timeout: Duration,
    ) -> TransportResult<()> {
        self.sequences.lock().unwrap().push(heartbeat.sequence);
        let ok = *self.heartbeat_ok.lock().unwrap().get(&node.node_id).unwrap_or(&true);
        if ok {
            Ok(())
        } else {
            Err(TransportError::Timeout(10))
        }
    }
}

/// A load sample with the given CPU and memory usage.
pub fn load(cpu: f64, memory: f64) -> LoadMetrics {
    LoadMetrics {
        cpu_usage: cpu,
        memory_usage: memory,
        ..Default::default()
    }
}
