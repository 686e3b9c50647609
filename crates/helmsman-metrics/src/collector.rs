// Copyright 2025 Helmsman Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::MetricsRegistry;
use crate::snapshot::{MetricsSnapshot, ServerInfo, ServiceHealth, ServiceKind};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for the global orchestrator.
///
/// `OrchestratorMetricsCollector` is shared by every service of one
/// orchestrator. Services report routing outcomes, executed scaling and
/// failover actions, and the outcome of each background cycle. The
/// facade reads the counters back through [`snapshot`](Self::snapshot)
/// and [`service_health`](Self::service_health).
///
/// Cloning is cheap and every clone writes to the same registry.
///
/// # Example
///
/// ```rust
/// use helmsman_metrics::{OrchestratorMetricsCollector, ServiceKind, ServiceStatus};
/// use std::time::Instant;
///
/// let collector = OrchestratorMetricsCollector::new();
///
/// let start = Instant::now();
/// // ... pick a node ...
/// collector.record_routing("node-1", false, start);
///
/// collector.record_service_failure(ServiceKind::Discovery, "registry unreachable");
/// let health = collector.service_health(ServiceKind::Discovery, true);
/// assert_eq!(health.status, ServiceStatus::Degraded);
///
/// assert_eq!(collector.snapshot().routing_decisions, 1);
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorMetricsCollector {
    registry: Arc<MetricsRegistry>,
}

impl OrchestratorMetricsCollector {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    /// Records a successful routing decision.
    ///
    /// # Arguments
    /// * `node_id` - The node the message was routed to
    /// * `cross_federation` - Whether the message left its source federation
    /// * `start_time` - When routing of the message began
    pub fn record_routing(&self, node_id: &str, cross_federation: bool, start_time: Instant) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry
            .record_routing_decision(node_id, cross_federation, latency_us);
    }

    /// Records a message that could not be routed.
    pub fn record_routing_failure(&self, start_time: Instant) {
        let latency_us = start_time.elapsed().as_micros() as u64;
        self.registry.record_routing_failure(latency_us);
    }

    pub fn record_scaling_event(&self) {
        self.registry.record_scaling_event();
    }

    pub fn record_failover_event(&self) {
        self.registry.record_failover_event();
    }

    /// Records a completed background cycle of `service`, clearing its failure streak.
    pub fn record_service_success(&self, service: ServiceKind) {
        self.registry.record_service_success(service);
    }

    /// Records a failed background cycle of `service`.
    pub fn record_service_failure(&self, service: ServiceKind, error: &str) {
        self.registry.record_service_failure(service, error);
    }

    pub fn service_health(&self, service: ServiceKind, running: bool) -> ServiceHealth {
        self.registry.service_health(service, running)
    }

    /// Removes routing counters of a node that left the fleet.
    pub fn forget_node(&self, node_id: &str) {
        self.registry.forget_node(node_id);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.registry.uptime_ms()
    }

    pub fn server_info(&self, orchestrator_id: &str) -> ServerInfo {
        ServerInfo::new(orchestrator_id, self.registry.uptime_ms())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot()
    }
}

impl Default for OrchestratorMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ServiceStatus;

    #[test]
    fn test_orchestrator_metrics_collector() {
        let collector = OrchestratorMetricsCollector::new();

        let start = Instant::now();
        collector.record_routing("node-1", false, start);
        collector.record_routing("node-2", true, start);
        collector.record_routing_failure(start);
        collector.record_scaling_event();
        collector.record_failover_event();
        collector.record_failover_event();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.routing_decisions, 2);
        assert_eq!(snapshot.routing_failures, 1);
        assert_eq!(snapshot.cross_federation_messages, 1);
        assert_eq!(snapshot.scaling_events, 1);
        assert_eq!(snapshot.failover_events, 2);
        assert_eq!(snapshot.nodes.len(), 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let collector = OrchestratorMetricsCollector::new();
        let clone = collector.clone();

        clone.record_scaling_event();
        clone.record_service_failure(ServiceKind::AutoScaling, "executor failed");

        assert_eq!(collector.snapshot().scaling_events, 1);
        assert_eq!(
            collector.service_health(ServiceKind::AutoScaling, true).status,
            ServiceStatus::Degraded
        );
    }

    #[test]
    fn test_forget_node() {
        let collector = OrchestratorMetricsCollector::new();
        collector.record_routing("node-1", false, Instant::now());
        collector.forget_node("node-1");

        let snapshot = collector.snapshot();
        assert!(snapshot.nodes.is_empty());
        assert_eq!(snapshot.routing_decisions, 1);
    }

    #[test]
    fn test_server_info() {
        let collector = OrchestratorMetricsCollector::new();
        let info = collector.server_info("global-orchestrator");
        assert_eq!(info.name, "helmsman");
        assert_eq!(info.orchestrator_id, "global-orchestrator");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
