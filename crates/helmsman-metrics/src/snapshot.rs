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

use helmsman_common::{HealthStatus, LoadMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Background service of the orchestrator whose health is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Configuration,
    Discovery,
    HealthMonitor,
    Routing,
    AutoScaling,
    Failover,
}

impl ServiceKind {
    pub const COUNT: usize = 6;

    pub const ALL: [ServiceKind; Self::COUNT] = [
        ServiceKind::Configuration,
        ServiceKind::Discovery,
        ServiceKind::HealthMonitor,
        ServiceKind::Routing,
        ServiceKind::AutoScaling,
        ServiceKind::Failover,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Configuration => "configuration",
            ServiceKind::Discovery => "discovery",
            ServiceKind::HealthMonitor => "health_monitor",
            ServiceKind::Routing => "routing",
            ServiceKind::AutoScaling => "auto_scaling",
            ServiceKind::Failover => "failover",
        }
    }
}

/// Status of one background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Stopped,
}

impl ServiceStatus {
    /// Consecutive background failures at which a service is reported unhealthy.
    pub const UNHEALTHY_AFTER: u32 = 3;

    /// Derives a status from the running flag and the current failure streak.
    pub fn from_failures(running: bool, consecutive_failures: u32) -> Self {
        match (running, consecutive_failures) {
            (false, _) => ServiceStatus::Stopped,
            (true, 0) => ServiceStatus::Healthy,
            (true, n) if n < Self::UNHEALTHY_AFTER => ServiceStatus::Degraded,
            (true, _) => ServiceStatus::Unhealthy,
        }
    }
}

/// Health of one background service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service: ServiceKind,
    pub status: ServiceStatus,
    pub running: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<String>,
    /// Last successful background cycle, ms since epoch
    pub last_success: Option<u64>,
}

/// Health of the orchestrator and every one of its services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealthReport {
    pub orchestrator_id: String,
    pub running: bool,
    pub uptime_ms: u64,
    pub services: Vec<ServiceHealth>,
    pub timestamp: u64,
}

impl ServiceHealthReport {
    /// True if the orchestrator runs and no service is unhealthy.
    pub fn is_operational(&self) -> bool {
        self.running
            && self
                .services
                .iter()
                .all(|s| s.status != ServiceStatus::Unhealthy)
    }
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub orchestrator_id: String,
    pub uptime_ms: u64,
}

impl ServerInfo {
    pub fn new(orchestrator_id: impl Into<String>, uptime_ms: u64) -> Self {
        Self {
            name: "helmsman".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            orchestrator_id: orchestrator_id.into(),
            uptime_ms,
        }
    }
}

/// Routing latency summary in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub avg_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// How often a node was picked by routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRoutingMetrics {
    pub node_id: String,
    pub routed_count: u64,
    pub last_routed_ms: u64,
}

impl NodeRoutingMetrics {
    pub fn new(node_id: String) -> Self {
        Self {
            node_id,
            routed_count: 0,
            last_routed_ms: 0,
        }
    }
}

/// Snapshot of the orchestrator's own counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_ms: u64,
    pub routing_decisions: u64,
    pub routing_failures: u64,
    pub cross_federation_messages: u64,
    pub scaling_events: u64,
    pub failover_events: u64,
    pub routing_latency: LatencySummary,
    pub nodes: BTreeMap<String, NodeRoutingMetrics>,
}

impl MetricsSnapshot {
    /// Fraction of routing attempts that failed.
    pub fn routing_error_rate(&self) -> f64 {
        let attempts = self.routing_decisions + self.routing_failures;
        if attempts == 0 {
            0.0
        } else {
            self.routing_failures as f64 / attempts as f64
        }
    }
}

/// Fleet-wide metrics reported by `getGlobalMetrics`.
///
/// Node counts come from the health monitor, counters from
/// [`MetricsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalMetrics {
    pub orchestrator_id: String,
    pub timestamp: u64,
    pub uptime_ms: u64,
    pub total_federations: usize,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub unhealthy_nodes: usize,
    pub unknown_nodes: usize,
    pub overall_health: HealthStatus,
    pub routing_decisions: u64,
    pub routing_failures: u64,
    pub routing_error_rate: f64,
    pub cross_federation_messages: u64,
    pub scaling_events: u64,
    pub failover_events: u64,
    pub active_failovers: usize,
    pub routing_latency: LatencySummary,
    /// Mean of the latest sample of every node, if any node reported metrics
    pub average_load: Option<LoadMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_from_failures() {
        assert_eq!(ServiceStatus::from_failures(false, 0), ServiceStatus::Stopped);
        assert_eq!(ServiceStatus::from_failures(true, 0), ServiceStatus::Healthy);
        assert_eq!(ServiceStatus::from_failures(true, 1), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::from_failures(true, 2), ServiceStatus::Degraded);
        assert_eq!(ServiceStatus::from_failures(true, 3), ServiceStatus::Unhealthy);
    }

    #[test]
    fn test_report_is_operational() {
        let mut report = ServiceHealthReport {
            orchestrator_id: "o".to_string(),
            running: true,
            uptime_ms: 10,
            services: vec![ServiceHealth {
                service: ServiceKind::Discovery,
                status: ServiceStatus::Degraded,
                running: true,
                consecutive_failures: 1,
                total_failures: 1,
                last_error: Some("registry down".to_string()),
                last_success: None,
            }],
            timestamp: 0,
        };
        assert!(report.is_operational());

        report.services[0].status = ServiceStatus::Unhealthy;
        assert!(!report.is_operational());

        report.services[0].status = ServiceStatus::Healthy;
        report.running = false;
        assert!(!report.is_operational());
    }

    #[test]
    fn test_routing_error_rate() {
        let mut snapshot = MetricsSnapshot {
            uptime_ms: 0,
            routing_decisions: 0,
            routing_failures: 0,
            cross_federation_messages: 0,
            scaling_events: 0,
            failover_events: 0,
            routing_latency: LatencySummary::default(),
            nodes: BTreeMap::new(),
        };
        assert_eq!(snapshot.routing_error_rate(), 0.0);

        snapshot.routing_decisions = 3;
        snapshot.routing_failures = 1;
        assert!((snapshot.routing_error_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_service_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ServiceKind::HealthMonitor).unwrap();
        assert_eq!(json, "\"health_monitor\"");
        assert_eq!(ServiceKind::AutoScaling.as_str(), "auto_scaling");
    }
}
