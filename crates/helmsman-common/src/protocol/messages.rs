//! Messages exchanged with nodes, the registry and management callers.

use serde::{Deserialize, Serialize};

use super::node::{LoadMetrics, NodeInfo};

/// Node selection algorithm used by the routing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAlgorithm {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    LeastResponseTime,
    Geographic,
    Adaptive,
}

impl RoutingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingAlgorithm::RoundRobin => "round_robin",
            RoutingAlgorithm::LeastConnections => "least_connections",
            RoutingAlgorithm::WeightedRoundRobin => "weighted_round_robin",
            RoutingAlgorithm::LeastResponseTime => "least_response_time",
            RoutingAlgorithm::Geographic => "geographic",
            RoutingAlgorithm::Adaptive => "adaptive",
        }
    }
}

/// A message the orchestrator must place on some node.
///
/// The payload is opaque; only the routing hints are inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorMessage {
    #[serde(default = "generate_message_id")]
    pub id: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub source_node_id: Option<String>,
    /// Destination class; the first federation with candidates is used when absent
    #[serde(default)]
    pub target_federation_id: Option<String>,
    /// Preferred region for geographic routing
    #[serde(default)]
    pub region_hint: Option<String>,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OrchestratorMessage {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: generate_message_id(),
            message_type: message_type.into(),
            source_node_id: None,
            target_federation_id: None,
            region_hint: None,
            priority: 0,
            payload,
        }
    }

    pub fn to_federation(mut self, federation_id: impl Into<String>) -> Self {
        self.target_federation_id = Some(federation_id.into());
        self
    }

    pub fn with_region_hint(mut self, region: impl Into<String>) -> Self {
        self.region_hint = Some(region.into());
        self
    }
}

/// Outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub message_id: String,
    pub target_node_id: String,
    pub federation_id: String,
    pub algorithm_used: RoutingAlgorithm,
    /// Other candidates that were eligible for this message
    pub alternatives: Vec<String>,
    pub decided_at: u64,
}

/// Body of `POST /heartbeat` sent to every known node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub orchestrator_id: String,
    pub timestamp: u64,
    pub sequence: u64,
}

/// Body of a node's `GET /health` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: String,
}

impl HealthPayload {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// Body of the registry's `GET {serviceRegistryUrl}/nodes` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegistryResponse {
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

/// Metrics payload of a node's `GET /metrics` response.
pub type MetricsPayload = LoadMetrics;
