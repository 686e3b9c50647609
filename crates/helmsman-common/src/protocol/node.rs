//! Node data model shared by every orchestrator component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Resolved health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability advertised by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Routing,
    Scaling,
    Failover,
    Monitoring,
    FederationCoordination,
    LoadBalancing,
    /// Any capability this orchestrator does not know about.
    #[serde(other)]
    Other,
}

/// Point-in-time load sample reported by a node's metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadMetrics {
    /// CPU usage in percent
    pub cpu_usage: f64,
    /// Memory usage in percent
    pub memory_usage: f64,
    pub active_connections: u64,
    /// Requests per second
    pub request_rate: f64,
    /// Fraction of failed requests
    pub error_rate: f64,
    /// Average response time in milliseconds
    pub response_time: f64,
    /// Sample time in milliseconds since the unix epoch
    pub timestamp: u64,
}

impl LoadMetrics {
    /// The dominant resource utilisation of this sample, in percent.
    pub fn utilization(&self) -> f64 {
        self.cpu_usage.max(self.memory_usage)
    }
}

/// A worker node known to the orchestrator.
///
/// `node_id` is the identity key; it is unique within its federation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub federation_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub health_status: HealthStatus,
    /// Last successful refresh (discovery, heartbeat or health probe), ms since epoch
    #[serde(default)]
    pub last_health_check: u64,
    #[serde(default)]
    pub load_metrics: Option<LoadMetrics>,
}

impl NodeInfo {
    pub fn new(
        node_id: impl Into<String>,
        federation_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            federation_id: federation_id.into(),
            address: address.into(),
            port,
            region: String::new(),
            zone: String::new(),
            capabilities: BTreeSet::new(),
            health_status: HealthStatus::Unknown,
            last_health_check: 0,
            load_metrics: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Base URL of the node's HTTP endpoints.
    ///
    /// An address that already carries a scheme is used as is.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            format!("{}:{}", self.address.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }

    /// Merges registry-owned fields from `update` into this node.
    ///
    /// Health status and load metrics belong to the health monitor and are kept.
    pub fn merge_from(&mut self, update: &NodeInfo) {
        self.federation_id = update.federation_id.clone();
        self.address = update.address.clone();
        self.port = update.port;
        self.region = update.region.clone();
        self.zone = update.zone.clone();
        self.capabilities = update.capabilities.clone();
    }
}
