//! The orchestrator's derived view of the fleet.

use helmsman_common::{Capability, HealthStatus, NodeInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ScalingConfig;
use crate::failover::FailoverGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationStatus {
    Active,
    /// Known federation without nodes
    Inactive,
    /// Every node is unhealthy
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationTopology {
    pub federation_id: String,
    pub nodes: Vec<NodeInfo>,
    pub leader_node_id: Option<String>,
    pub status: FederationStatus,
}

/// Scaling bounds as they apply to one federation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    pub federation_id: String,
    pub current_nodes: usize,
    pub min_nodes: usize,
    pub max_nodes: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub cooldown_period: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTopology {
    pub federations: Vec<FederationTopology>,
    pub routing_table: BTreeMap<String, Vec<String>>,
    pub scaling_policies: Vec<ScalingPolicy>,
    pub failover_groups: Vec<FailoverGroup>,
    pub last_updated: u64,
}

impl GlobalTopology {
    pub fn empty() -> Self {
        Self {
            federations: Vec::new(),
            routing_table: BTreeMap::new(),
            scaling_policies: Vec::new(),
            failover_groups: Vec::new(),
            last_updated: 0,
        }
    }

    pub fn total_nodes(&self) -> usize {
        self.federations.iter().map(|f| f.nodes.len()).sum()
    }
}

/// Everything a topology is derived from.
pub struct TopologyInputs<'a> {
    pub nodes: Vec<NodeInfo>,
    /// Federations with a registered manager, listed even without nodes
    pub known_federations: &'a [String],
    pub routing_table: BTreeMap<String, Vec<String>>,
    pub scaling: &'a ScalingConfig,
    pub failover_groups: Vec<FailoverGroup>,
    pub now: u64,
}

/// Builds the topology from the current state of the services.
pub fn build_topology(inputs: TopologyInputs<'_>) -> GlobalTopology {
    let mut by_federation: BTreeMap<String, Vec<NodeInfo>> = inputs
        .known_federations
        .iter()
        .map(|id| (id.clone(), Vec::new()))
        .collect();
    for node in inputs.nodes {
        by_federation
            .entry(node.federation_id.clone())
            .or_default()
            .push(node);
    }

    let federations: Vec<FederationTopology> = by_federation
        .into_iter()
        .map(|(federation_id, mut nodes)| {
            nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            FederationTopology {
                leader_node_id: elect_leader(&nodes),
                status: federation_status(&nodes),
                federation_id,
                nodes,
            }
        })
        .collect();

    let scaling_policies = federations
        .iter()
        .map(|f| ScalingPolicy {
            federation_id: f.federation_id.clone(),
            current_nodes: f.nodes.len(),
            min_nodes: inputs.scaling.min_nodes,
            max_nodes: inputs.scaling.max_nodes,
            scale_up_threshold: inputs.scaling.scale_up_threshold,
            scale_down_threshold: inputs.scaling.scale_down_threshold,
            cooldown_period: inputs.scaling.cooldown_period,
        })
        .collect();

    GlobalTopology {
        federations,
        routing_table: inputs.routing_table,
        scaling_policies,
        failover_groups: inputs.failover_groups,
        last_updated: inputs.now,
    }
}

/// First coordination-capable node by id that is not unhealthy.
fn elect_leader(sorted_nodes: &[NodeInfo]) -> Option<String> {
    sorted_nodes
        .iter()
        .filter(|n| n.health_status != HealthStatus::Unhealthy)
        .find(|n| n.capabilities.contains(&Capability::FederationCoordination))
        .map(|n| n.node_id.clone())
}

fn federation_status(nodes: &[NodeInfo]) -> FederationStatus {
    if nodes.is_empty() {
        FederationStatus::Inactive
    } else if nodes.iter().all(|n| n.health_status == HealthStatus::Unhealthy) {
        FederationStatus::Error
    } else {
        FederationStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, federation: &str, status: HealthStatus) -> NodeInfo {
        let mut node = NodeInfo::new(id, federation, "10.0.0.1", 80);
        node.health_status = status;
        node
    }

    #[test]
    fn test_build_topology_groups_and_elects() {
        let scaling = ScalingConfig::default();
        let known = vec!["idle".to_string()];
        let topology = build_topology(TopologyInputs {
            nodes: vec![
                node("eu-2", "eu", HealthStatus::Healthy)
                    .with_capability(Capability::FederationCoordination),
                node("eu-1", "eu", HealthStatus::Unhealthy)
                    .with_capability(Capability::FederationCoordination),
                node("us-1", "us", HealthStatus::Unhealthy),
            ],
            known_federations: &known,
            routing_table: BTreeMap::new(),
            scaling: &scaling,
            failover_groups: Vec::new(),
            now: 42,
        });

        let ids: Vec<&str> = topology
            .federations
            .iter()
            .map(|f| f.federation_id.as_str())
            .collect();
        assert_eq!(ids, vec!["eu", "idle", "us"]);

        let eu = &topology.federations[0];
        assert_eq!(eu.nodes[0].node_id, "eu-1");
        assert_eq!(eu.leader_node_id.as_deref(), Some("eu-2"));
        assert_eq!(eu.status, FederationStatus::Active);

        assert_eq!(topology.federations[1].status, FederationStatus::Inactive);
        assert_eq!(topology.federations[2].status, FederationStatus::Error);
        assert_eq!(topology.federations[2].leader_node_id, None);

        assert_eq!(topology.scaling_policies.len(), 3);
        assert_eq!(topology.scaling_policies[0].current_nodes, 2);
        assert_eq!(topology.total_nodes(), 3);
        assert_eq!(topology.last_updated, 42);
    }
}
