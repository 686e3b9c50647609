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

use anyhow::{anyhow, Context, Result};
use helmsman_metrics::{GlobalMetrics, ServiceHealthReport};
use helmsman_orchestrator::GlobalTopology;
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Validates that a URL string starts with http:// or https://
pub fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

/// Format duration in milliseconds to human-readable string
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{}s", ms / 1000)
    } else if ms < 3_600_000 {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// Format latency in microseconds to human-readable string
pub fn format_latency_us(us: u64) -> String {
    if us == 0 {
        "-".to_string()
    } else if us < 1000 {
        format!("{}μs", us)
    } else if us < 1_000_000 {
        format!("{}ms", us / 1000)
    } else {
        format!("{:.1}s", us as f64 / 1_000_000.0)
    }
}

/// Client of a running orchestrator's administrative API.
pub struct AdminClient {
    base_url: String,
    client: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: &str) -> Result<Self> {
        validate_http_url(base_url, "orchestrator address")?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetches `path` as raw JSON.
    ///
    /// `accept_unavailable` lets a `503` through; `/health` answers with it
    /// while still carrying a report.
    async fn get_value(&self, path: &str, accept_unavailable: bool) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        let unavailable = status == reqwest::StatusCode::SERVICE_UNAVAILABLE && accept_unavailable;
        if !status.is_success() && !unavailable {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, body));
        }

        response
            .json()
            .await
            .with_context(|| format!("Malformed response from {}", url))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, accept_unavailable: bool) -> Result<T> {
        let value = self.get_value(path, accept_unavailable).await?;
        serde_json::from_value(value).with_context(|| format!("Unexpected response from {}", path))
    }

    pub async fn health(&self) -> Result<ServiceHealthReport> {
        self.get("/health", true).await
    }

    pub async fn topology(&self) -> Result<GlobalTopology> {
        self.get("/topology", false).await
    }

    pub async fn metrics(&self) -> Result<GlobalMetrics> {
        self.get("/metrics", false).await
    }

    /// Reports whether a message routed to `node_id` was delivered.
    ///
    /// # Returns
    /// The node's recent delivery success rate
    pub async fn report_outcome(&self, node_id: &str, success: bool) -> Result<f64> {
        let url = format!("{}/nodes/{}/outcome", self.base_url, node_id);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "success": success }))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Malformed response from {}", url))?;
        body["successRate"]
            .as_f64()
            .ok_or_else(|| anyhow!("Unexpected response from {}", url))
    }

    /// Raw JSON of any GET route, for `--json` output.
    pub async fn raw(&self, path: &str) -> Result<serde_json::Value> {
        self.get_value(path, true).await
    }
}

pub fn render_health(report: &ServiceHealthReport) -> String {
    let mut out = String::new();
    let state = match (report.running, report.is_operational()) {
        (false, _) => "stopped",
        (true, true) => "operational",
        (true, false) => "impaired",
    };
    let _ = writeln!(out, "Orchestrator {} ({})", report.orchestrator_id, state);
    let _ = writeln!(out, "Uptime: {}", format_duration_ms(report.uptime_ms));
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<16} {:<10} {:>8}  LAST ERROR", "SERVICE", "STATUS", "FAILURES");
    for service in &report.services {
        let status = serde_json::to_value(service.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{:<16} {:<10} {:>8}  {}",
            service.service.as_str(),
            status,
            service.consecutive_failures,
            service.last_error.as_deref().unwrap_or("-")
        );
    }
    out
}

pub fn render_topology(topology: &GlobalTopology) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} federations, {} nodes",
        topology.federations.len(),
        topology.total_nodes()
    );

    for federation in &topology.federations {
        let status = serde_json::to_value(federation.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} [{}] leader: {}",
            federation.federation_id,
            status,
            federation.leader_node_id.as_deref().unwrap_or("-")
        );
        for node in &federation.nodes {
            let cpu = node
                .load_metrics
                .as_ref()
                .map(|m| format!("{:.0}%", m.cpu_usage))
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "  {:<20} {:<22} {:<10} cpu {}",
                node.node_id,
                format!("{}:{}", node.address, node.port),
                node.health_status.as_str(),
                cpu
            );
        }
    }

    if !topology.failover_groups.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failover groups:");
        for group in &topology.failover_groups {
            let _ = writeln!(
                out,
                "  {}: {} -> [{}]",
                group.group_id,
                group.primary_node_id,
                group.backup_node_ids.join(", ")
            );
        }
    }
    out
}

pub fn render_metrics(metrics: &GlobalMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Orchestrator {} up {}",
        metrics.orchestrator_id,
        format_duration_ms(metrics.uptime_ms)
    );
    let _ = writeln!(
        out,
        "Nodes: {} total, {} healthy, {} degraded, {} unhealthy, {} unknown ({})",
        metrics.total_nodes,
        metrics.healthy_nodes,
        metrics.degraded_nodes,
        metrics.unhealthy_nodes,
        metrics.unknown_nodes,
        metrics.overall_health
    );
    let _ = writeln!(
        out,
        "Routing: {} decisions, {} failures ({:.1}% errors), {} cross-federation",
        metrics.routing_decisions,
        metrics.routing_failures,
        metrics.routing_error_rate * 100.0,
        metrics.cross_federation_messages
    );
    let _ = writeln!(
        out,
        "Latency: avg {} p50 {} p95 {} p99 {}",
        format_latency_us(metrics.routing_latency.avg_us),
        format_latency_us(metrics.routing_latency.p50_us),
        format_latency_us(metrics.routing_latency.p95_us),
        format_latency_us(metrics.routing_latency.p99_us)
    );
    let _ = writeln!(
        out,
        "Scaling events: {}  Failover events: {} ({} active)",
        metrics.scaling_events, metrics.failover_events, metrics.active_failovers
    );
    if let Some(load) = &metrics.average_load {
        let _ = writeln!(
            out,
            "Average load: cpu {:.1}% memory {:.1}% connections {}",
            load.cpu_usage, load.memory_usage, load.active_connections
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_common::{HealthStatus, NodeInfo};
    use helmsman_metrics::{ServiceHealth, ServiceKind, ServiceStatus};
    use helmsman_orchestrator::topology::{FederationStatus, FederationTopology};
    use std::collections::BTreeMap;

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("http://127.0.0.1:8080", "x").is_ok());
        assert!(validate_http_url("https://example.com", "x").is_ok());
        let err = validate_http_url("127.0.0.1:8080", "orchestrator address").unwrap_err();
        assert!(err.to_string().contains("must start with http://"));
    }

    #[test]
    fn test_client_rejects_bare_address() {
        assert!(AdminClient::new("127.0.0.1:8080").is_err());
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(999), "999ms");
        assert_eq!(format_duration_ms(5_000), "5s");
        assert_eq!(format_duration_ms(125_000), "2m 5s");
        assert_eq!(format_duration_ms(7_260_000), "2h 1m");
    }

    #[test]
    fn test_format_latency_us() {
        assert_eq!(format_latency_us(0), "-");
        assert_eq!(format_latency_us(250), "250μs");
        assert_eq!(format_latency_us(4_200), "4ms");
        assert_eq!(format_latency_us(1_500_000), "1.5s");
    }

    #[test]
    fn test_render_health() {
        let report = ServiceHealthReport {
            orchestrator_id: "global".to_string(),
            running: true,
            uptime_ms: 61_000,
            services: vec![ServiceHealth {
                service: ServiceKind::Discovery,
                status: ServiceStatus::Unhealthy,
                running: true,
                consecutive_failures: 3,
                total_failures: 4,
                last_error: Some("registry unreachable".to_string()),
                last_success: None,
            }],
            timestamp: 0,
        };

        let text = render_health(&report);
        assert!(text.starts_with("Orchestrator global (impaired)"));
        assert!(text.contains("1m 1s"));
        assert!(text.contains("discovery"));
        assert!(text.contains("unhealthy"));
        assert!(text.contains("registry unreachable"));
    }

    #[test]
    fn test_render_topology() {
        let mut node = NodeInfo::new("eu-1", "eu", "10.0.0.1", 9000);
        node.health_status = HealthStatus::Healthy;
        let topology = GlobalTopology {
            federations: vec![FederationTopology {
                federation_id: "eu".to_string(),
                nodes: vec![node],
                leader_node_id: None,
                status: FederationStatus::Active,
            }],
            routing_table: BTreeMap::new(),
            scaling_policies: Vec::new(),
            failover_groups: Vec::new(),
            last_updated: 0,
        };

        let text = render_topology(&topology);
        assert!(text.starts_with("1 federations, 1 nodes"));
        assert!(text.contains("eu [active] leader: -"));
        assert!(text.contains("10.0.0.1:9000"));
        assert!(!text.contains("Failover groups"));
    }
}
