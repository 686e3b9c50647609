//! Node Transport Layer
//!
//! This module defines how the orchestrator talks to worker nodes and to the
//! service registry.
//!
//! # Contract
//!
//! - `GET {registry}/nodes` returns `{nodes: NodeInfo[]}`
//! - `GET /health` returns `200 {status: "healthy"}` for a healthy node
//! - `GET /metrics` returns a `LoadMetrics` document
//! - `POST /heartbeat` with a [`Heartbeat`] body; any 2xx means alive
//!
//! Every call carries an explicit timeout. A timeout is reported as
//! [`TransportError::Timeout`] and callers treat it exactly like any other
//! failed probe.
//!
//! # Components
//!
//! - **[`NodeTransport`]**: Capability trait used by discovery and health monitoring
//! - **[`HttpNodeTransport`]**: `reqwest`-based implementation

pub mod http;

pub use http::HttpNodeTransport;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{Heartbeat, HealthPayload, LoadMetrics, NodeInfo};

/// Failure of a single network probe.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Malformed body: {0}")]
    Body(String),
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Network capability used by the orchestrator services.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Lists the nodes known to the service registry.
    async fn fetch_registry(
        &self,
        registry_url: &str,
        timeout: Duration,
    ) -> TransportResult<Vec<NodeInfo>>;

    /// Probes the node's health endpoint.
    async fn probe_health(&self, node: &NodeInfo, timeout: Duration)
        -> TransportResult<HealthPayload>;

    /// Fetches the node's current load sample.
    async fn fetch_metrics(&self, node: &NodeInfo, timeout: Duration)
        -> TransportResult<LoadMetrics>;

    /// Sends a heartbeat to the node.
    async fn send_heartbeat(
        &self,
        node: &NodeInfo,
        heartbeat: &Heartbeat,
        timeout: Duration,
    ) -> TransportResult<()>;
}

#[cfg(test)]
mod tests;
