//! HTTP implementation of [`NodeTransport`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{NodeTransport, TransportError, TransportResult};
use crate::protocol::{Heartbeat, HealthPayload, LoadMetrics, NodeInfo, RegistryResponse};

const USER_AGENT: &str = concat!("helmsman-orchestrator/", env!("CARGO_PKG_VERSION"));

/// `reqwest`-backed transport.
///
/// A single client is shared by all probes so connections are pooled.
#[derive(Clone)]
pub struct HttpNodeTransport {
    client: reqwest::Client,
}

impl HttpNodeTransport {
    pub fn new() -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to build client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, timeout: Duration) -> TransportResult<T> {
        let response = with_timeout(timeout, self.client.get(url).timeout(timeout).send()).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        with_timeout(timeout, response.json::<T>()).await
    }
}

/// Bounds a request future by `timeout` and maps reqwest failures.
async fn with_timeout<T, F>(timeout: Duration, fut: F) -> TransportResult<T>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
        .map_err(map_reqwest_error)
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(0)
    } else if err.is_decode() {
        TransportError::Body(err.to_string())
    } else if let Some(status) = err.status() {
        TransportError::Status(status.as_u16())
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn fetch_registry(
        &self,
        registry_url: &str,
        timeout: Duration,
    ) -> TransportResult<Vec<NodeInfo>> {
        let url = format!("{}/nodes", registry_url.trim_end_matches('/'));
        let body: RegistryResponse = self.get_json(&url, timeout).await?;
        debug!("Registry {} returned {} nodes", url, body.nodes.len());
        Ok(body.nodes)
    }

    async fn probe_health(
        &self,
        node: &NodeInfo,
        timeout: Duration,
    ) -> TransportResult<HealthPayload> {
        let url = format!("{}/health", node.base_url());
        self.get_json(&url, timeout).await
    }

    async fn fetch_metrics(
        &self,
        node: &NodeInfo,
        timeout: Duration,
    ) -> TransportResult<LoadMetrics> {
        let url = format!("{}/metrics", node.base_url());
        self.get_json(&url, timeout).await
    }

    async fn send_heartbeat(
        &self,
        node: &NodeInfo,
        heartbeat: &Heartbeat,
        timeout: Duration,
    ) -> TransportResult<()> {
        let url = format!("{}/heartbeat", node.base_url());
        let response = with_timeout(
            timeout,
            self.client.post(&url).json(heartbeat).timeout(timeout).send(),
        )
        .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }
}
