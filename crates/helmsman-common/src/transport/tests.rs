//! Tests for the HTTP node transport against in-process axum servers.

use super::*;
use crate::protocol::{Heartbeat, NodeInfo};
use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn node_at(addr: SocketAddr) -> NodeInfo {
    NodeInfo::new("n1", "fed-a", addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn test_probe_health_success() {
    let app = Router::new().route("/health", get(|| async { Json(json!({"status": "healthy"})) }));
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let payload = transport
        .probe_health(&node_at(addr), Duration::from_secs(2))
        .await
        .unwrap();
    assert!(payload.is_healthy());
}

#[tokio::test]
async fn test_probe_health_non_200_is_error() {
    let app = Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
    );
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let err = transport
        .probe_health(&node_at(addr), Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Status(503)));
}

#[tokio::test]
async fn test_probe_health_malformed_body_is_error() {
    let app = Router::new().route("/health", get(|| async { "not json" }));
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let result = transport
        .probe_health(&node_at(addr), Duration::from_secs(2))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_probe_health_timeout() {
    let app = Router::new().route(
        "/health",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"status": "healthy"}))
        }),
    );
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let result = transport
        .probe_health(&node_at(addr), Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(TransportError::Timeout(_))));
}

#[tokio::test]
async fn test_fetch_metrics_and_registry() {
    let app = Router::new()
        .route(
            "/metrics",
            get(|| async { Json(json!({"cpuUsage": 55.0, "activeConnections": 3})) }),
        )
        .route(
            "/nodes",
            get(|| async {
                Json(json!({"nodes": [
                    {"nodeId": "a", "federationId": "fed-a", "address": "10.0.0.1", "port": 1},
                    {"nodeId": "b", "federationId": "fed-b", "address": "10.0.0.2", "port": 2}
                ]}))
            }),
        );
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let metrics = transport
        .fetch_metrics(&node_at(addr), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(metrics.cpu_usage, 55.0);
    assert_eq!(metrics.active_connections, 3);

    let nodes = transport
        .fetch_registry(&format!("http://{}/", addr), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1].federation_id, "fed-b");
}

#[tokio::test]
async fn test_send_heartbeat() {
    let app = Router::new().route("/heartbeat", post(|| async { StatusCode::NO_CONTENT }));
    let addr = spawn_server(app).await;
    let transport = HttpNodeTransport::new().unwrap();

    let hb = Heartbeat {
        orchestrator_id: "orch".to_string(),
        timestamp: 1,
        sequence: 1,
    };
    transport
        .send_heartbeat(&node_at(addr), &hb, Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_node_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpNodeTransport::new().unwrap();
    let result = transport
        .probe_health(&node_at(addr), Duration::from_secs(2))
        .await;
    assert!(result.is_err());
}
