//! Administrative HTTP Router
//!
//! This module maps the management operations of [`GlobalOrchestrator`]
//! onto an axum [`Router`].
//!
//! # Routes
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | GET | `/health` | service health; `503` unless operational |
//! | GET | `/topology` | current global topology |
//! | GET | `/metrics` | global metrics |
//! | GET | `/services` | per-service health |
//! | GET, PATCH | `/config` | read or patch the configuration |
//! | GET | `/config/summary` | short description of the configuration |
//! | POST | `/route` | route one message |
//! | POST | `/nodes` | register a node |
//! | DELETE | `/nodes/:id` | unregister a node |
//! | POST | `/nodes/:id/failure` | fail a node and fail over its groups |
//! | POST | `/nodes/:id/recover` | recover a node |
//! | POST | `/nodes/:id/outcome` | report a delivery outcome |
//! | POST | `/scaling` | manual scaling |
//! | POST | `/failover` | manual failover |
//! | POST | `/failover-groups` | create a failover group |
//! | POST | `/federations` | register a federation manager |
//! | DELETE | `/federations/:id` | unregister a federation manager |
//!
//! # Errors
//!
//! Every failure renders as `{code, message, cause}`. The HTTP status is
//! derived from the error code.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use helmsman_common::{ErrorCode, NodeInfo, OrchestratorError, OrchestratorMessage, RoutingDecision};
use helmsman_metrics::{GlobalMetrics, ServiceHealthReport};
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConfigSummary, FederationAuth, OrchestratorConfig, OrchestratorConfigPatch};
use crate::failover::{FailoverEvent, FailoverGroup, FailoverStrategy};
use crate::manager::GlobalOrchestrator;
use crate::scaling::{ScalingAction, ScalingDecision};
use crate::topology::GlobalTopology;

/// Error body returned by every route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub cause: Option<String>,
}

/// A failed request.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                cause: None,
            },
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status of each error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ConfigurationError => StatusCode::BAD_REQUEST,
        ErrorCode::FederationIntegrationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::RoutingFailed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::ScalingFailed | ErrorCode::FailoverFailed => StatusCode::CONFLICT,
        ErrorCode::DiscoveryFailed | ErrorCode::HealthCheckFailed => StatusCode::BAD_GATEWAY,
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let code = err.code();
        Self {
            status: status_for(code),
            body: ErrorBody {
                code: code.as_str().to_string(),
                message: err.message(),
                cause: err.source().map(|cause| cause.to_string()),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "INVALID_REQUEST", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!("Admin request failed with {}: {}", self.body.code, self.body.message);
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;
type Orchestrator = State<Arc<GlobalOrchestrator>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRequest {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResponse {
    pub node_id: String,
    /// Share of recent deliveries that succeeded
    pub success_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRequest {
    pub action: ScalingAction,
    #[serde(default)]
    pub target_nodes: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingResponse {
    /// False when the target was cooling down
    pub executed: bool,
    pub decision: Option<ScalingDecision>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverRequest {
    pub group_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverGroupRequest {
    pub primary_node_id: String,
    #[serde(default)]
    pub backup_node_ids: Vec<String>,
    #[serde(default)]
    pub failover_strategy: FailoverStrategy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationRequest {
    pub federation_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: Option<FederationAuth>,
}

/// Builds the administrative router over `orchestrator`.
pub fn admin_router(orchestrator: Arc<GlobalOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/topology", get(topology))
        .route("/metrics", get(metrics))
        .route("/services", get(services))
        .route("/config", get(get_config).patch(patch_config))
        .route("/config/summary", get(config_summary))
        .route("/route", post(route))
        .route("/nodes", post(register_node))
        .route("/nodes/:id", axum::routing::delete(unregister_node))
        .route("/nodes/:id/failure", post(fail_node))
        .route("/nodes/:id/recover", post(recover_node))
        .route("/nodes/:id/outcome", post(record_outcome))
        .route("/scaling", post(manual_scaling))
        .route("/failover", post(manual_failover))
        .route("/failover-groups", post(create_failover_group))
        .route("/federations", post(register_federation))
        .route("/federations/:id", axum::routing::delete(unregister_federation))
        .with_state(orchestrator)
}

async fn health(State(orchestrator): Orchestrator) -> (StatusCode, Json<ServiceHealthReport>) {
    let report = orchestrator.get_service_health().await;
    let status = if report.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn topology(State(orchestrator): Orchestrator) -> Json<GlobalTopology> {
    Json(orchestrator.get_global_topology().await)
}

async fn metrics(State(orchestrator): Orchestrator) -> Json<GlobalMetrics> {
    Json(orchestrator.get_global_metrics().await)
}

async fn services(State(orchestrator): Orchestrator) -> Json<ServiceHealthReport> {
    Json(orchestrator.get_service_health().await)
}

async fn get_config(State(orchestrator): Orchestrator) -> Json<OrchestratorConfig> {
    Json(orchestrator.get_configuration().as_ref().clone())
}

async fn config_summary(State(orchestrator): Orchestrator) -> Json<ConfigSummary> {
    Json(orchestrator.get_configuration_summary())
}

async fn patch_config(
    State(orchestrator): Orchestrator,
    payload: Result<Json<OrchestratorConfigPatch>, JsonRejection>,
) -> ApiResult<Json<OrchestratorConfig>> {
    let Json(patch) = payload?;
    let config = orchestrator.update_configuration(&patch).await?;
    Ok(Json(config.as_ref().clone()))
}

async fn route(
    State(orchestrator): Orchestrator,
    payload: Result<Json<OrchestratorMessage>, JsonRejection>,
) -> ApiResult<Json<RoutingDecision>> {
    let Json(message) = payload?;
    Ok(Json(orchestrator.route_message(&message).await?))
}

async fn register_node(
    State(orchestrator): Orchestrator,
    payload: Result<Json<NodeInfo>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<NodeInfo>)> {
    let Json(node) = payload?;
    let node = orchestrator.register_node(node).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn unregister_node(
    State(orchestrator): Orchestrator,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeInfo>> {
    orchestrator
        .unregister_node(&node_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("unknown node {}", node_id)))
}

async fn fail_node(
    State(orchestrator): Orchestrator,
    Path(node_id): Path<String>,
    payload: Option<Json<FailureRequest>>,
) -> ApiResult<Json<Vec<FailoverEvent>>> {
    let reason = payload
        .and_then(|Json(request)| request.reason)
        .unwrap_or_else(|| "reported by operator".to_string());
    Ok(Json(orchestrator.handle_node_failure(&node_id, &reason).await?))
}

async fn recover_node(
    State(orchestrator): Orchestrator,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Vec<FailoverEvent>>> {
    Ok(Json(orchestrator.recover_node(&node_id).await?))
}

async fn record_outcome(
    State(orchestrator): Orchestrator,
    Path(node_id): Path<String>,
    payload: Result<Json<OutcomeRequest>, JsonRejection>,
) -> ApiResult<Json<OutcomeResponse>> {
    let Json(request) = payload?;
    let success_rate = orchestrator
        .record_delivery(&node_id, request.success)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown node {}", node_id)))?;
    Ok(Json(OutcomeResponse {
        node_id,
        success_rate,
    }))
}

async fn manual_scaling(
    State(orchestrator): Orchestrator,
    payload: Result<Json<ScalingRequest>, JsonRejection>,
) -> ApiResult<Json<ScalingResponse>> {
    let Json(request) = payload?;
    let decision = orchestrator
        .manual_scaling(request.action, request.target_nodes, &request.reason)
        .await?;
    Ok(Json(ScalingResponse {
        executed: decision.is_some(),
        decision,
    }))
}

async fn manual_failover(
    State(orchestrator): Orchestrator,
    payload: Result<Json<FailoverRequest>, JsonRejection>,
) -> ApiResult<Json<FailoverEvent>> {
    let Json(request) = payload?;
    let event = orchestrator
        .manual_failover(&request.group_id, &request.target_node_id, &request.reason)
        .await?;
    Ok(Json(event))
}

async fn create_failover_group(
    State(orchestrator): Orchestrator,
    payload: Result<Json<FailoverGroupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FailoverGroup>)> {
    let Json(request) = payload?;
    let group = orchestrator
        .create_failover_group(
            &request.primary_node_id,
            request.backup_node_ids,
            request.failover_strategy,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn register_federation(
    State(orchestrator): Orchestrator,
    payload: Result<Json<FederationRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    orchestrator
        .register_federation_manager(&request.federation_id, &request.endpoint, request.auth)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn unregister_federation(
    State(orchestrator): Orchestrator,
    Path(federation_id): Path<String>,
) -> ApiResult<StatusCode> {
    orchestrator
        .unregister_federation_manager(&federation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn started() -> Arc<GlobalOrchestrator> {
        let orchestrator = GlobalOrchestrator::builder()
            .transport(Arc::new(FakeTransport::default()))
            .build()
            .unwrap();
        orchestrator.start().await.unwrap();
        orchestrator
    }

    async fn call(
        orchestrator: &Arc<GlobalOrchestrator>,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = admin_router(orchestrator.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_error_body_carries_cause() {
        let err = OrchestratorError::RoutingFailed("no healthy node".into())
            .wrap(ErrorCode::RoutingFailed, "routing failed");
        let api: ApiError = err.into();

        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.body.code, "ROUTING_FAILED");
        assert_eq!(api.body.message, "routing failed");
        assert_eq!(api.body.cause.as_deref(), Some("Routing failed: no healthy node"));
    }

    #[tokio::test]
    async fn test_health_reflects_running_state() {
        let orchestrator = started().await;
        let (status, body) = call(&orchestrator, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let report: ServiceHealthReport = parse(&body);
        assert!(report.running);

        orchestrator.stop().await;
        let (status, _) = call(&orchestrator, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_register_route_and_unregister() {
        let orchestrator = started().await;
        let node = json!({
            "nodeId": "n1",
            "federationId": "eu",
            "address": "10.0.0.1",
            "port": 8080
        });
        let (status, _) = call(&orchestrator, Method::POST, "/nodes", Some(node)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/route",
            Some(json!({"messageType": "task", "payload": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let decision: RoutingDecision = parse(&body);
        assert_eq!(decision.target_node_id, "n1");

        let (status, body) = call(&orchestrator, Method::GET, "/topology", None).await;
        assert_eq!(status, StatusCode::OK);
        let topology: GlobalTopology = parse(&body);
        assert_eq!(topology.total_nodes(), 1);

        let (status, _) = call(&orchestrator, Method::DELETE, "/nodes/n1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&orchestrator, Method::DELETE, "/nodes/n1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parse::<ErrorBody>(&body).code, "NOT_FOUND");

        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/route",
            Some(json!({"messageType": "task", "payload": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error: ErrorBody = parse(&body);
        assert_eq!(error.code, "ROUTING_FAILED");
        assert!(error.cause.is_some());

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_patch_config_validates() {
        let orchestrator = started().await;

        let (status, body) = call(
            &orchestrator,
            Method::PATCH,
            "/config",
            Some(json!({"scaling": {"scaleUpThreshold": 90.0}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let config: OrchestratorConfig = parse(&body);
        assert_eq!(config.scaling.scale_up_threshold, 90.0);

        let (status, body) = call(
            &orchestrator,
            Method::PATCH,
            "/config",
            Some(json!({"scaling": {"minNodes": 100, "maxNodes": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(parse::<ErrorBody>(&body).code, "CONFIGURATION_ERROR");

        let (_, body) = call(&orchestrator, Method::GET, "/config", None).await;
        let config: OrchestratorConfig = parse(&body);
        assert_eq!(config.scaling.scale_up_threshold, 90.0);
        assert_eq!(config.scaling.max_nodes, 50);

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let orchestrator = started().await;
        let (status, body) = call(
            &orchestrator,
            Method::PATCH,
            "/config",
            Some(json!({"unknownSection": true})),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(parse::<ErrorBody>(&body).code, "INVALID_REQUEST");
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_failover_group_and_node_failure() {
        let orchestrator = started().await;
        for id in ["p", "b"] {
            let node = json!({"nodeId": id, "federationId": "eu", "address": "10.0.0.1", "port": 80});
            call(&orchestrator, Method::POST, "/nodes", Some(node)).await;
        }

        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/failover-groups",
            Some(json!({"primaryNodeId": "p", "backupNodeIds": ["b"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let group: FailoverGroup = parse(&body);
        assert_eq!(group.primary_node_id, "p");

        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/nodes/p/failure",
            Some(json!({"reason": "disk full"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let events: Vec<FailoverEvent> = parse(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].backup_node_id, "b");
        assert_eq!(events[0].reason, "disk full");

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_manual_scaling_without_targets_conflicts() {
        let orchestrator = started().await;
        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/scaling",
            Some(json!({"action": "SCALE_UP", "targetNodes": []})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(parse::<ErrorBody>(&body).code, "SCALING_FAILED");

        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/scaling",
            Some(json!({"action": "SCALE_UP", "targetNodes": ["n1"], "reason": "load test"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: ScalingResponse = parse(&body);
        assert!(response.executed);

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_config_summary() {
        let orchestrator = started().await;
        let (status, body) = call(&orchestrator, Method::GET, "/config/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        let summary: ConfigSummary = parse(&body);
        assert_eq!(summary, orchestrator.get_configuration_summary());
        assert!(summary.config_path.is_none());
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_delivery_outcomes() {
        let orchestrator = started().await;
        let (status, body) = call(
            &orchestrator,
            Method::POST,
            "/nodes/n1/outcome",
            Some(json!({"success": false})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(parse::<ErrorBody>(&body).code, "NOT_FOUND");

        let node = json!({
            "nodeId": "n1",
            "federationId": "eu",
            "address": "10.0.0.1",
            "port": 8080
        });
        let (status, _) = call(&orchestrator, Method::POST, "/nodes", Some(node)).await;
        assert_eq!(status, StatusCode::CREATED);

        for success in [true, false, true, true] {
            let (status, body) = call(
                &orchestrator,
                Method::POST,
                "/nodes/n1/outcome",
                Some(json!({ "success": success })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            let response: OutcomeResponse = parse(&body);
            assert_eq!(response.node_id, "n1");
        }
        let (_, body) = call(
            &orchestrator,
            Method::POST,
            "/nodes/n1/outcome",
            Some(json!({"success": true})),
        )
        .await;
        assert_eq!(parse::<OutcomeResponse>(&body).success_rate, 0.8);

        let (status, body) =
            call(&orchestrator, Method::POST, "/nodes/n1/outcome", Some(json!({}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(parse::<ErrorBody>(&body).code, "INVALID_REQUEST");

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_federation_manager_lifecycle() {
        let orchestrator = started().await;
        let (status, _) = call(
            &orchestrator,
            Method::POST,
            "/federations",
            Some(json!({"federationId": "asia", "endpoint": "http://asia.example:9000"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = call(&orchestrator, Method::DELETE, "/federations/asia", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&orchestrator, Method::DELETE, "/federations/asia", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let error: ErrorBody = parse(&body);
        assert_eq!(error.code, "FEDERATION_INTEGRATION_ERROR");
        assert_eq!(error.message, "unregistering federation manager asia failed");
        assert!(error.cause.unwrap().contains("unknown federation manager asia"));

        orchestrator.stop().await;
    }
}
