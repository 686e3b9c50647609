//! Helmsman Global Orchestrator
//!
//! Coordinates worker nodes grouped into federations: discovers them,
//! tracks their health and load, routes messages to them, scales the
//! fleet and fails workloads over to backups.
//!
//! [`GlobalOrchestrator`] is the entry point. It owns one instance of every
//! service and wires their events together; [`HttpServer`] exposes it as an
//! administrative HTTP API.

pub mod config;
pub mod discovery;
pub mod events;
pub mod failover;
pub mod health_monitor;
pub mod http_router;
pub mod http_server;
pub mod manager;
pub mod node;
pub mod routing;
pub mod scaling;
pub mod scheduler;
pub mod topology;

#[cfg(test)]
mod test_support;

pub use config::{ConfigurationManager, OrchestratorConfig, OrchestratorConfigPatch};
pub use discovery::NodeDiscoveryService;
pub use events::{EventBus, OrchestratorEvent};
pub use failover::{FailoverEvent, FailoverExecutor, FailoverGroup, FailoverService, FailoverStrategy};
pub use health_monitor::HealthMonitoringService;
pub use http_server::HttpServer;
pub use manager::{GlobalOrchestrator, GlobalOrchestratorBuilder};
pub use routing::IntelligentRoutingService;
pub use scaling::{
    AutoScalingService, ScalingAction, ScalingDecision, ScalingEvaluator, ScalingExecutor,
    ThresholdEvaluator,
};
pub use topology::{FederationStatus, GlobalTopology};
