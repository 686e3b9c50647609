pub mod error;
pub mod messages;
pub mod node;


pub use error::{ErrorCode, OrchestratorError, Result};
pub use messages::{
    Heartbeat, HealthPayload, MetricsPayload, OrchestratorMessage, RegistryResponse,
    RoutingAlgorithm, RoutingDecision,
};
pub use node::{Capability, HealthStatus, LoadMetrics, NodeInfo};
