use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable error codes surfaced to callers of the orchestrator.
///
/// The serialized form (`ROUTING_FAILED`, ...) is part of the public
/// management API and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DiscoveryFailed,
    HealthCheckFailed,
    RoutingFailed,
    ScalingFailed,
    FailoverFailed,
    ConfigurationError,
    FederationIntegrationError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            ErrorCode::RoutingFailed => "ROUTING_FAILED",
            ErrorCode::ScalingFailed => "SCALING_FAILED",
            ErrorCode::FailoverFailed => "FAILOVER_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::FederationIntegrationError => "FEDERATION_INTEGRATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type of the orchestrator.
///
/// Every service fails with one of the coded variants. The facade wraps
/// service failures in [`OrchestratorError::Wrapped`], which keeps the
/// originating error reachable through `source()` and [`OrchestratorError::cause_code`].
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Routing failed: {0}")]
    RoutingFailed(String),

    #[error("Scaling failed: {0}")]
    ScalingFailed(String),

    #[error("Failover failed: {0}")]
    FailoverFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Federation integration error: {0}")]
    FederationIntegration(String),

    #[error("{context}: {source}")]
    Wrapped {
        code: ErrorCode,
        context: String,
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    /// Returns the code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::DiscoveryFailed(_) => ErrorCode::DiscoveryFailed,
            OrchestratorError::HealthCheckFailed(_) => ErrorCode::HealthCheckFailed,
            OrchestratorError::RoutingFailed(_) => ErrorCode::RoutingFailed,
            OrchestratorError::ScalingFailed(_) => ErrorCode::ScalingFailed,
            OrchestratorError::FailoverFailed(_) => ErrorCode::FailoverFailed,
            OrchestratorError::Configuration(_) => ErrorCode::ConfigurationError,
            OrchestratorError::FederationIntegration(_) => ErrorCode::FederationIntegrationError,
            OrchestratorError::Wrapped { code, .. } => *code,
        }
    }

    /// Returns the code of the innermost error, if this error wraps another.
    pub fn cause_code(&self) -> Option<ErrorCode> {
        match self {
            OrchestratorError::Wrapped { source, .. } => {
                Some(source.cause_code().unwrap_or_else(|| source.code()))
            }
            _ => None,
        }
    }

    /// Wraps this error under a new code, preserving it as the cause.
    pub fn wrap(self, code: ErrorCode, context: impl Into<String>) -> Self {
        OrchestratorError::Wrapped {
            code,
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Message without the code prefix of the outer layer.
    pub fn message(&self) -> String {
        match self {
            OrchestratorError::DiscoveryFailed(m)
            | OrchestratorError::HealthCheckFailed(m)
            | OrchestratorError::RoutingFailed(m)
            | OrchestratorError::ScalingFailed(m)
            | OrchestratorError::FailoverFailed(m)
            | OrchestratorError::Configuration(m)
            | OrchestratorError::FederationIntegration(m) => m.clone(),
            OrchestratorError::Wrapped { context, .. } => context.clone(),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OrchestratorError::RoutingFailed("x".into()).code(),
            ErrorCode::RoutingFailed
        );
        assert_eq!(
            OrchestratorError::Configuration("x".into()).code(),
            ErrorCode::ConfigurationError
        );
        assert_eq!(
            OrchestratorError::FederationIntegration("x".into()).code(),
            ErrorCode::FederationIntegrationError
        );
    }

    #[test]
    fn test_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::FailoverFailed).unwrap();
        assert_eq!(json, "\"FAILOVER_FAILED\"");
        assert_eq!(ErrorCode::FailoverFailed.to_string(), "FAILOVER_FAILED");
    }

    #[test]
    fn test_wrap_preserves_cause() {
        let inner = OrchestratorError::FailoverFailed("no healthy backup".into());
        let outer = inner.wrap(ErrorCode::ConfigurationError, "failed to start orchestrator");

        assert_eq!(outer.code(), ErrorCode::ConfigurationError);
        assert_eq!(outer.cause_code(), Some(ErrorCode::FailoverFailed));
        assert!(outer.source().is_some());
        assert_eq!(
            outer.to_string(),
            "failed to start orchestrator: Failover failed: no healthy backup"
        );
    }

    #[test]
    fn test_cause_code_of_nested_wrap_is_innermost() {
        let err = OrchestratorError::RoutingFailed("empty".into())
            .wrap(ErrorCode::RoutingFailed, "route")
            .wrap(ErrorCode::ConfigurationError, "outer");
        assert_eq!(err.cause_code(), Some(ErrorCode::RoutingFailed));
    }

    #[test]
    fn test_unwrapped_error_has_no_cause() {
        let err = OrchestratorError::ScalingFailed("boom".into());
        assert_eq!(err.cause_code(), None);
        assert_eq!(err.message(), "boom");
    }
}
