//! Helmsman Common Types and Transport
//!
//! This crate provides the data model and node transport shared by every
//! component of the helmsman fleet orchestrator.
//!
//! # Overview
//!
//! The orchestrator discovers worker nodes across federations, judges their
//! health, routes messages between them, scales node counts and fails traffic
//! over to backups. This crate contains the pieces all of those share:
//!
//! - **Protocol Layer**: node model, load samples, routing messages, the error type
//! - **Transport Layer**: the [`NodeTransport`] capability and its HTTP implementation
//!
//! # Components
//!
//! - [`protocol`] - Data model and [`OrchestratorError`]
//! - [`transport`] - Registry, health, metrics and heartbeat calls
//!
//! # Example
//!
//! ```
//! use helmsman_common::{NodeInfo, HealthStatus, Capability};
//!
//! let node = NodeInfo::new("node-1", "fed-eu", "10.0.0.1", 8080)
//!     .with_region("eu-west")
//!     .with_capability(Capability::FederationCoordination);
//!
//! assert_eq!(node.health_status, HealthStatus::Unknown);
//! assert_eq!(node.base_url(), "http://10.0.0.1:8080");
//! ```

pub mod protocol;
pub mod time;
pub mod transport;

pub use protocol::*;
pub use transport::{HttpNodeTransport, NodeTransport, TransportError, TransportResult};
