//! sports-notify - Clustered publish/subscribe broker
//!
//! A set of brokers hold a replicated pub/sub state; one of them is the
//! leader, accepts client writes and delivers queued messages to
//! subscribers. A coordinator pair tracks membership, evicts brokers whose
//! heartbeats stop and elects a new leader.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`coordinator`] - Membership registry, failure detection, election and coordinator HA
//! - [`broker`] - Replicated pub/sub state, role state machine and delivery loop
//! - [`peer`] - Outbound HTTP between cluster members
//! - [`models`] - Core data structures and wire types
//! - [`config`] - Configuration management and settings
//! - [`error`] - Unified error type and HTTP mapping
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use sports_notify::broker::{BrokerConfig, BrokerServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BrokerConfig::builder()
//!         .coordinator_urls(["http://127.0.0.1:8080"])
//!         .build()?;
//!     let server = BrokerServer::new(config)?;
//!     server.start_with_shutdown(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod models;
pub mod peer;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broker::{BrokerConfig, BrokerServer};
    pub use crate::config::Config;
    pub use crate::coordinator::{CoordinatorConfig, CoordinatorServer};
    pub use crate::error::{ClusterErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{BrokerNode, MessageEnvelope, Publisher, Subscriber};
}

// Direct re-exports for convenience
pub use models::{BrokerNode, MessageEnvelope, Publisher, Subscriber};
