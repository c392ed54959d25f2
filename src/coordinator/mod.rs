//! Coordinator for the broker cluster
//!
//! Tracks broker membership, detects failed brokers, elects the leader and
//! runs as a primary/secondary pair for its own availability.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Coordinator Server            │
//! │                                          │
//! │  ┌────────────────┐  ┌────────────────┐  │
//! │  │ClusterRegistry │◄─┤FailureDetector │  │
//! │  │ - membership   │  │ - 3s sweep     │  │
//! │  │ - leader       │  │ - election     │  │
//! │  │ - heartbeats   │  └───────┬────────┘  │
//! │  └───────▲────────┘          │           │
//! │          │           ┌───────▼────────┐  │
//! │  ┌───────┴────────┐  │ BrokerNotifier │  │
//! │  │  HaSupervisor  │  │ update-brokers │  │
//! │  │ - epoch        │  │ update-leader  │  │
//! │  │ - sync / watch │  └────────────────┘  │
//! │  └────────────────┘                      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sports_notify::coordinator::{CoordinatorConfig, CoordinatorServer};
//!
//! let config = CoordinatorConfig::default();
//! let server = CoordinatorServer::new(config)?;
//! server.start_with_shutdown(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod detector;
pub mod ha;
pub mod notifier;
pub mod registry;
pub mod server;

// Re-export main types
pub use client::{ClientConfig, CoordinatorClient};
pub use config::{CoordinatorConfig, CoordinatorRole};
pub use detector::FailureDetector;
pub use ha::HaSupervisor;
pub use registry::ClusterRegistry;
pub use server::CoordinatorServer;
