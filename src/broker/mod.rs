//! Pub/sub broker
//!
//! Every broker holds a replica of the pub/sub state. The leader accepts
//! client writes, replicates each changed collection to the followers and
//! runs the delivery loop; followers only take replication pushes and serve
//! reads.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │               Broker Server                │
//! │                                            │
//! │  ┌──────────────┐      ┌────────────────┐  │
//! │  │BrokerService │─────►│  Replicator    │──┼──► followers
//! │  │ - role gate  │      └────────────────┘  │
//! │  └──────┬───────┘                          │
//! │         │              ┌────────────────┐  │
//! │  ┌──────▼───────┐◄─────┤ DeliveryLoop   │──┼──► subscribers
//! │  │ PubSubState  │      │ - leader only  │  │
//! │  └──────────────┘      └───────▲────────┘  │
//! │                                │ start     │
//! │  ┌──────────────┐      ┌───────┴────────┐  │
//! │  │  Membership  │◄─────┤ BrokerRuntime  │◄─┼──► coordinator
//! │  └──────────────┘      └────────────────┘  │
//! └────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod membership;
pub mod replication;
pub mod runtime;
pub mod server;
pub mod service;
pub mod state;

// Re-export main types
pub use config::BrokerConfig;
pub use delivery::DeliveryLoop;
pub use error::BrokerError;
pub use membership::{BrokerRole, Membership, RoleTransition};
pub use runtime::BrokerRuntime;
pub use server::BrokerServer;
pub use service::BrokerService;
pub use state::PubSubState;
