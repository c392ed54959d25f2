pub mod serve;

// Re-export command functions for convenience
pub use serve::{broker_server, coordinator_server, BrokerParams, CoordinatorParams};
