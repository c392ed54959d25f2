//! Broker-side errors

use thiserror::Error;

/// Failures of broker pub/sub operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Required field missing or empty
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Subscriber is not in the subscriber registry
    #[error("Subscriber '{0}' is not registered")]
    UnknownSubscriber(String),

    /// Client write sent to a follower
    #[error("This broker is not the leader")]
    NotLeader { leader_url: Option<String> },

    /// Replication push sent to the leader
    #[error("The leader does not accept replication")]
    NotFollower,
}

impl BrokerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
