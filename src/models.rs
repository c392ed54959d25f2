// Core data structures shared by the coordinator and the brokers

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Cluster member descriptor
///
/// Identity is `id` alone; two descriptors with the same id describe the same
/// broker even if the other fields disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerNode {
    pub id: i32,
    pub connection_url: String,
    pub port: u16,
    #[serde(default, alias = "leader")]
    pub is_leader: bool,
}

impl BrokerNode {
    /// Create a follower descriptor
    pub fn new(id: i32, connection_url: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            connection_url: connection_url.into(),
            port,
            is_leader: false,
        }
    }

    /// Copy of this descriptor with the leader flag set
    pub fn as_leader(&self) -> Self {
        Self {
            is_leader: true,
            ..self.clone()
        }
    }

    /// Copy of this descriptor with the leader flag cleared
    pub fn as_follower(&self) -> Self {
        Self {
            is_leader: false,
            ..self.clone()
        }
    }

    /// Build an endpoint URL on this broker
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.connection_url, path)
    }
}

/// Subscriber descriptor, keyed by `connection_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub connection_url: String,
}

impl Subscriber {
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            id: None,
            topic: None,
            connection_url: connection_url.into(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    /// Inbound delivery endpoint of this subscriber
    pub fn receive_endpoint(&self) -> String {
        join_url(&self.connection_url, "/subscriber/receive")
    }
}

/// Publisher descriptor (write-only registry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Publisher {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub connection_url: String,
}

impl Publisher {
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            id: None,
            connection_url: connection_url.into(),
        }
    }
}

/// A single published message unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub topic: String,
    #[serde(default, alias = "message")]
    pub payload: String,
    #[serde(default, alias = "pid")]
    pub producer_id: Option<String>,
    #[serde(default, alias = "mid")]
    pub message_id: Option<i32>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl MessageEnvelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, message_id: i32) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_producer(mut self, producer_id: impl Into<String>) -> Self {
        self.producer_id = Some(producer_id.into());
        self
    }
}

/// Topic set as replicated between brokers
pub type TopicSet = BTreeSet<String>;

/// Topic to ordered subscriber list
pub type TopicSubscriptionIndex = HashMap<String, Vec<Subscriber>>;

/// FIFO outbound queue
pub type MessageQueue = VecDeque<MessageEnvelope>;

/// Broker liveness signal sent to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(alias = "brokers")]
    pub broker: BrokerNode,
    #[serde(alias = "heartBeatTimestamp")]
    pub timestamp: i64,
}

impl HeartbeatRequest {
    pub fn new(broker: BrokerNode, timestamp: i64) -> Self {
        Self { broker, timestamp }
    }

    pub fn broker_id(&self) -> i32 {
        self.broker.id
    }
}

/// Primary to secondary coordinator liveness signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorHeartbeat {
    #[serde(alias = "heartbeatTimestamp")]
    pub timestamp: i64,
    #[serde(rename = "coordinatorURL", alias = "coordinatorUrl")]
    pub coordinator_url: String,
    #[serde(default)]
    pub epoch: u64,
}

/// Unit of primary to secondary coordinator replication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSyncSnapshot {
    pub brokers: Vec<BrokerNode>,
    pub leader_broker: Option<BrokerNode>,
    #[serde(alias = "brokerHeartbeatMap")]
    pub heartbeat_map: HashMap<i32, i64>,
    #[serde(default)]
    pub epoch: u64,
}

/// Plain acknowledgement body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub message: String,
}

impl AckResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Join a base URL and an absolute path without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
