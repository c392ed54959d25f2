//! Broker role state machine and local membership view
//!
//! A broker is either [`BrokerRole::Follower`] or [`BrokerRole::Leader`].
//! Every coordinator push goes through this module and reports the
//! resulting [`RoleTransition`], so leader-only behavior is started and
//! stopped from one place.

use tokio::sync::RwLock;

use crate::metrics;
use crate::models::BrokerNode;

/// Role of this broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerRole {
    #[default]
    Follower,
    Leader,
}

impl BrokerRole {
    pub fn is_leader(self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl std::fmt::Display for BrokerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Role change caused by one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleTransition {
    Unchanged,
    Promoted,
    Demoted,
}

#[derive(Debug, Default)]
struct MembershipState {
    role: BrokerRole,
    leader: Option<BrokerNode>,
    brokers: Vec<BrokerNode>,
}

impl MembershipState {
    fn set_role(&mut self, role: BrokerRole) -> RoleTransition {
        let transition = match (self.role, role) {
            (BrokerRole::Follower, BrokerRole::Leader) => RoleTransition::Promoted,
            (BrokerRole::Leader, BrokerRole::Follower) => RoleTransition::Demoted,
            _ => RoleTransition::Unchanged,
        };
        self.role = role;
        if transition != RoleTransition::Unchanged {
            metrics::set_broker_leader(role.is_leader());
        }
        transition
    }

    fn replace_brokers(&mut self, brokers: Vec<BrokerNode>) {
        if let Some(leader) = brokers.iter().find(|b| b.is_leader) {
            self.leader = Some(leader.clone());
        }
        self.brokers = brokers;
    }
}

/// This broker's descriptor, role and copy of the cluster membership
#[derive(Debug)]
pub struct Membership {
    self_node: BrokerNode,
    state: RwLock<MembershipState>,
}

impl Membership {
    /// Start as a follower that knows only itself
    pub fn new(self_node: BrokerNode) -> Self {
        let self_node = self_node.as_follower();
        Self {
            state: RwLock::new(MembershipState {
                brokers: vec![self_node.clone()],
                ..Default::default()
            }),
            self_node,
        }
    }

    pub fn id(&self) -> i32 {
        self.self_node.id
    }

    pub fn connection_url(&self) -> &str {
        &self.self_node.connection_url
    }

    pub async fn role(&self) -> BrokerRole {
        self.state.read().await.role
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role.is_leader()
    }

    /// This broker's descriptor with its current leader flag
    pub async fn descriptor(&self) -> BrokerNode {
        let role = self.role().await;
        BrokerNode {
            is_leader: role.is_leader(),
            ..self.self_node.clone()
        }
    }

    /// Local copy of the membership list
    pub async fn brokers(&self) -> Vec<BrokerNode> {
        self.state.read().await.brokers.clone()
    }

    /// Leader as last announced
    pub async fn leader(&self) -> Option<BrokerNode> {
        self.state.read().await.leader.clone()
    }

    pub async fn leader_url(&self) -> Option<String> {
        self.leader().await.map(|l| l.connection_url)
    }

    /// Brokers that receive replication: known followers other than self
    pub async fn followers(&self) -> Vec<BrokerNode> {
        let own_id = self.id();
        self.state
            .read()
            .await
            .brokers
            .iter()
            .filter(|b| !b.is_leader && b.id != own_id)
            .cloned()
            .collect()
    }

    /// Adopt the membership returned by registration
    pub async fn apply_registration(&self, membership: Vec<BrokerNode>) -> RoleTransition {
        self.apply_update_brokers(membership).await
    }

    /// Handle an update-leader push
    ///
    /// Naming this broker promotes it; naming any other broker demotes it.
    pub async fn apply_update_leader(&self, leader: &BrokerNode) -> RoleTransition {
        let mut state = self.state.write().await;

        for broker in state.brokers.iter_mut() {
            broker.is_leader = broker.id == leader.id;
        }
        state.leader = Some(leader.as_leader());

        let role = if leader.id == self.id() {
            BrokerRole::Leader
        } else {
            BrokerRole::Follower
        };

        let transition = state.set_role(role);
        log_transition(self.id(), transition, leader.id);
        transition
    }

    /// Handle an update-brokers push
    ///
    /// The list replaces the local one wholesale. When it contains this
    /// broker, the local role follows the entry's leader flag.
    pub async fn apply_update_brokers(&self, brokers: Vec<BrokerNode>) -> RoleTransition {
        let mut state = self.state.write().await;

        let own_entry = brokers.iter().find(|b| b.id == self.id()).cloned();
        state.replace_brokers(brokers);

        let Some(own_entry) = own_entry else {
            return RoleTransition::Unchanged;
        };

        let role = if own_entry.is_leader {
            BrokerRole::Leader
        } else {
            BrokerRole::Follower
        };

        let transition = state.set_role(role);
        let leader_id = state.leader.as_ref().map(|l| l.id).unwrap_or_default();
        log_transition(self.id(), transition, leader_id);
        transition
    }
}

fn log_transition(own_id: i32, transition: RoleTransition, leader_id: i32) {
    match transition {
        RoleTransition::Promoted => {
            tracing::info!(broker_id = own_id, "Promoted to leader")
        }
        RoleTransition::Demoted => {
            tracing::warn!(broker_id = own_id, leader_id = leader_id, "Demoted to follower")
        }
        RoleTransition::Unchanged => {}
    }
}
