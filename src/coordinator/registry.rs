//! Cluster registry for tracking brokers
//!
//! The registry is the authoritative, single-writer record of broker
//! membership, the leader pointer and the last heartbeat seen from each
//! broker. All three live behind one lock so every mutation (register,
//! heartbeat, sweep, snapshot restore) is observed atomically.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::metrics;
use crate::models::{BrokerNode, ClusterSyncSnapshot, HeartbeatRequest};
use crate::utils::age_millis;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of admitting a broker into the registry
#[derive(Debug, Clone)]
pub struct Registration {
    /// The admitted broker as recorded (leader flag decided by the registry)
    pub broker: BrokerNode,

    /// Full membership after admission
    pub membership: Vec<BrokerNode>,

    /// Whether an entry with the same id was replaced
    pub replaced: bool,
}

/// Result of processing a heartbeat
#[derive(Debug, Clone)]
pub enum HeartbeatOutcome {
    /// Known broker; its heartbeat record was refreshed
    Refreshed,

    /// Unknown broker; it was admitted again from the heartbeat descriptor
    Readmitted(Registration),
}

/// Result of one failure-detector sweep
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Brokers removed because their heartbeat was stale
    pub evicted: Vec<BrokerNode>,

    /// Leader elected because the previous leader was evicted
    pub new_leader: Option<BrokerNode>,

    /// Whether the previous leader was among the evicted brokers
    pub leader_evicted: bool,

    /// Membership after the sweep
    pub membership: Vec<BrokerNode>,
}

impl SweepOutcome {
    /// True when nothing was evicted
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

// ============================================================================
// Cluster Registry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    brokers: Vec<BrokerNode>,
    leader: Option<BrokerNode>,
    heartbeats: HashMap<i32, i64>,
}

impl RegistryState {
    fn admit(&mut self, broker: &BrokerNode, now: i64) -> Registration {
        let position = self.brokers.iter().position(|b| b.id == broker.id);
        let is_current_leader = self.leader.as_ref().is_some_and(|l| l.id == broker.id);

        let recorded = if is_current_leader || self.leader.is_none() {
            broker.as_leader()
        } else {
            broker.as_follower()
        };

        if recorded.is_leader {
            self.leader = Some(recorded.clone());
        }

        let replaced = match position {
            Some(index) => {
                self.brokers[index] = recorded.clone();
                true
            }
            None => {
                self.brokers.push(recorded.clone());
                false
            }
        };

        self.heartbeats.insert(recorded.id, now);
        metrics::set_registered_brokers(self.brokers.len());

        Registration {
            broker: recorded,
            membership: self.brokers.clone(),
            replaced,
        }
    }
}

/// Registry of live brokers and the current leader
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    state: RwLock<RegistryState>,
}

impl ClusterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a broker
    ///
    /// The broker becomes leader when there is no current leader (in
    /// particular when the registry is empty) and follower otherwise.
    /// Re-registering a known id replaces its entry instead of duplicating
    /// it. Admission also records a heartbeat at `now`.
    pub async fn register(&self, broker: BrokerNode, now: i64) -> Registration {
        let mut state = self.state.write().await;
        let registration = state.admit(&broker, now);

        tracing::info!(
            broker_id = registration.broker.id,
            url = %registration.broker.connection_url,
            leader = registration.broker.is_leader,
            members = registration.membership.len(),
            "Broker registered"
        );

        registration
    }

    /// Process a heartbeat received at `now`
    ///
    /// The sender's own timestamp is not trusted for liveness; the receive
    /// time is recorded instead.
    pub async fn heartbeat(&self, request: &HeartbeatRequest, now: i64) -> HeartbeatOutcome {
        metrics::record_heartbeat();
        let mut state = self.state.write().await;

        if state.brokers.iter().any(|b| b.id == request.broker_id()) {
            state.heartbeats.insert(request.broker_id(), now);
            return HeartbeatOutcome::Refreshed;
        }

        let registration = state.admit(&request.broker, now);
        tracing::info!(
            broker_id = registration.broker.id,
            leader = registration.broker.is_leader,
            "Re-admitted broker from heartbeat"
        );
        HeartbeatOutcome::Readmitted(registration)
    }

    /// Current membership
    pub async fn brokers(&self) -> Vec<BrokerNode> {
        self.state.read().await.brokers.clone()
    }

    /// Current leader, if any
    pub async fn leader(&self) -> Option<BrokerNode> {
        self.state.read().await.leader.clone()
    }

    /// Number of registered brokers
    pub async fn len(&self) -> usize {
        self.state.read().await.brokers.len()
    }

    /// Whether no broker is registered
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.brokers.is_empty()
    }

    /// Last heartbeat time recorded for a broker
    pub async fn last_seen(&self, broker_id: i32) -> Option<i64> {
        self.state.read().await.heartbeats.get(&broker_id).copied()
    }

    /// Evict every broker whose heartbeat is older than `timeout_ms`
    ///
    /// When the leader is evicted, the surviving broker with the highest id
    /// is elected. Brokers present without a heartbeat record get one seeded
    /// at `now` so they are judged from this point on.
    pub async fn sweep(&self, now: i64, timeout_ms: i64) -> SweepOutcome {
        let mut state = self.state.write().await;
        let RegistryState {
            brokers,
            leader,
            heartbeats,
        } = &mut *state;

        for broker in brokers.iter() {
            heartbeats.entry(broker.id).or_insert(now);
        }

        let mut stale: Vec<i32> = heartbeats
            .iter()
            .filter(|(_, last)| age_millis(now, **last) > timeout_ms)
            .map(|(id, _)| *id)
            .collect();
        stale.sort_unstable();

        let mut outcome = SweepOutcome::default();

        for id in stale {
            heartbeats.remove(&id);
            if let Some(index) = brokers.iter().position(|b| b.id == id) {
                let evicted = brokers.remove(index);
                tracing::warn!(
                    broker_id = id,
                    url = %evicted.connection_url,
                    "Evicting broker with stale heartbeat"
                );
                outcome.evicted.push(evicted);
            }
        }

        let leader_id = leader.as_ref().map(|l| l.id);
        if let Some(leader_id) = leader_id {
            if outcome.evicted.iter().any(|b| b.id == leader_id) {
                outcome.leader_evicted = true;
                *leader = elect(brokers);
                outcome.new_leader = leader.clone();

                match &outcome.new_leader {
                    Some(new_leader) => {
                        tracing::info!(broker_id = new_leader.id, "Elected new leader")
                    }
                    None => tracing::warn!("Leader evicted and no brokers remain"),
                }
            }
        }

        outcome.membership = brokers.clone();
        metrics::set_registered_brokers(brokers.len());
        if !outcome.is_empty() {
            metrics::record_sweep(outcome.evicted.len(), outcome.new_leader.is_some());
        }

        outcome
    }

    /// Snapshot the registry for a standby coordinator
    pub async fn snapshot(&self, epoch: u64) -> ClusterSyncSnapshot {
        let state = self.state.read().await;
        ClusterSyncSnapshot {
            brokers: state.brokers.clone(),
            leader_broker: state.leader.clone(),
            heartbeat_map: state.heartbeats.clone(),
            epoch,
        }
    }

    /// Replace the entire registry with a snapshot
    pub async fn restore(&self, snapshot: ClusterSyncSnapshot) {
        let mut state = self.state.write().await;
        state.brokers = snapshot.brokers;
        state.leader = snapshot.leader_broker;
        state.heartbeats = snapshot.heartbeat_map;
        metrics::set_registered_brokers(state.brokers.len());
    }

    /// Reset every heartbeat record to `now`
    pub async fn refresh_heartbeats(&self, now: i64) {
        let mut state = self.state.write().await;
        let ids: Vec<i32> = state.brokers.iter().map(|b| b.id).collect();
        state.heartbeats.clear();
        for id in ids {
            state.heartbeats.insert(id, now);
        }
    }
}

/// Mark the broker with the highest id as leader and every other as follower
///
/// Deterministic from the list alone. Returns the elected broker, or `None`
/// for an empty list.
pub fn elect(brokers: &mut [BrokerNode]) -> Option<BrokerNode> {
    let leader_id = brokers.iter().map(|b| b.id).max()?;

    for broker in brokers.iter_mut() {
        broker.is_leader = broker.id == leader_id;
    }

    brokers.iter().find(|b| b.id == leader_id).cloned()
}

// ============================================================================
// Tests
// ============================================================================
