//! Broker membership client
//!
//! Registers with the coordinator at startup, sends heartbeats for the life
//! of the process and applies the coordinator's leader and membership
//! pushes. A failed heartbeat never stops the broker: it backs off and tries
//! again. Since every heartbeat carries the full descriptor, a broker whose
//! registration never got through is admitted by its first heartbeat that
//! does.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::coordinator::client::{ClientError, CoordinatorClient};
use crate::models::{BrokerNode, HeartbeatRequest};
use crate::utils::now_millis;
use crate::utils::retry::{retry, Backoff};

use super::delivery::DeliveryLoop;
use super::membership::{Membership, RoleTransition};

/// Attempts made by the startup registration before deferring to heartbeats
const REGISTRATION_RETRIES: u32 = 3;

/// Drives this broker's relationship with the coordinator
pub struct BrokerRuntime {
    membership: Arc<Membership>,
    client: CoordinatorClient,
    delivery: Arc<DeliveryLoop>,
    heartbeat_interval: Duration,
    heartbeat_backoff: Duration,
}

impl BrokerRuntime {
    pub fn new(
        membership: Arc<Membership>,
        client: CoordinatorClient,
        delivery: Arc<DeliveryLoop>,
        heartbeat_interval: Duration,
        heartbeat_backoff: Duration,
    ) -> Self {
        Self {
            membership,
            client,
            delivery,
            heartbeat_interval,
            heartbeat_backoff,
        }
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn delivery(&self) -> &Arc<DeliveryLoop> {
        &self.delivery
    }

    /// Register once and adopt the returned membership
    pub async fn register(&self) -> Result<RoleTransition, ClientError> {
        let descriptor = self.membership.descriptor().await;
        let membership = self.client.register(&descriptor).await?;

        tracing::info!(
            broker_id = descriptor.id,
            coordinator = %self.client.current_url(),
            members = membership.len(),
            "Registered with coordinator"
        );

        let transition = self.membership.apply_registration(membership).await;
        self.follow_transition(transition);
        Ok(transition)
    }

    /// Register with a bounded number of retries
    ///
    /// Gives up quietly after the last attempt; the heartbeat loop then
    /// admits the broker once a coordinator is reachable.
    pub async fn register_with_retry(&self) -> Option<RoleTransition> {
        let backoff = Backoff::new(
            REGISTRATION_RETRIES,
            self.heartbeat_backoff,
            self.heartbeat_backoff * 4,
        );

        match retry(&backoff, "register", || self.register()).await {
            Ok(transition) => Some(transition),
            Err(e) => {
                tracing::warn!(
                    broker_id = self.membership.id(),
                    error = %e,
                    "Registration failed, relying on heartbeat admission"
                );
                None
            }
        }
    }

    /// Send one heartbeat
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let request = HeartbeatRequest::new(self.membership.descriptor().await, now_millis());
        self.client.heartbeat(&request).await
    }

    /// Handle an update-leader push
    pub async fn handle_update_leader(&self, leader: &BrokerNode) -> RoleTransition {
        let transition = self.membership.apply_update_leader(leader).await;
        self.follow_transition(transition);
        transition
    }

    /// Handle an update-brokers push
    pub async fn handle_update_brokers(&self, brokers: Vec<BrokerNode>) -> RoleTransition {
        let transition = self.membership.apply_update_brokers(brokers).await;
        self.follow_transition(transition);
        transition
    }

    // Demotion needs no action here: the delivery loop notices it on its next tick
    fn follow_transition(&self, transition: RoleTransition) {
        if transition == RoleTransition::Promoted {
            self.delivery.start();
        }
    }

    /// Spawn registration followed by the heartbeat loop
    pub fn start(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = self.register_with_retry() => {}
                _ = shutdown_rx.changed() => return,
            }

            let mut ticker = interval(self.heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.heartbeat().await {
                            tracing::warn!(
                                broker_id = self.membership.id(),
                                error = %e,
                                backoff_ms = self.heartbeat_backoff.as_millis() as u64,
                                "Heartbeat failed"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(self.heartbeat_backoff) => {}
                                _ = shutdown_rx.changed() => break,
                            }
                            ticker.reset();
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Heartbeat sender shutting down");
                        break;
                    }
                }
            }
        })
    }
}
