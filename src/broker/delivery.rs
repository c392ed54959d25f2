//! Leader-only delivery loop
//!
//! One envelope is in flight at a time. Each tick peeks the head of the
//! queue, pushes it to every subscriber of its topic in subscription order,
//! then pops it and replicates the shorter queue. Failed pushes are logged
//! and not retried; the envelope is popped regardless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::metrics;
use crate::peer::PeerClient;

use super::membership::Membership;
use super::replication::{Collection, Replicator};
use super::state::PubSubState;

/// Result of one delivery pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryTick {
    /// Subscribers that answered 2xx
    pub delivered: usize,

    /// Subscribers that failed or timed out
    pub failed: usize,

    /// Whether the head envelope was popped
    pub popped: bool,
}

/// Single-instance delivery loop of a broker
pub struct DeliveryLoop {
    running: AtomicBool,
    state: Arc<PubSubState>,
    membership: Arc<Membership>,
    replicator: Replicator,
    peer: PeerClient,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl DeliveryLoop {
    pub fn new(
        state: Arc<PubSubState>,
        membership: Arc<Membership>,
        replicator: Replicator,
        peer: PeerClient,
        period: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            running: AtomicBool::new(false),
            state,
            membership,
            replicator,
            peer,
            period,
            shutdown_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the loop unless it is already running
    ///
    /// Returns the task handle when this call started it. The loop stops on
    /// shutdown or at the first tick after this broker stops being leader,
    /// after which a later promotion may start it again.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Delivery loop already running");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            tracing::info!(
                broker_id = this.membership.id(),
                period_ms = this.period.as_millis() as u64,
                "Delivery loop started"
            );

            let mut shutdown_rx = this.shutdown_rx.clone();
            let mut ticker = interval(this.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !this.membership.is_leader().await {
                            tracing::info!("No longer leader, stopping delivery loop");
                            break;
                        }
                        this.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Delivery loop shutting down");
                        break;
                    }
                }
            }

            this.running.store(false, Ordering::SeqCst);
        }))
    }

    /// Deliver the head envelope, if any
    pub async fn tick(&self) -> DeliveryTick {
        let Some(envelope) = self.state.peek().await else {
            return DeliveryTick::default();
        };

        let subscribers = self.state.subscribers_of(&envelope.topic).await;
        let mut outcome = DeliveryTick::default();

        for subscriber in &subscribers {
            let url = subscriber.receive_endpoint();
            match self.peer.post_json(&url, &envelope).await {
                Ok(_) => {
                    outcome.delivered += 1;
                    tracing::debug!(
                        subscriber = %subscriber.connection_url,
                        topic = %envelope.topic,
                        message_id = ?envelope.message_id,
                        "Message delivered"
                    );
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        subscriber = %subscriber.connection_url,
                        url = %url,
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        if subscribers.is_empty() {
            tracing::debug!(topic = %envelope.topic, "No subscribers for topic, dropping head");
        }

        match self.state.pop_delivered(&envelope).await {
            Some(queue) => {
                outcome.popped = true;
                metrics::record_deliveries(outcome.delivered, outcome.failed, queue.len());
                self.replicator.replicate(&[Collection::Queue]).await;
            }
            None => {
                tracing::warn!(topic = %envelope.topic, "Queue head changed during delivery");
                metrics::record_deliveries(
                    outcome.delivered,
                    outcome.failed,
                    self.state.queue_len().await,
                );
            }
        }

        outcome
    }
}
