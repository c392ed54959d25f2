//! Failure detector and leader elector
//!
//! Runs on every coordinator but only acts while that coordinator is
//! primary, so a secondary picks up sweeping the moment it promotes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::ha::HaSupervisor;
use super::notifier::BrokerNotifier;
use super::registry::{ClusterRegistry, SweepOutcome};

/// Result of one detector pass
#[derive(Debug)]
pub struct SweepReport {
    pub outcome: SweepOutcome,

    /// Background fan-out of the outcome; resolves to the number of
    /// successful pushes
    pub notifications: Option<JoinHandle<usize>>,
}

/// Periodic heartbeat-staleness sweep
pub struct FailureDetector {
    registry: Arc<ClusterRegistry>,
    notifier: BrokerNotifier,
    ha: Arc<HaSupervisor>,
    timeout_ms: i64,
}

impl FailureDetector {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        notifier: BrokerNotifier,
        ha: Arc<HaSupervisor>,
        timeout_ms: i64,
    ) -> Self {
        Self {
            registry,
            notifier,
            ha,
            timeout_ms,
        }
    }

    /// Sweep once at `now`; `None` when this coordinator is not primary
    pub async fn run_once(&self, now: i64) -> Option<SweepReport> {
        if !self.ha.is_primary().await {
            return None;
        }

        let outcome = self.registry.sweep(now, self.timeout_ms).await;
        let notifications = if outcome.is_empty() {
            None
        } else {
            Some(self.notify(&outcome))
        };

        Some(SweepReport {
            outcome,
            notifications,
        })
    }

    /// Push the sweep result to the survivors
    ///
    /// A new leader is announced to every survivor before the membership
    /// broadcast goes out.
    fn notify(&self, outcome: &SweepOutcome) -> JoinHandle<usize> {
        self.notifier.announce_then_broadcast(
            outcome.new_leader.clone(),
            outcome.membership.clone(),
            outcome.membership.clone(),
        )
    }

    /// Spawn the detector loop
    pub fn start(
        self: Arc<Self>,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(report) = self.run_once(crate::utils::now_millis()).await {
                            if !report.outcome.is_empty() {
                                tracing::info!(
                                    evicted = report.outcome.evicted.len(),
                                    members = report.outcome.membership.len(),
                                    "Failure detector evicted brokers"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Failure detector shutting down");
                        break;
                    }
                }
            }
        })
    }
}
