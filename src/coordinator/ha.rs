//! Coordinator high availability
//!
//! Two coordinators run as a primary/secondary pair. The primary pushes a
//! heartbeat and then a full [`ClusterSyncSnapshot`] to the secondary on
//! every tick. The secondary records those heartbeats and promotes itself
//! once no record younger than the heartbeat timeout remains.
//!
//! Every coordinator carries an epoch that promotion increments. Heartbeats
//! and snapshots carrying an older epoch are refused, and a primary whose
//! push is refused steps down and re-registers with the coordinator that
//! refused it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::metrics;
use crate::models::{join_url, ClusterSyncSnapshot, CoordinatorHeartbeat};
use crate::peer::{PeerClient, PeerError};
use crate::utils::age_millis;

use super::config::{CoordinatorConfig, CoordinatorRole};
use super::registry::ClusterRegistry;

pub const REGISTER_COORDINATOR_PATH: &str = "/coordinator/register-coordinator";
pub const COORDINATOR_HEARTBEAT_PATH: &str = "/coordinator/coordinator-heartbeat";
pub const SYNC_DATA_PATH: &str = "/coordinator/sync-data";

/// Query parameter carrying the secondary's URL on registration
pub const SECONDARY_URL_PARAM: &str = "secondaryCoordinatorURL";

/// Errors raised by the HA supervisor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HaError {
    /// Operation only a primary may serve
    #[error("Coordinator is not primary")]
    NotPrimary { primary_url: Option<String> },

    /// Peer push from an older or equal-but-losing epoch
    #[error("Stale coordinator epoch {received} (current {current})")]
    StaleEpoch { received: u64, current: u64 },

    /// Coordinator URL missing or malformed
    #[error("Invalid coordinator URL: '{0}'")]
    InvalidUrl(String),
}

/// What one supervisor tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaTick {
    /// Primary without a registered secondary
    NoSecondary,

    /// Primary pushed to its secondary
    Replicated { heartbeat: bool, sync: bool },

    /// Primary stepped down after its push was refused
    Demoted,

    /// Secondary saw a live primary
    Monitoring,

    /// Secondary took over as primary
    Promoted,
}

/// Part of a 409 answer read by a refused primary
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Refusal {
    current_epoch: Option<u64>,
}

impl Refusal {
    fn epoch_of(err: &PeerError) -> Option<u64> {
        let body = err.body()?;
        serde_json::from_str::<Refusal>(body).ok()?.current_epoch
    }
}

#[derive(Debug)]
struct HaState {
    role: CoordinatorRole,
    epoch: u64,
    primary_url: Option<String>,
    secondary_url: Option<String>,
    peer_heartbeats: HashMap<String, i64>,
}

/// Primary/secondary role holder for one coordinator process
#[derive(Debug)]
pub struct HaSupervisor {
    self_url: String,
    state: RwLock<HaState>,
    registry: Arc<ClusterRegistry>,
    peer: PeerClient,
    timeout_ms: i64,
}

impl HaSupervisor {
    pub fn new(
        config: &CoordinatorConfig,
        registry: Arc<ClusterRegistry>,
        peer: PeerClient,
    ) -> Self {
        metrics::set_coordinator_primary(config.role.is_primary());

        Self {
            self_url: config.advertised_url.clone(),
            state: RwLock::new(HaState {
                role: config.role,
                epoch: 0,
                primary_url: config.peer_url.clone().filter(|_| !config.role.is_primary()),
                secondary_url: None,
                peer_heartbeats: HashMap::new(),
            }),
            registry,
            peer,
            timeout_ms: config.heartbeat_timeout_millis(),
        }
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub async fn is_primary(&self) -> bool {
        self.state.read().await.role.is_primary()
    }

    pub async fn role(&self) -> CoordinatorRole {
        self.state.read().await.role
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    /// Primary this coordinator last heard from, when secondary
    pub async fn primary_url(&self) -> Option<String> {
        self.state.read().await.primary_url.clone()
    }

    pub async fn secondary_url(&self) -> Option<String> {
        self.state.read().await.secondary_url.clone()
    }

    /// Fail with [`HaError::NotPrimary`] unless this coordinator is primary
    pub async fn ensure_primary(&self) -> Result<(), HaError> {
        let state = self.state.read().await;
        if state.role.is_primary() {
            Ok(())
        } else {
            Err(HaError::NotPrimary {
                primary_url: state.primary_url.clone(),
            })
        }
    }

    /// Record the secondary that pushes will go to
    pub async fn register_secondary(&self, url: impl Into<String>) -> Result<(), HaError> {
        let url = url.into();
        if Url::parse(&url).is_err() {
            return Err(HaError::InvalidUrl(url));
        }

        let mut state = self.state.write().await;
        if !state.role.is_primary() {
            return Err(HaError::NotPrimary {
                primary_url: state.primary_url.clone(),
            });
        }

        tracing::info!(secondary = %url, "Secondary coordinator registered");
        state.secondary_url = Some(url);
        Ok(())
    }

    /// Accept a heartbeat from a coordinator acting as primary
    ///
    /// A primary receiving a heartbeat from a newer epoch steps down. Two
    /// primaries on the same epoch settle on the lexicographically smaller
    /// URL.
    pub async fn record_peer_heartbeat(
        &self,
        heartbeat: &CoordinatorHeartbeat,
        now: i64,
    ) -> Result<(), HaError> {
        let mut state = self.state.write().await;

        if heartbeat.epoch < state.epoch {
            return Err(HaError::StaleEpoch {
                received: heartbeat.epoch,
                current: state.epoch,
            });
        }

        if state.role.is_primary() {
            let yields = heartbeat.epoch > state.epoch
                || heartbeat.coordinator_url.as_str() < self.self_url.as_str();
            if !yields {
                return Err(HaError::StaleEpoch {
                    received: heartbeat.epoch,
                    current: state.epoch,
                });
            }

            tracing::warn!(
                primary = %heartbeat.coordinator_url,
                epoch = heartbeat.epoch,
                "Another primary is active; stepping down"
            );
            state.role = CoordinatorRole::Secondary;
            state.secondary_url = None;
            metrics::set_coordinator_primary(false);
        }

        state.epoch = heartbeat.epoch;
        state.primary_url = Some(heartbeat.coordinator_url.clone());
        state
            .peer_heartbeats
            .insert(heartbeat.coordinator_url.clone(), now);
        Ok(())
    }

    /// Replace the local registry with the primary's snapshot
    pub async fn apply_sync(&self, snapshot: ClusterSyncSnapshot) -> Result<(), HaError> {
        {
            let mut state = self.state.write().await;
            if state.role.is_primary() || snapshot.epoch < state.epoch {
                return Err(HaError::StaleEpoch {
                    received: snapshot.epoch,
                    current: state.epoch,
                });
            }
            state.epoch = snapshot.epoch;
        }

        tracing::debug!(
            brokers = snapshot.brokers.len(),
            epoch = snapshot.epoch,
            "Applying cluster snapshot"
        );
        self.registry.restore(snapshot).await;
        Ok(())
    }

    /// Run one supervisor step
    pub async fn tick(&self, now: i64) -> HaTick {
        if self.is_primary().await {
            self.replicate(now).await
        } else {
            self.monitor(now).await
        }
    }

    async fn replicate(&self, now: i64) -> HaTick {
        let (secondary, epoch) = {
            let state = self.state.read().await;
            match &state.secondary_url {
                Some(url) => (url.clone(), state.epoch),
                None => return HaTick::NoSecondary,
            }
        };

        let heartbeat = CoordinatorHeartbeat {
            timestamp: now,
            coordinator_url: self.self_url.clone(),
            epoch,
        };

        let heartbeat_url = join_url(&secondary, COORDINATOR_HEARTBEAT_PATH);
        if let Err(e) = self.peer.post_json(&heartbeat_url, &heartbeat).await {
            return self.push_failed(&secondary, e, now).await;
        }

        let snapshot = self.registry.snapshot(epoch).await;
        let sync_url = join_url(&secondary, SYNC_DATA_PATH);
        match self.peer.post_json(&sync_url, &snapshot).await {
            Ok(_) => HaTick::Replicated {
                heartbeat: true,
                sync: true,
            },
            Err(e) => match self.push_failed(&secondary, e, now).await {
                HaTick::Demoted => HaTick::Demoted,
                _ => HaTick::Replicated {
                    heartbeat: true,
                    sync: false,
                },
            },
        }
    }

    async fn push_failed(&self, secondary: &str, err: PeerError, now: i64) -> HaTick {
        if err.status() == Some(409) {
            self.demote(secondary, Refusal::epoch_of(&err), now).await;
            return HaTick::Demoted;
        }

        tracing::warn!(
            secondary = %secondary,
            error = %err,
            "Push to secondary coordinator failed"
        );
        metrics::record_dispatch_failure("coordinator-sync");
        HaTick::Replicated {
            heartbeat: false,
            sync: false,
        }
    }

    async fn monitor(&self, now: i64) -> HaTick {
        let primary_alive = {
            let mut state = self.state.write().await;
            let timeout = self.timeout_ms;
            state
                .peer_heartbeats
                .retain(|_, last| age_millis(now, *last) <= timeout);
            !state.peer_heartbeats.is_empty()
        };

        if primary_alive {
            HaTick::Monitoring
        } else {
            self.promote(now).await;
            HaTick::Promoted
        }
    }

    /// Become primary under a new epoch
    ///
    /// Every broker heartbeat record is reset to `now`, so brokers that were
    /// talking to the old primary get a full timeout to find this one. The
    /// former primary becomes the push target: if it comes back on an older
    /// epoch, the first heartbeat makes it step down.
    pub async fn promote(&self, now: i64) {
        let (epoch, former) = {
            let mut state = self.state.write().await;
            state.role = CoordinatorRole::Primary;
            state.epoch += 1;
            state.secondary_url = state.primary_url.take();
            state.peer_heartbeats.clear();
            (state.epoch, state.secondary_url.clone())
        };

        self.registry.refresh_heartbeats(now).await;
        metrics::record_promotion();
        tracing::warn!(
            epoch = epoch,
            former_primary = ?former,
            "Primary coordinator silent; promoted to primary"
        );
    }

    /// Step down after a push was refused by `new_primary`
    ///
    /// `epoch` is the refusing coordinator's epoch when its answer carried
    /// one; this coordinator adopts it if it is higher than its own.
    async fn demote(&self, new_primary: &str, epoch: Option<u64>, now: i64) {
        let adopted = {
            let mut state = self.state.write().await;
            state.role = CoordinatorRole::Secondary;
            state.epoch = state.epoch.max(epoch.unwrap_or_default());
            state.primary_url = Some(new_primary.to_string());
            state.secondary_url = None;
            state.peer_heartbeats.clear();
            state.peer_heartbeats.insert(new_primary.to_string(), now);
            state.epoch
        };

        metrics::set_coordinator_primary(false);
        tracing::warn!(
            primary = %new_primary,
            epoch = adopted,
            "Push refused by a newer primary; stepping down"
        );
        self.announce_to_primary(new_primary);
    }

    /// Seed the primary's heartbeat record and register with it
    ///
    /// Called once at startup when this coordinator starts as secondary.
    pub async fn bootstrap(&self, now: i64) -> Option<JoinHandle<bool>> {
        let primary = {
            let mut state = self.state.write().await;
            if state.role.is_primary() {
                return None;
            }
            let primary = state.primary_url.clone()?;
            state.peer_heartbeats.insert(primary.clone(), now);
            primary
        };

        Some(self.announce_to_primary(&primary))
    }

    /// Fire-and-forget registration of this coordinator as secondary
    pub fn announce_to_primary(&self, primary_url: &str) -> JoinHandle<bool> {
        let peer = self.peer.clone();
        let endpoint = join_url(primary_url, REGISTER_COORDINATOR_PATH);
        let self_url = self.self_url.clone();

        tokio::spawn(async move {
            let params = [(SECONDARY_URL_PARAM, &self_url)];
            let url = match Url::parse_with_params(&endpoint, &params) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(
                        url = %endpoint,
                        error = %e,
                        "Invalid primary coordinator URL"
                    );
                    return false;
                }
            };

            match peer.post_empty(url.as_str()).await {
                Ok(_) => {
                    tracing::info!(primary = %endpoint, "Registered with primary coordinator");
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        primary = %endpoint,
                        error = %e,
                        "Failed to register with primary coordinator"
                    );
                    metrics::record_dispatch_failure("register-coordinator");
                    false
                }
            }
        })
    }

    /// Spawn the supervisor loop
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
                        let outcome = self.tick(crate::utils::now_millis()).await;
                        tracing::trace!(outcome = ?outcome, "HA tick");
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("HA supervisor shutting down");
                        break;
                    }
                }
            }
        })
    }
}
