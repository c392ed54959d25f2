//! REST API handlers for the Coordinator server
//!
//! Broker-facing routes (`register`, `heartbeat`) are only served by the
//! primary; a secondary answers them with 503 so brokers rotate to the
//! other coordinator.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metrics;
use crate::models::{
    AckResponse, BrokerNode, ClusterSyncSnapshot, CoordinatorHeartbeat, HeartbeatRequest,
};
use crate::utils::now_millis;

use super::registry::HeartbeatOutcome;
use super::server::AppState;

// ============================================================================
// API Types
// ============================================================================

/// Query of `register-coordinator`
#[derive(Debug, Deserialize)]
pub struct RegisterCoordinatorQuery {
    #[serde(rename = "secondaryCoordinatorURL")]
    pub secondary_coordinator_url: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub role: String,
    pub epoch: u64,
    pub brokers: usize,
    pub leader_id: Option<i32>,
    pub uptime_secs: u64,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Broker-facing endpoints
        .route("/coordinator/register", post(register_broker))
        .route("/coordinator/heartbeat", post(broker_heartbeat))
        .route("/coordinator/brokers", get(list_brokers))
        .route("/coordinator/leader", get(get_leader))
        // Coordinator pair endpoints
        .route("/coordinator/register-coordinator", post(register_coordinator))
        .route("/coordinator/coordinator-heartbeat", post(coordinator_heartbeat))
        .route("/coordinator/sync-data", post(sync_data))
        .route("/coordinator/isPrimary-coordinator", get(is_primary))
        // Operations
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
}

// ============================================================================
// Broker Handlers
// ============================================================================

/// Admit a broker and return the full membership
async fn register_broker(
    State(state): State<AppState>,
    Json(broker): Json<BrokerNode>,
) -> Result<Json<Vec<BrokerNode>>, Error> {
    state.ha.ensure_primary().await?;

    let registration = state.registry.register(broker, now_millis()).await;
    state
        .notifier
        .broadcast_brokers(&registration.membership, Some(registration.broker.id));

    Ok(Json(registration.membership))
}

/// Record a broker heartbeat, re-admitting unknown brokers
async fn broker_heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<AckResponse>, Error> {
    state.ha.ensure_primary().await?;

    match state.registry.heartbeat(&request, now_millis()).await {
        HeartbeatOutcome::Refreshed => {
            tracing::trace!(broker_id = request.broker_id(), "Heartbeat received");
        }
        HeartbeatOutcome::Readmitted(registration) => {
            let leader = Some(registration.broker.clone()).filter(|b| b.is_leader);
            state.notifier.announce_then_broadcast(
                leader,
                vec![registration.broker],
                registration.membership,
            );
        }
    }

    Ok(Json(AckResponse::new("Heartbeat received")))
}

/// Current membership
async fn list_brokers(State(state): State<AppState>) -> Json<Vec<BrokerNode>> {
    Json(state.registry.brokers().await)
}

/// Current leader
async fn get_leader(State(state): State<AppState>) -> Response {
    match state.registry.leader().await {
        Some(leader) => Json(leader).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(AckResponse::new("No leader elected")),
        )
            .into_response(),
    }
}

// ============================================================================
// Coordinator Pair Handlers
// ============================================================================

/// Record the secondary coordinator
async fn register_coordinator(
    State(state): State<AppState>,
    Query(query): Query<RegisterCoordinatorQuery>,
) -> Result<Json<AckResponse>, Error> {
    state
        .ha
        .register_secondary(query.secondary_coordinator_url)
        .await?;

    Ok(Json(AckResponse::new("Secondary coordinator registered")))
}

/// Record a heartbeat from the primary
async fn coordinator_heartbeat(
    State(state): State<AppState>,
    Json(heartbeat): Json<CoordinatorHeartbeat>,
) -> Result<Json<AckResponse>, Error> {
    state
        .ha
        .record_peer_heartbeat(&heartbeat, now_millis())
        .await?;

    Ok(Json(AckResponse::new("Coordinator heartbeat received")))
}

/// Replace local state with the primary's snapshot
async fn sync_data(
    State(state): State<AppState>,
    Json(snapshot): Json<ClusterSyncSnapshot>,
) -> Result<Json<AckResponse>, Error> {
    state.ha.apply_sync(snapshot).await?;
    Ok(Json(AckResponse::new("Cluster state synchronized")))
}

async fn is_primary(State(state): State<AppState>) -> Json<bool> {
    Json(state.ha.is_primary().await)
}

// ============================================================================
// Operations Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: state.ha.role().await.to_string(),
        epoch: state.ha.epoch().await,
        brokers: state.registry.len().await,
        leader_id: state.registry.leader().await.map(|l| l.id),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
