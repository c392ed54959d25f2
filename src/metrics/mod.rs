//! Prometheus metrics for the coordinator and the brokers
//!
//! This module provides metrics tracking for:
//! - Coordinator: registered brokers, heartbeats, evictions, elections, promotions
//! - Broker: published messages, delivery outcomes, queue depth, role
//! - Both: failed fire-and-forget peer dispatches
//!
//! # Usage
//!
//! Call `init_metrics()` at process startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all coordinator metrics
struct CoordinatorMetrics {
    registered_brokers: Gauge,
    total_heartbeats: Counter,
    evictions: Counter,
    elections: Counter,
    promotions: Counter,
    is_primary: Gauge,
}

/// Container for all broker metrics
struct BrokerMetrics {
    messages_published: CounterVec,
    deliveries: CounterVec,
    queue_depth: Gauge,
    is_leader: Gauge,
}

/// Container for metrics shared by both processes
struct PeerMetrics {
    dispatch_failures: CounterVec,
}

static COORDINATOR_METRICS: OnceLock<CoordinatorMetrics> = OnceLock::new();

static BROKER_METRICS: OnceLock<BrokerMetrics> = OnceLock::new();

static PEER_METRICS: OnceLock<PeerMetrics> = OnceLock::new();

/// Outcome of the one-shot registration, shared by every caller
static METRICS_INIT: OnceLock<Result<(), String>> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once and from several threads; only the first
/// call registers anything and every caller observes its outcome.
pub fn init_metrics() -> Result<(), String> {
    METRICS_INIT
        .get_or_init(|| register_all().map_err(|e| e.to_string()))
        .clone()
}

fn register_all() -> Result<(), prometheus::Error> {
    let coordinator = CoordinatorMetrics {
        registered_brokers: register_gauge!(
            "sports_notify_coordinator_registered_brokers",
            "Number of brokers in the cluster registry"
        )?,
        total_heartbeats: register_counter!(
            "sports_notify_coordinator_heartbeats_total",
            "Total number of broker heartbeats received"
        )?,
        evictions: register_counter!(
            "sports_notify_coordinator_evictions_total",
            "Total number of brokers evicted for a stale heartbeat"
        )?,
        elections: register_counter!(
            "sports_notify_coordinator_elections_total",
            "Total number of leader elections"
        )?,
        promotions: register_counter!(
            "sports_notify_coordinator_promotions_total",
            "Total number of secondary to primary promotions"
        )?,
        is_primary: register_gauge!(
            "sports_notify_coordinator_is_primary",
            "1 when this coordinator is primary, 0 otherwise"
        )?,
    };

    let broker = BrokerMetrics {
        messages_published: register_counter_vec!(
            "sports_notify_broker_messages_published_total",
            "Total messages accepted for publication by topic",
            &["topic"]
        )?,
        deliveries: register_counter_vec!(
            "sports_notify_broker_deliveries_total",
            "Delivery attempts to subscribers by outcome",
            &["outcome"]
        )?,
        queue_depth: register_gauge!(
            "sports_notify_broker_queue_depth",
            "Number of envelopes waiting in the message queue"
        )?,
        is_leader: register_gauge!(
            "sports_notify_broker_is_leader",
            "1 when this broker is the leader, 0 otherwise"
        )?,
    };

    let peer = PeerMetrics {
        dispatch_failures: register_counter_vec!(
            "sports_notify_peer_dispatch_failures_total",
            "Failed fire-and-forget calls to cluster peers by kind",
            &["kind"]
        )?,
    };

    COORDINATOR_METRICS.set(coordinator).ok();
    BROKER_METRICS.set(broker).ok();
    PEER_METRICS.set(peer).ok();

    tracing::debug!("Prometheus metrics registered");
    Ok(())
}

/// Check whether metrics were registered
pub fn metrics_initialized() -> bool {
    COORDINATOR_METRICS.get().is_some() && BROKER_METRICS.get().is_some()
}

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// `GET /metrics` handler shared by both servers
pub async fn metrics_handler() -> Response {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            let error = crate::error::Error::other(e.to_string());
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(crate::error::ErrorResponse::from(&error)),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Update the registered broker gauge
pub fn set_registered_brokers(count: usize) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.registered_brokers.set(count as f64);
    }
}

/// Record a broker heartbeat
pub fn record_heartbeat() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.total_heartbeats.inc();
    }
}

/// Record evicted brokers and whether an election followed
pub fn record_sweep(evicted: usize, elected: bool) {
    let Some(m) = COORDINATOR_METRICS.get() else {
        return;
    };

    m.evictions.inc_by(evicted as f64);
    if elected {
        m.elections.inc();
    }
}

/// Record the coordinator's current role
pub fn set_coordinator_primary(primary: bool) {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.is_primary.set(if primary { 1.0 } else { 0.0 });
    }
}

/// Record a secondary to primary promotion
pub fn record_promotion() {
    if let Some(m) = COORDINATOR_METRICS.get() {
        m.promotions.inc();
        m.is_primary.set(1.0);
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Record an accepted publish
pub fn record_publish(topic: &str, queue_depth: usize) {
    let Some(m) = BROKER_METRICS.get() else {
        return;
    };

    m.messages_published.with_label_values(&[topic]).inc();
    m.queue_depth.set(queue_depth as f64);
}

/// Record delivery outcomes for one envelope
pub fn record_deliveries(succeeded: usize, failed: usize, queue_depth: usize) {
    let Some(m) = BROKER_METRICS.get() else {
        return;
    };

    m.deliveries
        .with_label_values(&["success"])
        .inc_by(succeeded as f64);
    m.deliveries
        .with_label_values(&["failure"])
        .inc_by(failed as f64);
    m.queue_depth.set(queue_depth as f64);
}

/// Record the broker's current role
pub fn set_broker_leader(leader: bool) {
    if let Some(m) = BROKER_METRICS.get() {
        m.is_leader.set(if leader { 1.0 } else { 0.0 });
    }
}

// ============================================================================
// Peers
// ============================================================================

/// Record a failed fire-and-forget dispatch
pub fn record_dispatch_failure(kind: &str) {
    if let Some(m) = PEER_METRICS.get() {
        m.dispatch_failures.with_label_values(&[kind]).inc();
    }
}
