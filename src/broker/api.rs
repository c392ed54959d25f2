//! REST API handlers for the Broker server
//!
//! Client writes are answered only by the leader; a follower returns 421
//! with the leader's URL. Replication routes are answered only by
//! followers.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metrics;
use crate::models::{
    AckResponse, BrokerNode, MessageEnvelope, MessageQueue, Publisher, Subscriber, TopicSet,
    TopicSubscriptionIndex,
};

use super::server::AppState;
use super::state::SubscriberRegistration;

// ============================================================================
// API Types
// ============================================================================

/// Query of `gettopics`
#[derive(Debug, Deserialize)]
pub struct TopicsQuery {
    #[serde(rename = "subscriberConnectionURL", default)]
    pub subscriber_connection_url: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub broker_id: i32,
    pub role: String,
    pub leader_id: Option<i32>,
    pub brokers: usize,
    pub topics: usize,
    pub queue_depth: usize,
    pub delivery_running: bool,
    pub uptime_secs: u64,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Client endpoints
        .route("/broker/gettopics", get(get_topics))
        .route("/broker/register-publisher", post(register_publisher))
        .route("/broker/register-subscriber", post(register_subscriber))
        .route("/broker/publish", post(publish))
        .route("/broker/subscribe", put(subscribe))
        .route("/broker/unsubscribe", put(unsubscribe))
        .route("/broker/brokers-list", get(brokers_list))
        // Replication from the leader
        .route("/broker/replicatemessages", post(replicate_messages))
        .route("/broker/replicatetopics", post(replicate_topics))
        .route("/broker/replicatesubscribers", post(replicate_subscribers))
        .route(
            "/broker/replicatetopicstosubscribers",
            post(replicate_topics_to_subscribers),
        )
        // Coordinator pushes
        .route("/broker/update-leader", put(update_leader))
        .route("/broker/update-brokers", put(update_brokers))
        // Operations
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
}

// ============================================================================
// Client Handlers
// ============================================================================

/// Topics, visible only to registered subscribers
async fn get_topics(
    State(state): State<AppState>,
    Query(query): Query<TopicsQuery>,
) -> Result<Json<TopicSet>, Error> {
    let topics = state
        .service
        .topics_for(&query.subscriber_connection_url)
        .await?;
    Ok(Json(topics))
}

async fn register_publisher(
    State(state): State<AppState>,
    Json(publisher): Json<Publisher>,
) -> Result<Json<AckResponse>, Error> {
    let message = if state.service.register_publisher(publisher).await? {
        "Publisher registered"
    } else {
        "Publisher already registered"
    };
    Ok(Json(AckResponse::new(message)))
}

async fn register_subscriber(
    State(state): State<AppState>,
    Json(subscriber): Json<Subscriber>,
) -> Result<Json<AckResponse>, Error> {
    let message = match state.service.register_subscriber(subscriber).await? {
        SubscriberRegistration::Registered(_) => "Subscriber registered",
        SubscriberRegistration::AlreadyRegistered => "Subscriber already registered",
    };
    Ok(Json(AckResponse::new(message)))
}

/// Enqueue a message; replication does not gate the answer
async fn publish(
    State(state): State<AppState>,
    Json(envelope): Json<MessageEnvelope>,
) -> Result<Json<AckResponse>, Error> {
    let envelope = state.service.publish(envelope).await?;
    Ok(Json(AckResponse::new(format!(
        "Message published to topic {}",
        envelope.topic
    ))))
}

async fn subscribe(
    State(state): State<AppState>,
    Json(subscriber): Json<Subscriber>,
) -> Result<Json<AckResponse>, Error> {
    state.service.subscribe(subscriber).await?;
    Ok(Json(AckResponse::new("Subscribed")))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Json(subscriber): Json<Subscriber>,
) -> Result<Json<AckResponse>, Error> {
    state.service.unsubscribe(subscriber).await?;
    Ok(Json(AckResponse::new("Unsubscribed")))
}

async fn brokers_list(State(state): State<AppState>) -> Json<Vec<BrokerNode>> {
    Json(state.service.brokers().await)
}

// ============================================================================
// Replication Handlers
// ============================================================================

async fn replicate_messages(
    State(state): State<AppState>,
    Json(queue): Json<MessageQueue>,
) -> Result<Json<AckResponse>, Error> {
    state.service.apply_replicated_queue(queue).await?;
    Ok(Json(AckResponse::new("Messages replicated")))
}

async fn replicate_topics(
    State(state): State<AppState>,
    Json(topics): Json<TopicSet>,
) -> Result<Json<AckResponse>, Error> {
    state.service.apply_replicated_topics(topics).await?;
    Ok(Json(AckResponse::new("Topics replicated")))
}

async fn replicate_subscribers(
    State(state): State<AppState>,
    Json(subscribers): Json<Vec<Subscriber>>,
) -> Result<Json<AckResponse>, Error> {
    state.service.apply_replicated_subscribers(subscribers).await?;
    Ok(Json(AckResponse::new("Subscribers replicated")))
}

async fn replicate_topics_to_subscribers(
    State(state): State<AppState>,
    Json(index): Json<TopicSubscriptionIndex>,
) -> Result<Json<AckResponse>, Error> {
    state.service.apply_replicated_index(index).await?;
    Ok(Json(AckResponse::new("Topic subscriptions replicated")))
}

// ============================================================================
// Coordinator Push Handlers
// ============================================================================

async fn update_leader(
    State(state): State<AppState>,
    Json(leader): Json<BrokerNode>,
) -> Json<AckResponse> {
    state.runtime.handle_update_leader(&leader).await;
    Json(AckResponse::new("Leader updated"))
}

async fn update_brokers(
    State(state): State<AppState>,
    Json(brokers): Json<Vec<BrokerNode>>,
) -> Json<AckResponse> {
    state.runtime.handle_update_brokers(brokers).await;
    Json(AckResponse::new("Broker list updated"))
}

// ============================================================================
// Operations Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let membership = state.service.membership();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        broker_id: membership.id(),
        role: membership.role().await.to_string(),
        leader_id: membership.leader().await.map(|l| l.id),
        brokers: membership.brokers().await.len(),
        topics: state.service.state().topics().await.len(),
        queue_depth: state.service.state().queue_len().await,
        delivery_running: state.runtime.delivery().is_running(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::config::BrokerConfig;
    use crate::broker::server::BrokerServer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::ServiceExt;

    const SELF_URL: &str = "http://127.0.0.1:1";
    const SUB: &str = "http://sub:9000";

    fn server(id: i32) -> BrokerServer {
        let config = BrokerConfig::builder()
            .connection_url(SELF_URL)
            .coordinator_urls(["http://127.0.0.1:1"])
            .build()
            .unwrap();
        BrokerServer::with_id(config, id).unwrap()
    }

    // The server is returned alongside the router so its shutdown channel
    // stays open for the duration of the test
    async fn leader_router() -> (Router, BrokerServer) {
        let server = server(1);
        server
            .state()
            .runtime
            .handle_update_brokers(vec![BrokerNode::new(1, SELF_URL, 1).as_leader()])
            .await;
        (create_router(server.state()), server)
    }

    /// Follower whose leader is broker 9
    async fn follower_router() -> (Router, BrokerServer) {
        let server = server(2);
        server
            .state()
            .runtime
            .handle_update_brokers(vec![
                BrokerNode::new(9, "http://leader:9009", 9009).as_leader(),
                BrokerNode::new(2, SELF_URL, 1),
            ])
            .await;
        (create_router(server.state()), server)
    }

    fn json_request(method: &str, uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_requires_registration() {
        let (router, _server) = leader_router().await;
        let subscriber = Subscriber::new(SUB).with_topic("nba");

        let response = router
            .clone()
            .oneshot(json_request("PUT", "/broker/subscribe", &subscriber))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/broker/register-subscriber",
                &Subscriber::new(SUB),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(json_request("PUT", "/broker/subscribe", &subscriber))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_duplicate_subscriber_reports_already_registered() {
        let (router, _server) = leader_router().await;

        for _ in 0..2 {
            router
                .clone()
                .oneshot(json_request(
                    "POST",
                    "/broker/register-subscriber",
                    &Subscriber::new(SUB),
                ))
                .await
                .unwrap();
        }

        let response = router
            .oneshot(json_request(
                "POST",
                "/broker/register-subscriber",
                &Subscriber::new(SUB),
            ))
            .await
            .unwrap();
        let ack: AckResponse = body_json(response).await;
        assert_eq!(ack.message, "Subscriber already registered");
    }

    #[tokio::test]
    async fn test_publish_validation() {
        let (router, _server) = leader_router().await;

        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/broker/publish",
                &serde_json::json!({"topic": "", "message": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(json_request(
                "POST",
                "/broker/publish",
                &serde_json::json!({"topic": "nba", "message": "tip-off", "mid": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_follower_redirects_writes_to_leader() {
        let (router, _server) = follower_router().await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/broker/publish",
                &MessageEnvelope::new("nba", "tip-off"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);

        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["redirectUrl"], "http://leader:9009");
    }

    #[tokio::test]
    async fn test_replication_overwrites_follower_topics() {
        let (router, _server) = follower_router().await;

        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/broker/replicatetopics",
                &vec!["nba", "nfl"],
            ))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(json_request(
                "POST",
                "/broker/replicatesubscribers",
                &vec![Subscriber::new(SUB)],
            ))
            .await
            .unwrap();
        let response = router
            .clone()
            .oneshot(json_request(
                "POST",
                "/broker/replicatetopics",
                &Vec::<String>::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(get(
                "/broker/gettopics?subscriberConnectionURL=http%3A%2F%2Fsub%3A9000",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let topics: TopicSet = body_json(response).await;
        assert!(topics.is_empty());
    }

    #[tokio::test]
    async fn test_leader_rejects_replication() {
        let (router, _server) = leader_router().await;

        let response = router
            .oneshot(json_request(
                "POST",
                "/broker/replicatemessages",
                &MessageQueue::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_update_leader_promotes_and_lists_brokers() {
        let (router, _server) = follower_router().await;

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/broker/update-leader",
                &BrokerNode::new(2, SELF_URL, 1).as_leader(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.clone().oneshot(get("/health")).await.unwrap();
        let health: HealthResponse = body_json(response).await;
        assert_eq!(health.role, "leader");
        assert_eq!(health.leader_id, Some(2));
        assert!(health.delivery_running);

        let response = router.oneshot(get("/broker/brokers-list")).await.unwrap();
        let brokers: Vec<BrokerNode> = body_json(response).await;
        let leaders: Vec<i32> = brokers.iter().filter(|b| b.is_leader).map(|b| b.id).collect();
        assert_eq!(leaders, vec![2]);
    }

    #[tokio::test]
    async fn test_gettopics_unknown_subscriber_forbidden() {
        let (router, _server) = leader_router().await;
        let response = router
            .oneshot(get("/broker/gettopics?subscriberConnectionURL=http%3A%2F%2Fnobody"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
