//! Publish/subscribe tests through a running cluster
//!
//! One coordinator, a leader and a follower, with a mock subscriber
//! receiving deliveries.

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures::{
    get_json, post_json, put_json, wait_until, TestBroker, TestCoordinator, WAIT,
};

struct Cluster {
    _coordinator: TestCoordinator,
    leader: TestBroker,
    follower: TestBroker,
}

async fn cluster() -> Cluster {
    let coordinator = TestCoordinator::primary().await;
    let leader = TestBroker::spawn(200, &[&coordinator.url]).await;

    let l = &leader;
    assert!(wait_until(WAIT, || async move { l.is_leader().await }).await);

    let follower = TestBroker::spawn(100, &[&coordinator.url]).await;
    let f = &follower;
    assert!(wait_until(WAIT, || async move { f.known_leader().await == Some(200) }).await);
    assert!(
        wait_until(WAIT, || async move { l.known_brokers().await == 2 }).await,
        "leader should learn its follower"
    );

    Cluster {
        _coordinator: coordinator,
        leader,
        follower,
    }
}

async fn subscriber() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/subscriber/receive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

async fn received_payloads(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter_map(|body| body["payload"].as_str().map(str::to_string))
        .collect()
}

async fn subscribe(leader: &TestBroker, subscriber_url: &str, topic: &str) {
    let (status, _) = post_json(
        &format!("{}/broker/register-subscriber", leader.url),
        json!({ "connectionUrl": subscriber_url }),
    )
    .await;
    assert_eq!(status, 200);

    let (status, _) = put_json(
        &format!("{}/broker/subscribe", leader.url),
        json!({ "connectionUrl": subscriber_url, "topic": topic }),
    )
    .await;
    assert_eq!(status, 200);
}

async fn publish(leader: &TestBroker, topic: &str, message: &str, mid: i32) {
    let (status, body) = post_json(
        &format!("{}/broker/publish", leader.url),
        json!({ "topic": topic, "message": message, "pid": "feed-1", "mid": mid }),
    )
    .await;
    assert_eq!(status, 200, "publish failed: {body}");
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_published_message_reaches_subscriber() {
    let cluster = cluster().await;
    let sub = subscriber().await;

    subscribe(&cluster.leader, &sub.uri(), "nba").await;
    publish(&cluster.leader, "nba", "tip-off", 1).await;

    let s = &sub;
    assert!(wait_until(WAIT, || async move { received_payloads(s).await.len() == 1 }).await);

    let requests = sub.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["topic"], "nba");
    assert_eq!(body["payload"], "tip-off");
    assert_eq!(body["messageId"], 1);
    assert_eq!(body["producerId"], "feed-1");

    let l = &cluster.leader;
    assert!(wait_until(WAIT, || async move { l.queue_len().await == 0 }).await);
}

#[tokio::test]
async fn test_messages_delivered_in_publish_order() {
    let cluster = cluster().await;
    let sub = subscriber().await;

    subscribe(&cluster.leader, &sub.uri(), "nfl").await;
    for (mid, message) in ["kickoff", "touchdown", "final"].iter().enumerate() {
        publish(&cluster.leader, "nfl", message, mid as i32).await;
    }

    let s = &sub;
    assert!(wait_until(WAIT, || async move { received_payloads(s).await.len() == 3 }).await);
    assert_eq!(
        received_payloads(&sub).await,
        vec!["kickoff", "touchdown", "final"]
    );
}

#[tokio::test]
async fn test_unsubscribed_subscriber_receives_nothing() {
    let cluster = cluster().await;
    let sub = subscriber().await;

    subscribe(&cluster.leader, &sub.uri(), "mlb").await;
    let (status, _) = put_json(
        &format!("{}/broker/unsubscribe", cluster.leader.url),
        json!({ "connectionUrl": sub.uri(), "topic": "mlb" }),
    )
    .await;
    assert_eq!(status, 200);

    publish(&cluster.leader, "mlb", "first pitch", 7).await;

    let l = &cluster.leader;
    assert!(wait_until(WAIT, || async move { l.queue_len().await == 0 }).await);
    assert!(received_payloads(&sub).await.is_empty());
}

// ============================================================================
// Replication
// ============================================================================

#[tokio::test]
async fn test_follower_mirrors_leader_state() {
    let cluster = cluster().await;
    let sub = subscriber().await;

    subscribe(&cluster.leader, &sub.uri(), "nhl").await;
    publish(&cluster.leader, "nhl", "puck drop", 3).await;

    let f = &cluster.follower;
    assert!(wait_until(WAIT, || async move { f.has_topic("nhl").await }).await);

    let sub_url = sub.uri();
    let u = sub_url.as_str();
    assert!(
        wait_until(WAIT, || async move {
            f.state.service.state().is_subscriber_valid(u).await
        })
        .await
    );
    assert!(
        wait_until(WAIT, || async move {
            f.state.service.state().subscribers_of("nhl").await.len() == 1
        })
        .await
    );

    // Deliveries pop the leader's head and the follower's copy follows
    let s = &sub;
    assert!(wait_until(WAIT, || async move { received_payloads(s).await.len() == 1 }).await);
    assert!(wait_until(WAIT, || async move { f.queue_len().await == 0 }).await);
}

#[tokio::test]
async fn test_registered_subscriber_lists_topics_on_any_broker() {
    let cluster = cluster().await;
    let sub = subscriber().await;

    subscribe(&cluster.leader, &sub.uri(), "nba").await;
    publish(&cluster.leader, "nba", "buzzer", 1).await;
    publish(&cluster.leader, "wnba", "tip", 2).await;

    let topics_url = format!(
        "{}/broker/gettopics?subscriberConnectionURL={}",
        cluster.leader.url,
        sub.uri()
    );
    let (status, topics) = get_json(&topics_url).await;
    assert_eq!(status, 200);
    assert_eq!(topics, json!(["nba", "wnba"]));

    let f = &cluster.follower;
    assert!(wait_until(WAIT, || async move { f.has_topic("wnba").await }).await);
    let sub_url = sub.uri();
    let u = sub_url.as_str();
    assert!(
        wait_until(WAIT, || async move {
            f.state.service.state().is_subscriber_valid(u).await
        })
        .await
    );

    let topics_url = format!(
        "{}/broker/gettopics?subscriberConnectionURL={}",
        cluster.follower.url,
        sub.uri()
    );
    let (status, topics) = get_json(&topics_url).await;
    assert_eq!(status, 200);
    assert_eq!(topics, json!(["nba", "wnba"]));
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_follower_redirects_client_writes() {
    let cluster = cluster().await;

    let (status, body) = post_json(
        &format!("{}/broker/publish", cluster.follower.url),
        json!({ "topic": "nba", "message": "tip-off" }),
    )
    .await;

    assert_eq!(status, 421);
    assert_eq!(body["redirectUrl"], cluster.leader.url.as_str());
    assert_eq!(cluster.follower.queue_len().await, 0);
}

#[tokio::test]
async fn test_leader_refuses_replication() {
    let cluster = cluster().await;

    let (status, _) = post_json(
        &format!("{}/broker/replicatemessages", cluster.leader.url),
        json!([]),
    )
    .await;

    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_unknown_subscriber_is_forbidden() {
    let cluster = cluster().await;

    let (status, _) = put_json(
        &format!("{}/broker/subscribe", cluster.leader.url),
        json!({ "connectionUrl": "http://127.0.0.1:1", "topic": "nba" }),
    )
    .await;
    assert_eq!(status, 403);

    let (status, _) = get_json(&format!(
        "{}/broker/gettopics?subscriberConnectionURL=http://127.0.0.1:1",
        cluster.leader.url
    ))
    .await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn test_publish_without_topic_is_rejected() {
    let cluster = cluster().await;

    let (status, _) = post_json(
        &format!("{}/broker/publish", cluster.leader.url),
        json!({ "message": "orphan" }),
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(cluster.leader.queue_len().await, 0);
}
