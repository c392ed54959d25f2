//! Coordinator failover tests
//!
//! A primary/secondary pair: registration of the secondary, state sync,
//! promotion when the primary goes silent, and fencing of a primary that
//! comes back on an old epoch.

use super::fixtures::{get_json, post_json, wait_until, TestBroker, TestCoordinator, WAIT};
use serde_json::json;

async fn pair() -> (TestCoordinator, TestCoordinator) {
    let primary = TestCoordinator::primary().await;
    let secondary = TestCoordinator::secondary(&primary.url).await;

    let p = &primary;
    let expected = secondary.url.clone();
    let e = expected.as_str();
    assert!(
        wait_until(WAIT, || async move {
            p.state.ha.secondary_url().await.as_deref() == Some(e)
        })
        .await,
        "secondary should register with the primary"
    );

    (primary, secondary)
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_secondary_mirrors_primary_registry() {
    let (primary, secondary) = pair().await;
    let _broker = TestBroker::spawn(100, &[&primary.url, &secondary.url]).await;

    let s = &secondary;
    assert!(wait_until(WAIT, || async move { s.leader_id().await == Some(100) }).await);
    assert_eq!(secondary.broker_ids().await, vec![100]);
    assert!(!secondary.is_primary().await);
    assert_eq!(secondary.state.ha.epoch().await, 0);

    let is_primary_url = format!("{}/coordinator/isPrimary-coordinator", secondary.url);
    let (status, body) = get_json(&is_primary_url).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!(false));
}

#[tokio::test]
async fn test_secondary_refuses_broker_traffic() {
    let (primary, secondary) = pair().await;

    let (status, body) = post_json(
        &format!("{}/coordinator/register", secondary.url),
        json!({ "id": 7, "connectionUrl": "http://127.0.0.1:1", "port": 1 }),
    )
    .await;

    assert_eq!(status, 503);
    assert_eq!(body["redirectUrl"], primary.url.as_str());
    assert!(secondary.broker_ids().await.is_empty());
}

// ============================================================================
// Promotion
// ============================================================================

#[tokio::test]
async fn test_secondary_promotes_when_primary_stops() {
    let (primary, secondary) = pair().await;
    let broker = TestBroker::spawn(100, &[&primary.url, &secondary.url]).await;

    let s = &secondary;
    assert!(wait_until(WAIT, || async move { s.leader_id().await == Some(100) }).await);

    primary.stop().await;

    assert!(
        wait_until(WAIT, || async move { s.is_primary().await }).await,
        "secondary should take over"
    );
    assert_eq!(secondary.state.ha.epoch().await, 1);

    // The broker fails over and keeps its membership alive on the new primary
    tokio::time::sleep(std::time::Duration::from_millis(
        super::fixtures::HEARTBEAT_TIMEOUT_MS * 2,
    ))
    .await;
    assert_eq!(secondary.broker_ids().await, vec![100]);
    assert_eq!(secondary.leader_id().await, Some(100));
    assert!(broker.is_leader().await);
}

#[tokio::test]
async fn test_restarted_primary_yields_to_promoted_secondary() {
    let (primary, secondary) = pair().await;
    let old_url = primary.url.clone();

    primary.stop().await;
    let s = &secondary;
    assert!(wait_until(WAIT, || async move { s.is_primary().await }).await);
    assert_eq!(
        secondary.state.ha.secondary_url().await.as_deref(),
        Some(old_url.as_str())
    );

    // The old primary comes back on its address with a fresh epoch 0 and
    // no secondary of its own
    let restarted = TestCoordinator::primary_at(&old_url).await;

    let r = &restarted;
    assert!(
        wait_until(WAIT, || async move { !r.is_primary().await }).await,
        "restarted primary should step down"
    );
    assert_eq!(restarted.state.ha.epoch().await, 1);
    assert_eq!(
        restarted.state.ha.primary_url().await.as_deref(),
        Some(secondary.url.as_str())
    );
    assert!(secondary.is_primary().await);
}

#[tokio::test]
async fn test_stale_primary_steps_down() {
    let (primary, secondary) = pair().await;

    primary.stop().await;
    let s = &secondary;
    assert!(wait_until(WAIT, || async move { s.is_primary().await }).await);

    // A fresh primary on epoch 0 learns about the promoted coordinator as
    // its secondary; its first push is refused and it steps down
    let stale = TestCoordinator::primary().await;
    let register_url = format!(
        "{}/coordinator/register-coordinator?secondaryCoordinatorURL={}",
        stale.url, secondary.url
    );
    let response = super::fixtures::http().post(&register_url).send().await.unwrap();
    assert!(response.status().is_success());

    let st = &stale;
    assert!(
        wait_until(WAIT, || async move { !st.is_primary().await }).await,
        "stale primary should be fenced"
    );
    assert_eq!(
        stale.state.ha.primary_url().await.as_deref(),
        Some(secondary.url.as_str())
    );

    // It then registers with the newer primary and adopts its epoch
    let stale_url = stale.url.clone();
    let u = stale_url.as_str();
    assert!(
        wait_until(WAIT, || async move {
            s.state.ha.secondary_url().await.as_deref() == Some(u)
        })
        .await
    );
    assert!(wait_until(WAIT, || async move { st.state.ha.epoch().await == 1 }).await);
    assert!(secondary.is_primary().await);
}
