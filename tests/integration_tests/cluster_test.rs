//! Cluster membership tests
//!
//! A primary coordinator with real brokers: admission of the first broker
//! as leader, followers learning the leader, and re-election after the
//! leader stops heartbeating.

use super::fixtures::{get_json, wait_until, TestBroker, TestCoordinator, WAIT};

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_first_broker_becomes_leader() {
    let coordinator = TestCoordinator::primary().await;
    let broker = TestBroker::spawn(100, &[&coordinator.url]).await;

    let c = &coordinator;
    let b = &broker;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(100) }).await);
    assert!(wait_until(WAIT, || async move { b.is_leader().await }).await);
    assert!(
        wait_until(WAIT, || async move { b.state.runtime.delivery().is_running() }).await,
        "leader should run the delivery loop"
    );

    let (status, leader) = get_json(&format!("{}/coordinator/leader", coordinator.url)).await;
    assert_eq!(status, 200);
    assert_eq!(leader["id"], 100);
    assert_eq!(leader["isLeader"], true);
}

#[tokio::test]
async fn test_second_broker_joins_as_follower() {
    let coordinator = TestCoordinator::primary().await;
    let first = TestBroker::spawn(100, &[&coordinator.url]).await;

    let c = &coordinator;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(100) }).await);

    let second = TestBroker::spawn(200, &[&coordinator.url]).await;
    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![100, 200] }).await);

    // The registrant learns the leader from its registration reply
    let s = &second;
    assert!(wait_until(WAIT, || async move { s.known_leader().await == Some(100) }).await);
    assert!(!second.is_leader().await);
    assert!(!second.state.runtime.delivery().is_running());

    // Existing members learn about the newcomer from the update-brokers push
    let f = &first;
    assert!(wait_until(WAIT, || async move { f.known_brokers().await == 2 }).await);
    assert!(first.is_leader().await);

    let (status, brokers) = get_json(&format!("{}/coordinator/brokers", coordinator.url)).await;
    assert_eq!(status, 200);
    assert_eq!(brokers.as_array().map(Vec::len), Some(2));

    let (status, listed) = get_json(&format!("{}/broker/brokers-list", second.url)).await;
    assert_eq!(status, 200);
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
}

// ============================================================================
// Failure detection
// ============================================================================

#[tokio::test]
async fn test_leader_failure_elects_highest_remaining_id() {
    let coordinator = TestCoordinator::primary().await;
    let first = TestBroker::spawn(100, &[&coordinator.url]).await;

    let c = &coordinator;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(100) }).await);

    let second = TestBroker::spawn(200, &[&coordinator.url]).await;
    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![100, 200] }).await);

    first.stop().await;

    assert!(
        wait_until(WAIT, || async move { c.broker_ids().await == vec![200] }).await,
        "silent leader should be evicted"
    );
    assert_eq!(coordinator.leader_id().await, Some(200));

    let s = &second;
    assert!(wait_until(WAIT, || async move { s.is_leader().await }).await);
    assert!(
        wait_until(WAIT, || async move { s.state.runtime.delivery().is_running() }).await,
        "promoted broker should start delivering"
    );
}

#[tokio::test]
async fn test_follower_failure_keeps_leader() {
    let coordinator = TestCoordinator::primary().await;
    let leader = TestBroker::spawn(100, &[&coordinator.url]).await;

    let c = &coordinator;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(100) }).await);

    let follower = TestBroker::spawn(50, &[&coordinator.url]).await;
    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![50, 100] }).await);

    follower.stop().await;

    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![100] }).await);
    assert_eq!(coordinator.leader_id().await, Some(100));

    let l = &leader;
    assert!(wait_until(WAIT, || async move { l.known_brokers().await == 1 }).await);
    assert!(leader.is_leader().await);
}

#[tokio::test]
async fn test_restarted_broker_rejoins_as_follower() {
    let coordinator = TestCoordinator::primary().await;
    let first = TestBroker::spawn(300, &[&coordinator.url]).await;

    let c = &coordinator;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(300) }).await);

    let second = TestBroker::spawn(200, &[&coordinator.url]).await;
    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![200, 300] }).await);

    first.stop().await;
    assert!(wait_until(WAIT, || async move { c.leader_id().await == Some(200) }).await);

    // A higher id does not displace a live leader on admission
    let restarted = TestBroker::spawn(300, &[&coordinator.url]).await;
    assert!(wait_until(WAIT, || async move { c.broker_ids().await == vec![200, 300] }).await);
    assert_eq!(coordinator.leader_id().await, Some(200));

    let r = &restarted;
    assert!(wait_until(WAIT, || async move { r.known_leader().await == Some(200) }).await);
    assert!(!restarted.is_leader().await);
    assert!(second.is_leader().await);
}
