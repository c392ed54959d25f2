//! Membership and leader fan-out to brokers
//!
//! Every push is a separate fire-and-forget dispatch, so one unreachable
//! broker never delays the others or the coordinator's caller. When a leader
//! change and a membership change go out together, the leader notice settles
//! before the membership broadcast starts.

use reqwest::Method;
use tokio::task::JoinHandle;

use crate::models::BrokerNode;
use crate::peer::{settle, PeerClient};

/// Broker endpoint receiving the full membership list
pub const UPDATE_BROKERS_PATH: &str = "/broker/update-brokers";

/// Broker endpoint receiving the elected leader
pub const UPDATE_LEADER_PATH: &str = "/broker/update-leader";

/// Pushes coordinator decisions to brokers
#[derive(Debug, Clone)]
pub struct BrokerNotifier {
    peer: PeerClient,
}

impl BrokerNotifier {
    pub fn new(peer: PeerClient) -> Self {
        Self { peer }
    }

    /// Send `membership` to every broker in it except `skip_id`
    pub fn broadcast_brokers(
        &self,
        membership: &[BrokerNode],
        skip_id: Option<i32>,
    ) -> Vec<JoinHandle<bool>> {
        let recipients: Vec<&BrokerNode> = membership
            .iter()
            .filter(|b| Some(b.id) != skip_id)
            .collect();

        tracing::debug!(
            recipients = recipients.len(),
            members = membership.len(),
            "Broadcasting membership"
        );

        recipients
            .into_iter()
            .filter_map(|broker| {
                self.peer.dispatch(
                    Method::PUT,
                    broker.endpoint(UPDATE_BROKERS_PATH),
                    membership,
                    "update-brokers",
                )
            })
            .collect()
    }

    /// Tell every broker in `recipients` who the leader is
    pub fn announce_leader(
        &self,
        leader: &BrokerNode,
        recipients: &[BrokerNode],
    ) -> Vec<JoinHandle<bool>> {
        tracing::info!(
            leader_id = leader.id,
            recipients = recipients.len(),
            "Announcing leader"
        );

        recipients
            .iter()
            .filter_map(|broker| {
                self.peer.dispatch(
                    Method::PUT,
                    broker.endpoint(UPDATE_LEADER_PATH),
                    leader,
                    "update-leader",
                )
            })
            .collect()
    }

    /// Announce `leader` to `leader_recipients`, then broadcast `membership`
    ///
    /// Runs in the background; resolves to the number of successful pushes.
    pub fn announce_then_broadcast(
        &self,
        leader: Option<BrokerNode>,
        leader_recipients: Vec<BrokerNode>,
        membership: Vec<BrokerNode>,
    ) -> JoinHandle<usize> {
        let notifier = self.clone();

        tokio::spawn(async move {
            let mut delivered = 0;
            if let Some(leader) = &leader {
                delivered += settle(notifier.announce_leader(leader, &leader_recipients)).await;
            }
            delivered + settle(notifier.broadcast_brokers(&membership, None)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::settle;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier() -> BrokerNotifier {
        BrokerNotifier::new(PeerClient::new(Duration::from_millis(500)).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_skips_registrant() {
        let other = MockServer::start().await;
        let registrant = MockServer::start().await;

        let membership = vec![
            BrokerNode::new(1, other.uri(), 1).as_leader(),
            BrokerNode::new(2, registrant.uri(), 2),
        ];

        Mock::given(method("PUT"))
            .and(path(UPDATE_BROKERS_PATH))
            .and(body_json(&membership))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&other)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&registrant)
            .await;

        let delivered = settle(notifier().broadcast_brokers(&membership, Some(2))).await;
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_does_not_block_others() {
        let reachable = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(UPDATE_LEADER_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&reachable)
            .await;

        let leader = BrokerNode::new(9, reachable.uri(), 9).as_leader();
        let recipients = vec![
            BrokerNode::new(3, "http://127.0.0.1:1", 1),
            leader.clone(),
        ];

        let delivered = settle(notifier().announce_leader(&leader, &recipients)).await;
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_leader_notice_settles_before_broadcast() {
        let broker = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(UPDATE_LEADER_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(&broker)
            .await;
        Mock::given(method("PUT"))
            .and(path(UPDATE_BROKERS_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&broker)
            .await;

        let leader = BrokerNode::new(4, broker.uri(), 4).as_leader();
        let handle = notifier().announce_then_broadcast(
            Some(leader.clone()),
            vec![leader.clone()],
            vec![leader],
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let early = broker.received_requests().await.unwrap_or_default();
        assert!(early.iter().all(|r| r.url.path() == UPDATE_LEADER_PATH));

        assert_eq!(handle.await.unwrap(), 2);
        let paths: Vec<_> = broker
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(paths, vec![UPDATE_LEADER_PATH, UPDATE_BROKERS_PATH]);
    }

    #[tokio::test]
    async fn test_no_leader_only_broadcasts() {
        let broker = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(UPDATE_BROKERS_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&broker)
            .await;

        let member = BrokerNode::new(4, broker.uri(), 4);
        let handle = notifier().announce_then_broadcast(None, vec![], vec![member]);
        assert_eq!(handle.await.unwrap(), 1);
    }
}
