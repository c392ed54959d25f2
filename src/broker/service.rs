//! Role-gated pub/sub operations
//!
//! Client writes are served by the leader only; followers refuse them with
//! [`BrokerError::NotLeader`] carrying the leader's URL. Replication pushes
//! are accepted by followers only. Reads are served in either role.

use std::sync::Arc;

use crate::metrics;
use crate::models::{
    BrokerNode, MessageEnvelope, MessageQueue, Publisher, Subscriber, TopicSet,
    TopicSubscriptionIndex,
};

use super::error::BrokerError;
use super::membership::Membership;
use super::replication::{Collection, Replicator};
use super::state::{PubSubState, SubscriberRegistration};

/// Pub/sub operations of one broker
#[derive(Debug, Clone)]
pub struct BrokerService {
    state: Arc<PubSubState>,
    membership: Arc<Membership>,
    replicator: Replicator,
}

impl BrokerService {
    pub fn new(
        state: Arc<PubSubState>,
        membership: Arc<Membership>,
        replicator: Replicator,
    ) -> Self {
        Self {
            state,
            membership,
            replicator,
        }
    }

    pub fn state(&self) -> &Arc<PubSubState> {
        &self.state
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    async fn ensure_leader(&self) -> Result<(), BrokerError> {
        if self.membership.is_leader().await {
            Ok(())
        } else {
            Err(BrokerError::NotLeader {
                leader_url: self.membership.leader_url().await,
            })
        }
    }

    async fn ensure_follower(&self) -> Result<(), BrokerError> {
        if self.membership.is_leader().await {
            Err(BrokerError::NotFollower)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Client operations (leader only)
    // ========================================================================

    /// Register a publisher; returns false when already known
    pub async fn register_publisher(&self, publisher: Publisher) -> Result<bool, BrokerError> {
        self.ensure_leader().await?;
        let added = self.state.register_publisher(publisher).await?;
        if added {
            tracing::info!("Publisher registered");
        }
        Ok(added)
    }

    /// Register a subscriber and replicate the subscriber registry
    pub async fn register_subscriber(
        &self,
        subscriber: Subscriber,
    ) -> Result<SubscriberRegistration, BrokerError> {
        self.ensure_leader().await?;
        let url = subscriber.connection_url.clone();
        let registration = self.state.register_subscriber(subscriber).await?;

        if let SubscriberRegistration::Registered(_) = &registration {
            tracing::info!(subscriber = %url, "Subscriber registered");
            self.replicator.replicate(&[Collection::Subscribers]).await;
        }

        Ok(registration)
    }

    /// Subscribe to a topic and replicate the index
    pub async fn subscribe(&self, subscriber: Subscriber) -> Result<(), BrokerError> {
        self.ensure_leader().await?;
        self.state.subscribe(subscriber).await?;
        self.replicator.replicate(&[Collection::Index]).await;
        Ok(())
    }

    /// Unsubscribe from a topic and replicate the index
    pub async fn unsubscribe(&self, subscriber: Subscriber) -> Result<(), BrokerError> {
        self.ensure_leader().await?;
        self.state.unsubscribe(&subscriber).await?;
        self.replicator.replicate(&[Collection::Index]).await;
        Ok(())
    }

    /// Enqueue an envelope, replicating the topic set when the topic is new
    /// and then the queue
    pub async fn publish(
        &self,
        envelope: MessageEnvelope,
    ) -> Result<MessageEnvelope, BrokerError> {
        self.ensure_leader().await?;
        let outcome = self.state.publish(envelope).await?;

        if outcome.new_topics.is_some() {
            tracing::info!(topic = %outcome.envelope.topic, "New topic");
            self.replicator
                .replicate(&[Collection::Topics, Collection::Queue])
                .await;
        } else {
            self.replicator.replicate(&[Collection::Queue]).await;
        }

        metrics::record_publish(&outcome.envelope.topic, outcome.queue.len());
        tracing::debug!(
            topic = %outcome.envelope.topic,
            message_id = ?outcome.envelope.message_id,
            queue = outcome.queue.len(),
            "Message queued"
        );

        Ok(outcome.envelope)
    }

    // ========================================================================
    // Reads (any role)
    // ========================================================================

    pub async fn topics_for(&self, subscriber_url: &str) -> Result<TopicSet, BrokerError> {
        self.state.topics_for(subscriber_url).await
    }

    pub async fn brokers(&self) -> Vec<BrokerNode> {
        self.membership.brokers().await
    }

    // ========================================================================
    // Replication (followers only)
    // ========================================================================

    pub async fn apply_replicated_subscribers(
        &self,
        subscribers: Vec<Subscriber>,
    ) -> Result<(), BrokerError> {
        self.ensure_follower().await?;
        self.state.replace_subscribers(subscribers).await;
        Ok(())
    }

    pub async fn apply_replicated_topics(&self, topics: TopicSet) -> Result<(), BrokerError> {
        self.ensure_follower().await?;
        self.state.replace_topics(topics).await;
        Ok(())
    }

    pub async fn apply_replicated_index(
        &self,
        index: TopicSubscriptionIndex,
    ) -> Result<(), BrokerError> {
        self.ensure_follower().await?;
        self.state.replace_index(index).await;
        Ok(())
    }

    pub async fn apply_replicated_queue(&self, queue: MessageQueue) -> Result<(), BrokerError> {
        self.ensure_follower().await?;
        self.state.replace_queue(queue).await;
        Ok(())
    }
}
