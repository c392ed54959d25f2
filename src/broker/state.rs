//! Replicated pub/sub state
//!
//! Four collections are replicated between brokers: the subscriber registry,
//! the topic set, the topic to subscriber index and the message queue. Each
//! sits behind its own lock; operations are atomic per collection and there
//! is no transaction spanning two of them. Mutations return a snapshot of
//! the collection they changed so the caller can replicate it.
//!
//! Replication is whole-structure overwrite: the `replace_*` methods drop
//! the local copy and adopt the received one.

use tokio::sync::{Mutex, RwLock};

use crate::models::{
    MessageEnvelope, MessageQueue, Publisher, Subscriber, TopicSet, TopicSubscriptionIndex,
};

use super::error::BrokerError;

/// Result of a subscriber registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberRegistration {
    /// Newly added; carries the full registry for replication
    Registered(Vec<Subscriber>),

    /// A subscriber with the same connection URL already exists
    AlreadyRegistered,
}

/// Result of an accepted publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The envelope as queued
    pub envelope: MessageEnvelope,

    /// Full topic set, present only when the topic was new
    pub new_topics: Option<TopicSet>,

    /// Full queue after the append
    pub queue: MessageQueue,
}

/// In-memory pub/sub collections of one broker
#[derive(Debug, Default)]
pub struct PubSubState {
    topics: RwLock<TopicSet>,
    index: RwLock<TopicSubscriptionIndex>,
    subscribers: RwLock<Vec<Subscriber>>,
    publishers: RwLock<Vec<Publisher>>,
    queue: Mutex<MessageQueue>,
}

fn require(value: &str, field: &str) -> Result<(), BrokerError> {
    if value.trim().is_empty() {
        Err(BrokerError::validation(format!("{} is required", field)))
    } else {
        Ok(())
    }
}

impl PubSubState {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Registries
    // ------------------------------------------------------------------

    /// Add a publisher; returns false when its URL was already known
    pub async fn register_publisher(&self, publisher: Publisher) -> Result<bool, BrokerError> {
        require(&publisher.connection_url, "connectionUrl")?;

        let mut publishers = self.publishers.write().await;
        if publishers
            .iter()
            .any(|p| p.connection_url == publisher.connection_url)
        {
            return Ok(false);
        }

        publishers.push(publisher);
        Ok(true)
    }

    /// Add a subscriber, de-duplicated by connection URL
    pub async fn register_subscriber(
        &self,
        subscriber: Subscriber,
    ) -> Result<SubscriberRegistration, BrokerError> {
        require(&subscriber.connection_url, "connectionUrl")?;

        let mut subscribers = self.subscribers.write().await;
        if subscribers
            .iter()
            .any(|s| s.connection_url == subscriber.connection_url)
        {
            return Ok(SubscriberRegistration::AlreadyRegistered);
        }

        subscribers.push(subscriber);
        Ok(SubscriberRegistration::Registered(subscribers.clone()))
    }

    /// Whether a subscriber with this URL is registered
    pub async fn is_subscriber_valid(&self, connection_url: &str) -> bool {
        self.subscribers
            .read()
            .await
            .iter()
            .any(|s| s.connection_url == connection_url)
    }

    async fn authorize(&self, subscriber: &Subscriber) -> Result<(), BrokerError> {
        require(&subscriber.connection_url, "connectionUrl")?;
        if self.is_subscriber_valid(&subscriber.connection_url).await {
            Ok(())
        } else {
            Err(BrokerError::UnknownSubscriber(
                subscriber.connection_url.clone(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Append a registered subscriber to its topic's list
    ///
    /// A subscriber already on the list is not appended twice. Returns the
    /// full index for replication.
    pub async fn subscribe(
        &self,
        subscriber: Subscriber,
    ) -> Result<TopicSubscriptionIndex, BrokerError> {
        self.authorize(&subscriber).await?;
        let topic = subscriber.topic.clone().unwrap_or_default();
        require(&topic, "topic")?;

        let mut index = self.index.write().await;
        let list = index.entry(topic).or_default();
        if !list
            .iter()
            .any(|s| s.connection_url == subscriber.connection_url)
        {
            list.push(subscriber);
        }

        Ok(index.clone())
    }

    /// Remove the first entry with the subscriber's URL from its topic's list
    ///
    /// Returns the full index whether or not anything was removed.
    pub async fn unsubscribe(
        &self,
        subscriber: &Subscriber,
    ) -> Result<TopicSubscriptionIndex, BrokerError> {
        self.authorize(subscriber).await?;
        let topic = subscriber.topic.clone().unwrap_or_default();

        let mut index = self.index.write().await;
        if let Some(list) = index.get_mut(&topic) {
            if let Some(pos) = list
                .iter()
                .position(|s| s.connection_url == subscriber.connection_url)
            {
                list.remove(pos);
            }
        }

        Ok(index.clone())
    }

    /// Subscribers of a topic in subscription order
    pub async fn subscribers_of(&self, topic: &str) -> Vec<Subscriber> {
        self.index
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Publishing and the queue
    // ------------------------------------------------------------------

    /// Validate and enqueue an envelope
    pub async fn publish(
        &self,
        mut envelope: MessageEnvelope,
    ) -> Result<PublishOutcome, BrokerError> {
        require(&envelope.topic, "topic")?;
        require(&envelope.payload, "message")?;

        if envelope.timestamp.is_none() {
            envelope.timestamp = Some(chrono::Utc::now().to_rfc3339());
        }

        let new_topics = {
            let mut topics = self.topics.write().await;
            if topics.insert(envelope.topic.clone()) {
                Some(topics.clone())
            } else {
                None
            }
        };

        let queue = {
            let mut queue = self.queue.lock().await;
            queue.push_back(envelope.clone());
            queue.clone()
        };

        Ok(PublishOutcome {
            envelope,
            new_topics,
            queue,
        })
    }

    /// Head of the queue without removing it
    pub async fn peek(&self) -> Option<MessageEnvelope> {
        self.queue.lock().await.front().cloned()
    }

    /// Pop the head if it is still `envelope`
    ///
    /// Returns the remaining queue, or `None` when the head changed since it
    /// was peeked (for example after a replication overwrite).
    pub async fn pop_delivered(&self, envelope: &MessageEnvelope) -> Option<MessageQueue> {
        let mut queue = self.queue.lock().await;
        if queue.front() != Some(envelope) {
            return None;
        }

        queue.pop_front();
        Some(queue.clone())
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn topics(&self) -> TopicSet {
        self.topics.read().await.clone()
    }

    /// Topic set, visible only to registered subscribers
    pub async fn topics_for(&self, subscriber_url: &str) -> Result<TopicSet, BrokerError> {
        require(subscriber_url, "subscriberConnectionURL")?;
        if !self.is_subscriber_valid(subscriber_url).await {
            return Err(BrokerError::UnknownSubscriber(subscriber_url.to_string()));
        }
        Ok(self.topics().await)
    }

    pub async fn index(&self) -> TopicSubscriptionIndex {
        self.index.read().await.clone()
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        self.subscribers.read().await.clone()
    }

    pub async fn publishers(&self) -> Vec<Publisher> {
        self.publishers.read().await.clone()
    }

    pub async fn queue(&self) -> MessageQueue {
        self.queue.lock().await.clone()
    }

    // ------------------------------------------------------------------
    // Replication overwrite
    // ------------------------------------------------------------------

    pub async fn replace_topics(&self, topics: TopicSet) {
        *self.topics.write().await = topics;
    }

    pub async fn replace_index(&self, index: TopicSubscriptionIndex) {
        *self.index.write().await = index;
    }

    pub async fn replace_subscribers(&self, subscribers: Vec<Subscriber>) {
        *self.subscribers.write().await = subscribers;
    }

    pub async fn replace_queue(&self, queue: MessageQueue) {
        *self.queue.lock().await = queue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: &str = "http://sub:9000";

    #[tokio::test]
    async fn test_register_subscriber_is_idempotent() {
        let state = PubSubState::new();

        let first = state.register_subscriber(Subscriber::new(SUB)).await.unwrap();
        assert!(matches!(first, SubscriberRegistration::Registered(ref list) if list.len() == 1));

        let second = state.register_subscriber(Subscriber::new(SUB)).await.unwrap();
        assert_eq!(second, SubscriberRegistration::AlreadyRegistered);
        assert_eq!(state.subscribers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_connection_url_rejected() {
        let state = PubSubState::new();

        assert!(matches!(
            state.register_subscriber(Subscriber::new("")).await,
            Err(BrokerError::Validation(_))
        ));
        assert!(matches!(
            state.register_publisher(Publisher::new(" ")).await,
            Err(BrokerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_register_publisher_dedups() {
        let state = PubSubState::new();
        assert!(state.register_publisher(Publisher::new("http://p:1")).await.unwrap());
        assert!(!state.register_publisher(Publisher::new("http://p:1")).await.unwrap());
        assert_eq!(state.publishers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_requires_registration() {
        let state = PubSubState::new();
        let subscriber = Subscriber::new(SUB).with_topic("nba");

        assert_eq!(
            state.subscribe(subscriber.clone()).await.unwrap_err(),
            BrokerError::UnknownSubscriber(SUB.to_string())
        );

        state.register_subscriber(Subscriber::new(SUB)).await.unwrap();
        let index = state.subscribe(subscriber.clone()).await.unwrap();
        assert_eq!(index["nba"], vec![subscriber.clone()]);

        // Second subscribe does not duplicate the entry
        let index = state.subscribe(subscriber).await.unwrap();
        assert_eq!(index["nba"].len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_first_match() {
        let state = PubSubState::new();
        state.register_subscriber(Subscriber::new(SUB)).await.unwrap();
        state
            .register_subscriber(Subscriber::new("http://other:9000"))
            .await
            .unwrap();
        state.subscribe(Subscriber::new(SUB).with_topic("nba")).await.unwrap();
        state
            .subscribe(Subscriber::new("http://other:9000").with_topic("nba"))
            .await
            .unwrap();

        let index = state
            .unsubscribe(&Subscriber::new(SUB).with_topic("nba"))
            .await
            .unwrap();
        assert_eq!(index["nba"].len(), 1);
        assert_eq!(index["nba"][0].connection_url, "http://other:9000");

        // Nothing to remove still succeeds
        let index = state
            .unsubscribe(&Subscriber::new(SUB).with_topic("nfl"))
            .await
            .unwrap();
        assert!(!index.contains_key("nfl"));
    }

    #[tokio::test]
    async fn test_publish_validates_and_reports_new_topic() {
        let state = PubSubState::new();

        assert!(state.publish(MessageEnvelope::new("", "x")).await.is_err());
        assert!(state.publish(MessageEnvelope::new("nba", "")).await.is_err());

        let first = state
            .publish(MessageEnvelope::new("nba", "tip-off").with_message_id(1))
            .await
            .unwrap();
        assert_eq!(first.new_topics.unwrap().len(), 1);
        assert_eq!(first.queue.len(), 1);
        assert!(first.envelope.timestamp.is_some());

        let second = state
            .publish(MessageEnvelope::new("nba", "buzzer").with_message_id(2))
            .await
            .unwrap();
        assert!(second.new_topics.is_none());
        assert_eq!(second.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_peek_and_pop_in_fifo_order() {
        let state = PubSubState::new();
        state.publish(MessageEnvelope::new("nba", "m1")).await.unwrap();
        state.publish(MessageEnvelope::new("nba", "m2")).await.unwrap();

        let head = state.peek().await.unwrap();
        assert_eq!(head.payload, "m1");
        assert_eq!(state.queue_len().await, 2);

        let rest = state.pop_delivered(&head).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(state.peek().await.unwrap().payload, "m2");

        // Popping a stale head is refused
        assert!(state.pop_delivered(&head).await.is_none());
    }

    #[tokio::test]
    async fn test_replace_is_overwrite_not_merge() {
        let state = PubSubState::new();
        state.publish(MessageEnvelope::new("nba", "m1")).await.unwrap();

        state.replace_topics(TopicSet::new()).await;
        state.replace_queue(MessageQueue::new()).await;

        assert!(state.topics().await.is_empty());
        assert_eq!(state.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_topics_visible_only_to_registered_subscribers() {
        let state = PubSubState::new();
        state.publish(MessageEnvelope::new("nba", "m1")).await.unwrap();

        assert!(matches!(
            state.topics_for(SUB).await,
            Err(BrokerError::UnknownSubscriber(_))
        ));

        state.register_subscriber(Subscriber::new(SUB)).await.unwrap();
        assert!(state.topics_for(SUB).await.unwrap().contains("nba"));
    }
}
