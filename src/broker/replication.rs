//! Whole-structure replication from the leader to its followers
//!
//! Every follower gets its own link: a background task that sends one
//! request at a time, so overwrites reach a follower in the order the leader
//! made them. Callers only mark which collections changed. The link reads
//! the current value of each marked collection when it sends, which
//! coalesces bursts of mutations into one push carrying the latest state.
//! Followers overwrite their copy on receipt; nothing is acknowledged or
//! retried.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::metrics;
use crate::models::join_url;
use crate::peer::{PeerClient, PeerError};

use super::membership::Membership;
use super::state::PubSubState;

pub const REPLICATE_SUBSCRIBERS_PATH: &str = "/broker/replicatesubscribers";
pub const REPLICATE_TOPICS_PATH: &str = "/broker/replicatetopics";
pub const REPLICATE_INDEX_PATH: &str = "/broker/replicatetopicstosubscribers";
pub const REPLICATE_MESSAGES_PATH: &str = "/broker/replicatemessages";

/// A replicated collection
///
/// The declaration order is the send order within one pass: a new topic
/// reaches a follower before the queue that references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Subscribers,
    Topics,
    Index,
    Queue,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Subscribers,
        Collection::Topics,
        Collection::Index,
        Collection::Queue,
    ];

    /// Follower route that accepts this collection
    pub fn path(self) -> &'static str {
        match self {
            Self::Subscribers => REPLICATE_SUBSCRIBERS_PATH,
            Self::Topics => REPLICATE_TOPICS_PATH,
            Self::Index => REPLICATE_INDEX_PATH,
            Self::Queue => REPLICATE_MESSAGES_PATH,
        }
    }

    /// Label used in logs and metrics
    pub fn kind(self) -> &'static str {
        match self {
            Self::Subscribers => "replicate-subscribers",
            Self::Topics => "replicate-topics",
            Self::Index => "replicate-index",
            Self::Queue => "replicate-messages",
        }
    }
}

type Pending = Arc<Mutex<BTreeSet<Collection>>>;

/// Ordered sender towards one follower
#[derive(Debug)]
struct FollowerLink {
    pending: Pending,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl FollowerLink {
    fn spawn(url: String, peer: PeerClient, state: Arc<PubSubState>) -> Self {
        let pending = Pending::default();
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run_link(url, peer, state, pending.clone(), wake.clone()));

        Self {
            pending,
            wake,
            task,
        }
    }

    async fn mark(&self, collections: &[Collection]) {
        self.pending.lock().await.extend(collections.iter().copied());
        self.wake.notify_one();
    }
}

impl Drop for FollowerLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_link(
    url: String,
    peer: PeerClient,
    state: Arc<PubSubState>,
    pending: Pending,
    wake: Arc<Notify>,
) {
    loop {
        wake.notified().await;

        let batch = std::mem::take(&mut *pending.lock().await);
        for collection in batch {
            let target = join_url(&url, collection.path());
            match send(&peer, &state, collection, &target).await {
                Ok(()) => {
                    tracing::debug!(kind = collection.kind(), url = %target, "Replicated");
                }
                Err(e) => {
                    tracing::warn!(
                        kind = collection.kind(),
                        url = %target,
                        error = %e,
                        "Replication push failed"
                    );
                    metrics::record_dispatch_failure(collection.kind());
                }
            }
        }
    }
}

async fn send(
    peer: &PeerClient,
    state: &PubSubState,
    collection: Collection,
    url: &str,
) -> Result<(), PeerError> {
    match collection {
        Collection::Subscribers => peer.post_json(url, &state.subscribers().await).await?,
        Collection::Topics => peer.post_json(url, &state.topics().await).await?,
        Collection::Index => peer.post_json(url, &state.index().await).await?,
        Collection::Queue => peer.post_json(url, &state.queue().await).await?,
    };
    Ok(())
}

#[derive(Debug)]
struct ReplicatorInner {
    peer: PeerClient,
    membership: Arc<Membership>,
    state: Arc<PubSubState>,
    links: Mutex<HashMap<String, FollowerLink>>,
}

/// Pushes replicated collections to followers
#[derive(Debug, Clone)]
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
}

impl Replicator {
    pub fn new(peer: PeerClient, membership: Arc<Membership>, state: Arc<PubSubState>) -> Self {
        Self {
            inner: Arc::new(ReplicatorInner {
                peer,
                membership,
                state,
                links: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedule a push of `collections` to every current follower
    ///
    /// Returns the number of followers scheduled. Links of brokers that are
    /// no longer followers are closed.
    pub async fn replicate(&self, collections: &[Collection]) -> usize {
        let followers = self.inner.membership.followers().await;
        let mut links = self.inner.links.lock().await;

        links.retain(|url, _| followers.iter().any(|f| &f.connection_url == url));
        if followers.is_empty() {
            return 0;
        }

        tracing::debug!(
            collections = ?collections,
            followers = followers.len(),
            "Replicating to followers"
        );

        for follower in &followers {
            let link = links
                .entry(follower.connection_url.clone())
                .or_insert_with(|| {
                    FollowerLink::spawn(
                        follower.connection_url.clone(),
                        self.inner.peer.clone(),
                        self.inner.state.clone(),
                    )
                });
            link.mark(collections).await;
        }

        followers.len()
    }
}
