//! Test fixtures for integration tests
//!
//! Spawns coordinators and brokers on `127.0.0.1:0`. The listener is bound
//! before the config is built so advertised URLs carry the real port.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sports_notify::broker::server::AppState as BrokerState;
use sports_notify::broker::{BrokerConfig, BrokerServer};
use sports_notify::coordinator::server::AppState as CoordinatorState;
use sports_notify::coordinator::{CoordinatorConfig, CoordinatorRole, CoordinatorServer};

/// Broker heartbeat timeout used by test coordinators
pub const HEARTBEAT_TIMEOUT_MS: u64 = 600;

/// Upper bound for any condition a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Polling
// ============================================================================

/// Poll `condition` every 25ms until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn bind_loopback() -> (TcpListener, String) {
    bind("127.0.0.1:0").await
}

async fn bind(addr: &str) -> (TcpListener, String) {
    let listener = TcpListener::bind(addr).await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

// ============================================================================
// Coordinator
// ============================================================================

/// A coordinator serving on a loopback port
pub struct TestCoordinator {
    pub url: String,
    pub state: CoordinatorState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestCoordinator {
    pub async fn primary() -> Self {
        let (listener, url) = bind_loopback().await;
        Self::spawn(listener, url, CoordinatorRole::Primary, None).await
    }

    /// Fresh primary on the address a stopped coordinator used
    pub async fn primary_at(url: &str) -> Self {
        let (listener, url) = bind(url.trim_start_matches("http://")).await;
        Self::spawn(listener, url, CoordinatorRole::Primary, None).await
    }

    pub async fn secondary(primary_url: &str) -> Self {
        let (listener, url) = bind_loopback().await;
        Self::spawn(listener, url, CoordinatorRole::Secondary, Some(primary_url)).await
    }

    async fn spawn(
        listener: TcpListener,
        url: String,
        role: CoordinatorRole,
        peer_url: Option<&str>,
    ) -> Self {
        let mut builder = CoordinatorConfig::builder()
            .bind_address(listener.local_addr().unwrap())
            .advertised_url(url.clone())
            .role(role)
            .heartbeat_timeout_ms(HEARTBEAT_TIMEOUT_MS)
            .sweep_interval_ms(100)
            .sync_interval_ms(100)
            .request_timeout_ms(500)
            .enable_request_logging(false);
        if let Some(peer) = peer_url {
            builder = builder.peer_url(peer);
        }

        let server = CoordinatorServer::new(builder.build().unwrap()).unwrap();
        let state = server.state();

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let signal = async move {
                let _ = rx.await;
            };
            let _ = server.serve(listener, signal).await;
        });

        Self {
            url,
            state,
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    pub async fn leader_id(&self) -> Option<i32> {
        self.state.registry.leader().await.map(|b| b.id)
    }

    pub async fn broker_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self
            .state
            .registry
            .brokers()
            .await
            .into_iter()
            .map(|b| b.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_primary(&self) -> bool {
        self.state.ha.is_primary().await
    }

    /// Stop serving and wait for background tasks to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// Broker
// ============================================================================

/// A broker serving on a loopback port
pub struct TestBroker {
    pub id: i32,
    pub url: String,
    pub state: BrokerState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestBroker {
    pub async fn spawn(id: i32, coordinator_urls: &[&str]) -> Self {
        let (listener, url) = bind_loopback().await;

        let config = BrokerConfig::builder()
            .bind_address(listener.local_addr().unwrap())
            .connection_url(url.clone())
            .coordinator_urls(coordinator_urls.iter().copied())
            .heartbeat_interval_ms(100)
            .heartbeat_backoff_ms(50)
            .delivery_interval_ms(50)
            .request_timeout_ms(500)
            .enable_request_logging(false)
            .build()
            .unwrap();

        let server = BrokerServer::with_id(config, id).unwrap();
        let state = server.state();

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let signal = async move {
                let _ = rx.await;
            };
            let _ = server.serve(listener, signal).await;
        });

        Self {
            id,
            url,
            state,
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    pub async fn is_leader(&self) -> bool {
        self.state.runtime.membership().is_leader().await
    }

    pub async fn known_leader(&self) -> Option<i32> {
        self.state.runtime.membership().leader().await.map(|b| b.id)
    }

    pub async fn known_brokers(&self) -> usize {
        self.state.runtime.membership().brokers().await.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.service.state().queue_len().await
    }

    pub async fn has_topic(&self, topic: &str) -> bool {
        self.state.service.state().topics().await.contains(topic)
    }

    /// Stop serving and wait for the heartbeat and delivery tasks to end
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

pub fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// POST a JSON body and return the status with the decoded reply
pub async fn post_json(url: &str, body: Value) -> (u16, Value) {
    send(http().post(url).json(&body)).await
}

/// PUT a JSON body and return the status with the decoded reply
pub async fn put_json(url: &str, body: Value) -> (u16, Value) {
    send(http().put(url).json(&body)).await
}

pub async fn get_json(url: &str) -> (u16, Value) {
    send(http().get(url)).await
}

async fn send(request: reqwest::RequestBuilder) -> (u16, Value) {
    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}
