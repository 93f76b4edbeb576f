//! Mock broker implementation for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::{
    BrokerConnector, BrokerError, BrokerHandle, BrokerNotification, PublicationAck, Result,
    NOTIFICATION_CAPACITY,
};
use crate::config::ConnectionSettings;

/// A message recorded by `MockHandle::publish`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub publication: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    /// Body decoded as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Mock connector that hands out `MockHandle`s.
#[derive(Default)]
pub struct MockBroker {
    create_calls: AtomicUsize,
    fail_on_create: RwLock<bool>,
    handles: RwLock<Vec<Arc<MockHandle>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        *self.fail_on_create.write().await = fail;
    }

    /// Number of `create` calls, successful or not.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// The most recently created handle.
    pub async fn last_handle(&self) -> Option<Arc<MockHandle>> {
        self.handles.read().await.last().cloned()
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn create(&self, _settings: &ConnectionSettings) -> Result<Arc<dyn BrokerHandle>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_create.read().await {
            return Err(BrokerError::Connection("Mock connect failure".to_string()));
        }
        let handle = Arc::new(MockHandle::new());
        self.handles.write().await.push(handle.clone());
        Ok(handle)
    }
}

/// In-memory broker handle.
pub struct MockHandle {
    published: RwLock<Vec<PublishedMessage>>,
    fail_on_publish: RwLock<bool>,
    reject_deliveries: RwLock<bool>,
    fail_on_shutdown: RwLock<bool>,
    shutdown_calls: AtomicUsize,
    notifier: broadcast::Sender<BrokerNotification>,
}

impl Default for MockHandle {
    fn default() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            published: RwLock::new(Vec::new()),
            fail_on_publish: RwLock::new(false),
            reject_deliveries: RwLock::new(false),
            fail_on_shutdown: RwLock::new(false),
            shutdown_calls: AtomicUsize::new(0),
            notifier,
        }
    }
}

impl MockHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Accept publishes but report a late delivery failure on the ack.
    pub async fn set_reject_deliveries(&self, reject: bool) {
        *self.reject_deliveries.write().await = reject;
    }

    pub async fn set_fail_on_shutdown(&self, fail: bool) {
        *self.fail_on_shutdown.write().await = fail;
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Emit a lifecycle notification to all watchers.
    pub fn notify(&self, notification: BrokerNotification) {
        let _ = self.notifier.send(notification);
    }
}

#[async_trait]
impl BrokerHandle for MockHandle {
    async fn publish(&self, publication: &str, body: Vec<u8>) -> Result<PublicationAck> {
        if *self.fail_on_publish.read().await {
            return Err(BrokerError::Publish("Mock publish failure".to_string()));
        }
        self.published.write().await.push(PublishedMessage {
            publication: publication.to_string(),
            body,
        });

        if *self.reject_deliveries.read().await {
            return Ok(PublicationAck::new(async {
                Err(BrokerError::Publish("Mock delivery rejected".to_string()))
            }));
        }
        Ok(PublicationAck::confirmed())
    }

    fn notifications(&self) -> broadcast::Receiver<BrokerNotification> {
        self.notifier.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_shutdown.read().await {
            return Err(BrokerError::Shutdown("Mock shutdown failure".to_string()));
        }
        Ok(())
    }
}
