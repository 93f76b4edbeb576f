//! Broker client seam.
//!
//! This module contains:
//! - `BrokerConnector` trait: creates a live broker handle from connection settings
//! - `BrokerHandle` trait: publish, lifecycle notifications, shutdown
//! - `PublicationAck`: late delivery outcome of a single publish
//! - Implementations: AMQP (RabbitMQ via lapin), Mock

use std::future::Future;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ConnectionSettings;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::{AmqpConnector, AmqpHandle};
pub use mock::{MockBroker, MockHandle, PublishedMessage};

/// Capacity of the per-handle notification channel.
pub const NOTIFICATION_CAPACITY: usize = 16;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Unknown publication '{0}'")]
    UnknownPublication(String),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Asynchronous lifecycle notification emitted by a broker handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerNotification {
    /// The broker reported an error on the connection.
    Error(String),
    /// The connection to the broker was lost.
    Disconnect(String),
}

/// Outcome of a publish after the broker accepted the message.
///
/// The broker may still reject delivery later (e.g. a publisher-confirm nack).
pub struct PublicationAck {
    outcome: BoxFuture<'static, Result<()>>,
}

impl PublicationAck {
    /// Wrap a future that resolves once the broker settles delivery.
    pub fn new<F>(outcome: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            outcome: Box::pin(outcome),
        }
    }

    /// Acknowledgment for a message already known to be delivered.
    pub fn confirmed() -> Self {
        Self::new(async { Ok(()) })
    }

    /// Wait for the delivery outcome.
    pub async fn outcome(self) -> Result<()> {
        self.outcome.await
    }

    /// Invoke `callback` if delivery fails later.
    ///
    /// Spawns a watcher task; the returned handle completes once the outcome
    /// is known.
    pub fn on_error<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(BrokerError) + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = self.outcome.await {
                callback(e);
            }
        })
    }
}

impl std::fmt::Debug for PublicationAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicationAck").finish_non_exhaustive()
    }
}

/// Live connection/session returned by a connector.
#[async_trait]
pub trait BrokerHandle: Send + Sync {
    /// Publish a message body through the named publication.
    async fn publish(&self, publication: &str, body: Vec<u8>) -> Result<PublicationAck>;

    /// Subscribe to lifecycle notifications for this handle.
    fn notifications(&self) -> broadcast::Receiver<BrokerNotification>;

    /// Close every connection held by this handle.
    async fn shutdown(&self) -> Result<()>;
}

/// Creates broker handles.
///
/// Implementations:
/// - `AmqpConnector`: RabbitMQ via lapin
/// - `MockBroker`: In-memory mock for testing
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect using the given settings, declaring whatever topology they describe.
    async fn create(&self, settings: &ConnectionSettings) -> Result<Arc<dyn BrokerHandle>>;
}

/// Whether `watched` refers to the same allocation as `handle`.
pub(crate) fn same_handle(
    watched: &Weak<dyn BrokerHandle>,
    handle: &Arc<dyn BrokerHandle>,
) -> bool {
    Weak::ptr_eq(watched, &Arc::downgrade(handle))
}
