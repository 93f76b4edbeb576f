//! Connect/publish/transform/shutdown lifecycle coordinator.
//!
//! `Bridge` owns the broker handle. It subscribes one handler per configured
//! event; each occurrence is transformed and, unless suppressed, published
//! under the event name. Connection state and handle live in a single
//! `ConnectionState` so readers never see a flag that disagrees with the handle.

use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{
    same_handle, BrokerConnector, BrokerError, BrokerHandle, BrokerNotification,
};
use crate::config::{ConfigError, ConnectionSettings};
use crate::context::AppContext;
use crate::events::{EventError, EventHandler, EventPayload};
use crate::transform::{TransformerEntry, TransformerMap};

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Event(#[from] EventError),
}

/// Connection state combining liveness and handle ownership.
#[derive(Clone, Default)]
pub enum ConnectionState {
    /// No handle. Initial state, and the state after `close()`.
    #[default]
    Disconnected,
    /// Live handle.
    Connected(Arc<dyn BrokerHandle>),
    /// The broker reported an error or disconnect; the handle is retained
    /// until `close()` or a successful reconnect replaces it.
    Lost(Arc<dyn BrokerHandle>),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn handle(&self) -> Option<&Arc<dyn BrokerHandle>> {
        match self {
            Self::Disconnected => None,
            Self::Connected(handle) | Self::Lost(handle) => Some(handle),
        }
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connected(_) => f.write_str("Connected"),
            Self::Lost(_) => f.write_str("Lost"),
        }
    }
}

/// Lifecycle coordinator between the event service and the broker.
///
/// Cheap to clone; clones share the same connection state.
#[derive(Clone)]
pub struct Bridge {
    connector: Arc<dyn BrokerConnector>,
    settings: Arc<ConnectionSettings>,
    transformers: Arc<TransformerMap>,
    ctx: AppContext,
    state: Arc<RwLock<ConnectionState>>,
    /// Serialises `connect()` so concurrent callers create at most one handle.
    connecting: Arc<Mutex<()>>,
    /// Notification watcher for the current handle.
    watcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Bridge {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        settings: ConnectionSettings,
        transformers: TransformerMap,
        ctx: AppContext,
    ) -> Self {
        Self {
            connector,
            settings: Arc::new(settings),
            transformers: Arc::new(transformers),
            ctx,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connecting: Arc::new(Mutex::new(())),
            watcher: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect to the broker.
    ///
    /// No-op when already connected. Failure is logged and leaves the bridge
    /// usable; a later call may succeed.
    pub async fn connect(&self) {
        let _guard = self.connecting.lock().await;

        if self.state.read().await.is_connected() {
            info!("Already connected to RabbitMQ");
            return;
        }

        let handle = match self.connector.create(&self.settings).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Error connecting to RabbitMQ");
                return;
            }
        };

        let notifications = handle.notifications();
        let previous = std::mem::replace(
            &mut *self.state.write().await,
            ConnectionState::Connected(handle.clone()),
        );
        let watcher = self.watch_notifications(&handle, notifications);
        if let Some(stale) = self.watcher.lock().await.replace(watcher) {
            stale.abort();
        }
        info!(app = %self.ctx.name(), "Connected to RabbitMQ");

        if let Some(stale) = previous.handle() {
            if let Err(e) = stale.shutdown().await {
                warn!(error = %e, "Failed to shut down previous broker handle");
            }
        }
    }

    /// Track error/disconnect notifications for `handle` while it is current.
    ///
    /// The task holds only a weak reference so it never keeps the handle alive.
    fn watch_notifications(
        &self,
        handle: &Arc<dyn BrokerHandle>,
        mut notifications: broadcast::Receiver<BrokerNotification>,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let watched: Weak<dyn BrokerHandle> = Arc::downgrade(handle);
        tokio::spawn(async move {
            loop {
                let notification = match notifications.recv().await {
                    Ok(notification) => notification,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Broker notification watcher lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let mut current = state.write().await;
                let Some(handle) = current
                    .handle()
                    .filter(|h| same_handle(&watched, h))
                    .cloned()
                else {
                    break;
                };

                match notification {
                    BrokerNotification::Error(reason) => {
                        error!(error = %reason, "RabbitMQ broker error");
                    }
                    BrokerNotification::Disconnect(reason) => {
                        warn!(reason = %reason, "RabbitMQ broker disconnected");
                    }
                }
                *current = ConnectionState::Lost(handle);
            }
        })
    }

    /// Serialise `message` as JSON and publish it under `routing_key`.
    ///
    /// Never fails outward: every error is logged and the message dropped.
    /// Returns the delivery watcher when the broker accepted the message; it
    /// completes once the broker settles delivery.
    pub async fn publish_message<T>(
        &self,
        routing_key: &str,
        message: &T,
    ) -> Option<JoinHandle<()>>
    where
        T: Serialize + ?Sized,
    {
        let Some(handle) = self.broker().await else {
            error!(
                routing_key = %routing_key,
                error = %BrokerError::NotConnected,
                "Error publishing message"
            );
            return None;
        };

        let body = match serde_json::to_vec(message).map_err(BrokerError::from) {
            Ok(body) => body,
            Err(e) => {
                error!(routing_key = %routing_key, error = %e, "Error serializing message");
                return None;
            }
        };

        match handle.publish(routing_key, body).await {
            Ok(ack) => {
                debug!(routing_key = %routing_key, "Message published");
                let key = routing_key.to_string();
                Some(ack.on_error(move |e| {
                    error!(routing_key = %key, error = %e, "Publication error");
                }))
            }
            Err(e) => {
                error!(routing_key = %routing_key, error = %e, "Error publishing message");
                None
            }
        }
    }

    /// Subscribe one bridging handler per transformer entry.
    ///
    /// Returns the number of subscriptions registered.
    pub async fn start(&self) -> Result<usize, BridgeError> {
        for (event, entry) in self.transformers.iter() {
            let handler = Arc::new(BridgeHandler {
                bridge: self.clone(),
                event: event.clone(),
                entry: entry.clone(),
            });
            self.ctx.events().subscribe(event, handler).await?;
            debug!(event = %event, routing_key = %entry.routing_key, "Bridging event");
        }

        info!(count = self.transformers.len(), "Subscribed to bridged events");
        Ok(self.transformers.len())
    }

    /// Transform one occurrence and publish the result.
    async fn bridge_occurrence(
        &self,
        event: &str,
        entry: &TransformerEntry,
        payload: Option<EventPayload>,
    ) {
        let Some(payload) = payload else {
            debug!(event = %event, "No payload received for event");
            return;
        };

        let transformed = match entry
            .transformer
            .transform(payload.into_data(), &self.ctx)
            .await
        {
            Ok(transformed) => transformed,
            Err(e) => {
                error!(
                    event = %event,
                    error = %e,
                    "Error transforming payload for event {}: {}",
                    event,
                    e
                );
                return;
            }
        };

        match transformed.filter(|value| !value.is_null()) {
            Some(message) if self.broker().await.is_some() => {
                self.publish_message(event, &message).await;
            }
            _ => debug!(event = %event, "No payload to publish"),
        }
    }

    /// Close the broker handle. No-op when there is none.
    ///
    /// The handle is cleared even if shutdown fails, so repeated calls are safe.
    pub async fn close(&self) -> Result<(), BridgeError> {
        let mut state = self.state.write().await;
        let Some(handle) = state.handle().cloned() else {
            debug!("No RabbitMQ connection to close");
            return Ok(());
        };

        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.abort();
        }
        let result = handle.shutdown().await;
        *state = ConnectionState::Disconnected;
        result?;

        info!("RabbitMQ connection closed");
        Ok(())
    }

    /// Current broker handle, possibly one whose connection was lost.
    ///
    /// Callers must not shut it down; use `close()`.
    pub async fn broker(&self) -> Option<Arc<dyn BrokerHandle>> {
        self.state.read().await.handle().cloned()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    /// Snapshot of the connection state.
    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub fn transformers(&self) -> &TransformerMap {
        &self.transformers
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Event handler bridging one event name to the broker.
struct BridgeHandler {
    bridge: Bridge,
    event: String,
    entry: TransformerEntry,
}

impl EventHandler for BridgeHandler {
    fn handle(&self, payload: Option<EventPayload>) -> BoxFuture<'static, Result<(), EventError>> {
        let bridge = self.bridge.clone();
        let event = self.event.clone();
        let entry = self.entry.clone();
        Box::pin(async move {
            bridge.bridge_occurrence(&event, &entry, payload).await;
            Ok(())
        })
    }
}
