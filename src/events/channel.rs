//! In-memory channel-based event service.
//!
//! Uses a tokio broadcast channel for pub/sub within a single process. Each
//! subscription runs a consumer task that filters occurrences by event name
//! and spawns the handler per occurrence, so occurrences never wait on one
//! another.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{EventHandler, EventPayload, EventService, Result};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Occurrence {
    event: String,
    payload: Option<Value>,
}

/// In-process event service using tokio broadcast channels.
pub struct ChannelEventService {
    sender: broadcast::Sender<Arc<Occurrence>>,
    /// Consumer tasks per event name.
    subscriptions: RwLock<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl Default for ChannelEventService {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelEventService {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Emit one occurrence of `event`.
    ///
    /// Returns the number of consumers that received it; zero is not an error.
    pub fn emit(&self, event: &str, payload: Option<Value>) -> usize {
        let occurrence = Arc::new(Occurrence {
            event: event.to_string(),
            payload,
        });
        match self.sender.send(occurrence) {
            Ok(receivers) => {
                debug!(event = %event, receivers, "Emitted event");
                receivers
            }
            Err(_) => {
                debug!(event = %event, "Emitted event (no receivers)");
                0
            }
        }
    }

    /// Number of handlers registered for `event`.
    pub async fn subscription_count(&self, event: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventService for ChannelEventService {
    async fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        // Receiver is created before returning so nothing emitted afterwards is missed.
        let mut receiver = self.sender.subscribe();
        let name = event.to_string();

        let consumer = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(occurrence) => {
                        if occurrence.event != name {
                            continue;
                        }
                        let payload = occurrence.payload.clone().map(EventPayload::from);
                        let run = handler.handle(payload);
                        let event = name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = run.await {
                                error!(event = %event, error = %e, "Event handler failed");
                            }
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(
                            event = %name,
                            skipped = n,
                            "Event consumer lagged, skipped occurrences"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(event = %name, "Event channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        let count = {
            let mut subscriptions = self.subscriptions.write().await;
            let consumers = subscriptions.entry(event.to_string()).or_default();
            consumers.push(consumer);
            consumers.len()
        };

        info!(event = %event, handler_count = count, "Handler subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, event: &str) -> Result<()> {
        if let Some(consumers) = self.subscriptions.write().await.remove(event) {
            for consumer in &consumers {
                consumer.abort();
            }
            info!(event = %event, removed = consumers.len(), "Handlers unsubscribed");
        }
        Ok(())
    }
}
