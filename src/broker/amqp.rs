//! AMQP (RabbitMQ) broker client.
//!
//! One connection and one confirm-mode channel per vhost. Topology declared in
//! the connection settings (exchanges, queues, bindings) is asserted on connect;
//! publications are resolved up front so `publish` is a map lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    BrokerConnector, BrokerError, BrokerHandle, BrokerNotification, PublicationAck, Result,
    NOTIFICATION_CAPACITY,
};
use crate::config::{ConnectionSettings, ExchangeType, VhostConfig};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Publication resolved against its vhost.
#[derive(Debug, Clone, PartialEq)]
struct ResolvedPublication {
    vhost: String,
    exchange: String,
    routing_key: String,
    persistent: bool,
    content_type: String,
}

/// Resolve every publication to `(vhost, exchange, routing key)`.
///
/// Queue publications go through the default exchange with the queue name as
/// routing key. When two vhosts define the same publication name, the first
/// vhost in name order wins.
fn resolve_publications(settings: &ConnectionSettings) -> HashMap<String, ResolvedPublication> {
    let mut resolved = HashMap::new();
    for (vhost_name, vhost) in &settings.vhosts {
        for (name, publication) in &vhost.publications {
            if resolved.contains_key(name) {
                warn!(
                    publication = %name,
                    vhost = %vhost_name,
                    "Duplicate publication name, keeping first definition"
                );
                continue;
            }
            let named_key = || {
                publication
                    .routing_key
                    .clone()
                    .unwrap_or_else(|| name.clone())
            };
            let (exchange, routing_key) = match (&publication.exchange, &publication.queue) {
                (Some(exchange), _) => (exchange.clone(), named_key()),
                (None, Some(queue)) => (String::new(), queue.clone()),
                (None, None) => (String::new(), named_key()),
            };
            resolved.insert(
                name.clone(),
                ResolvedPublication {
                    vhost: vhost_name.clone(),
                    exchange,
                    routing_key,
                    persistent: publication.persistent,
                    content_type: publication.content_type().to_string(),
                },
            );
        }
    }
    resolved
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
        ExchangeType::Headers => ExchangeKind::Headers,
    }
}

/// Map a connection-level error to a lifecycle notification.
fn classify_error(err: &lapin::Error) -> BrokerNotification {
    match err {
        lapin::Error::IOError(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerNotification::Disconnect(err.to_string())
        }
        _ => BrokerNotification::Error(err.to_string()),
    }
}

/// Connection and publishing channel for one vhost.
struct VhostLink {
    connection: Connection,
    channel: Channel,
}

/// Creates `AmqpHandle`s with lapin.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector {
    /// Connection name advertised to the broker; a unique one is generated if unset.
    pub connection_name: Option<String>,
}

impl AmqpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_name(name: impl Into<String>) -> Self {
        Self {
            connection_name: Some(name.into()),
        }
    }

    fn connection_name(&self) -> String {
        self.connection_name
            .clone()
            .unwrap_or_else(|| format!("rabbit-bridge-{}", uuid::Uuid::new_v4()))
    }

    /// Try each candidate URL in order.
    async fn open_connection(&self, vhost_name: &str, vhost: &VhostConfig) -> Result<Connection> {
        let candidates = vhost.connection.candidates();
        if candidates.is_empty() {
            return Err(BrokerError::Connection(format!(
                "No connection url configured for vhost '{}'",
                vhost_name
            )));
        }

        let mut last_error = None;
        for url in candidates {
            debug!(vhost = %vhost_name, "Attempting AMQP connection");
            let properties = ConnectionProperties::default()
                .with_connection_name(self.connection_name().into());
            match Connection::connect(url, properties).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!(vhost = %vhost_name, error = %e, "AMQP connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(BrokerError::Connection(format!(
            "Failed to connect vhost '{}': {}",
            vhost_name,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Declare exchanges, queues and bindings for a vhost.
    async fn declare_topology(
        channel: &Channel,
        vhost_name: &str,
        vhost: &VhostConfig,
    ) -> Result<()> {
        for (name, exchange) in &vhost.exchanges {
            channel
                .exchange_declare(
                    name,
                    exchange_kind(exchange.kind),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Connection(format!("Failed to declare exchange '{}': {}", name, e))
                })?;
        }

        for (name, queue) in &vhost.queues {
            channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        exclusive: queue.exclusive,
                        auto_delete: queue.auto_delete,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Connection(format!("Failed to declare queue '{}': {}", name, e))
                })?;
        }

        for (name, binding) in &vhost.bindings {
            channel
                .queue_bind(
                    &binding.destination,
                    &binding.source,
                    &binding.binding_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    BrokerError::Connection(format!("Failed to declare binding '{}': {}", name, e))
                })?;
        }

        info!(
            vhost = %vhost_name,
            exchanges = vhost.exchanges.len(),
            queues = vhost.queues.len(),
            bindings = vhost.bindings.len(),
            "Declared vhost topology"
        );
        Ok(())
    }

    async fn open_vhost(
        &self,
        vhost_name: &str,
        vhost: &VhostConfig,
        notifier: &broadcast::Sender<BrokerNotification>,
    ) -> Result<VhostLink> {
        let connection = self.open_connection(vhost_name, vhost).await?;

        let tx = notifier.clone();
        let vhost_label = vhost_name.to_string();
        connection.on_error(move |err| {
            error!(vhost = %vhost_label, error = %err, "AMQP connection error");
            let _ = tx.send(classify_error(&err));
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("Failed to create channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                BrokerError::Connection(format!("Failed to enable publisher confirms: {}", e))
            })?;

        Self::declare_topology(&channel, vhost_name, vhost).await?;

        Ok(VhostLink {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn create(&self, settings: &ConnectionSettings) -> Result<Arc<dyn BrokerHandle>> {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let mut links = HashMap::new();

        for (vhost_name, vhost) in &settings.vhosts {
            match self.open_vhost(vhost_name, vhost, &notifier).await {
                Ok(link) => {
                    links.insert(vhost_name.clone(), link);
                }
                Err(e) => {
                    close_links(&links).await;
                    return Err(e);
                }
            }
        }

        info!(vhosts = links.len(), "Connected to AMQP");

        Ok(Arc::new(AmqpHandle {
            links,
            publications: resolve_publications(settings),
            notifier,
        }))
    }
}

/// Close every channel and connection, returning the first failure.
async fn close_links(links: &HashMap<String, VhostLink>) -> Option<String> {
    let mut first_error = None;
    for (vhost_name, link) in links {
        if let Err(e) = link.channel.close(REPLY_SUCCESS, "shutdown").await {
            debug!(vhost = %vhost_name, error = %e, "Channel close failed");
        }
        if let Err(e) = link.connection.close(REPLY_SUCCESS, "shutdown").await {
            error!(vhost = %vhost_name, error = %e, "Connection close failed");
            first_error.get_or_insert_with(|| format!("vhost '{}': {}", vhost_name, e));
        }
    }
    first_error
}

/// Live lapin session spanning all configured vhosts.
pub struct AmqpHandle {
    links: HashMap<String, VhostLink>,
    publications: HashMap<String, ResolvedPublication>,
    notifier: broadcast::Sender<BrokerNotification>,
}

#[async_trait]
impl BrokerHandle for AmqpHandle {
    #[tracing::instrument(name = "broker.publish", skip_all, fields(publication = %publication))]
    async fn publish(&self, publication: &str, body: Vec<u8>) -> Result<PublicationAck> {
        let resolved = self
            .publications
            .get(publication)
            .ok_or_else(|| BrokerError::UnknownPublication(publication.to_string()))?;

        let link = self.links.get(&resolved.vhost).ok_or(BrokerError::NotConnected)?;

        let mut properties =
            BasicProperties::default().with_content_type(resolved.content_type.as_str().into());
        if resolved.persistent {
            properties = properties.with_delivery_mode(2);
        }

        let confirm = link
            .channel
            .basic_publish(
                &resolved.exchange,
                &resolved.routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            exchange = %resolved.exchange,
            routing_key = %resolved.routing_key,
            "Published message"
        );

        Ok(PublicationAck::new(async move {
            match confirm.await {
                Ok(Confirmation::Nack(_)) => {
                    Err(BrokerError::Publish("Message was nacked by the broker".to_string()))
                }
                Ok(_) => Ok(()),
                Err(e) => Err(BrokerError::Publish(format!(
                    "Publish confirmation failed: {}",
                    e
                ))),
            }
        }))
    }

    fn notifications(&self) -> broadcast::Receiver<BrokerNotification> {
        self.notifier.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        match close_links(&self.links).await {
            Some(e) => Err(BrokerError::Shutdown(e)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PublicationConfig, VhostConfig};
    use std::collections::BTreeMap;

    fn settings() -> ConnectionSettings {
        let mut orders = VhostConfig::default();
        orders
            .publications
            .insert("order.created".to_string(), PublicationConfig::to_exchange("orders"));
        orders.publications.insert(
            "order.audit".to_string(),
            PublicationConfig {
                queue: Some("audit".to_string()),
                persistent: false,
                ..Default::default()
            },
        );

        let mut users = VhostConfig::default();
        users.publications.insert(
            "user.created".to_string(),
            PublicationConfig {
                exchange: Some("users".to_string()),
                routing_key: Some("users.new".to_string()),
                content_type: Some("text/plain".to_string()),
                ..Default::default()
            },
        );

        ConnectionSettings {
            vhosts: BTreeMap::from([
                ("orders".to_string(), orders),
                ("users".to_string(), users),
            ]),
        }
    }

    #[test]
    fn test_resolve_exchange_publication_defaults_routing_key() {
        let resolved = resolve_publications(&settings());
        let publication = &resolved["order.created"];

        assert_eq!(publication.vhost, "orders");
        assert_eq!(publication.exchange, "orders");
        assert_eq!(publication.routing_key, "order.created");
        assert!(publication.persistent);
        assert_eq!(publication.content_type, "application/json");
    }

    #[test]
    fn test_resolve_queue_publication_uses_default_exchange() {
        let resolved = resolve_publications(&settings());
        let publication = &resolved["order.audit"];

        assert_eq!(publication.exchange, "");
        assert_eq!(publication.routing_key, "audit");
        assert!(!publication.persistent);
    }

    #[test]
    fn test_resolve_explicit_routing_key_and_content_type() {
        let resolved = resolve_publications(&settings());
        let publication = &resolved["user.created"];

        assert_eq!(publication.vhost, "users");
        assert_eq!(publication.routing_key, "users.new");
        assert_eq!(publication.content_type, "text/plain");
    }

    #[test]
    fn test_resolve_duplicate_keeps_first_vhost() {
        let mut settings = settings();
        settings
            .vhosts
            .get_mut("users")
            .unwrap()
            .publications
            .insert("order.created".to_string(), PublicationConfig::to_exchange("other"));

        let resolved = resolve_publications(&settings);
        assert_eq!(resolved["order.created"].vhost, "orders");
    }

    #[test]
    fn test_classify_io_error_as_disconnect() {
        let err = lapin::Error::IOError(Arc::new(std::io::Error::other("connection reset")));
        assert!(matches!(
            classify_error(&err),
            BrokerNotification::Disconnect(_)
        ));
    }

    #[test]
    fn test_classify_other_error() {
        let err = lapin::Error::ChannelsLimitReached;
        assert!(matches!(classify_error(&err), BrokerNotification::Error(_)));
    }

    #[test]
    fn test_exchange_kind_mapping() {
        assert!(matches!(
            exchange_kind(ExchangeType::Fanout),
            ExchangeKind::Fanout
        ));
        assert!(matches!(
            exchange_kind(ExchangeType::Headers),
            ExchangeKind::Headers
        ));
    }
}
