//! Broker connection settings.
//!
//! Mirrors the vhost-oriented topology layout: every virtual host carries its
//! own connection, exchanges, queues, bindings and publications. The block is
//! handed verbatim to the broker client; the bridge itself only reads it to
//! check publication coverage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default content type for published message bodies.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Connection block: all virtual hosts keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Virtual hosts keyed by vhost name (e.g. "/" or "orders").
    pub vhosts: BTreeMap<String, VhostConfig>,
}

impl ConnectionSettings {
    /// Find a publication by name across all vhosts.
    ///
    /// Returns the owning vhost name alongside the publication. Vhosts are
    /// searched in name order, so the first match wins on duplicates.
    pub fn find_publication(&self, name: &str) -> Option<(&str, &PublicationConfig)> {
        self.vhosts.iter().find_map(|(vhost_name, vhost)| {
            vhost
                .publications
                .get(name)
                .map(|publication| (vhost_name.as_str(), publication))
        })
    }

    /// Whether any vhost defines a publication with this name.
    pub fn has_publication(&self, name: &str) -> bool {
        self.find_publication(name).is_some()
    }
}

/// A single virtual host.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VhostConfig {
    /// How to reach the broker for this vhost.
    pub connection: VhostConnection,
    /// Exchanges to declare, keyed by exchange name.
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    /// Queues to declare, keyed by queue name.
    pub queues: BTreeMap<String, QueueConfig>,
    /// Bindings to declare, keyed by an arbitrary binding name.
    pub bindings: BTreeMap<String, BindingConfig>,
    /// Named routes from application code to an exchange or queue.
    pub publications: BTreeMap<String, PublicationConfig>,
}

/// Broker endpoint(s) for a vhost.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VhostConnection {
    /// Primary AMQP URL.
    pub url: Option<String>,
    /// Additional AMQP URLs, tried in order after `url`.
    pub urls: Vec<String>,
}

impl VhostConnection {
    /// All candidate URLs in connection order.
    pub fn candidates(&self) -> Vec<&str> {
        self.url
            .iter()
            .chain(self.urls.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Exchange type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(rename = "type")]
    pub kind: ExchangeType,
    pub durable: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: ExchangeType::Topic,
            durable: true,
        }
    }
}

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Binding of a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BindingConfig {
    /// Source exchange.
    pub source: String,
    /// Destination queue.
    pub destination: String,
    /// Binding key pattern (e.g. "orders.*").
    #[serde(default = "default_binding_key")]
    pub binding_key: String,
}

fn default_binding_key() -> String {
    "#".to_string()
}

/// Publication: where a named message goes.
///
/// Exactly one of `exchange` or `queue` should be set. A queue publication
/// goes through the default exchange with the queue name as routing key.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PublicationConfig {
    pub exchange: Option<String>,
    pub queue: Option<String>,
    /// Routing key; defaults to the publication name.
    pub routing_key: Option<String>,
    /// Publish with delivery mode 2.
    pub persistent: bool,
    /// Content type header; defaults to `application/json`.
    pub content_type: Option<String>,
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self {
            exchange: None,
            queue: None,
            routing_key: None,
            persistent: true,
            content_type: None,
        }
    }
}

impl PublicationConfig {
    /// Publication targeting an exchange.
    pub fn to_exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: Some(exchange.into()),
            ..Default::default()
        }
    }

    /// Publication targeting a queue directly.
    pub fn to_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..Default::default()
        }
    }

    /// Content type to stamp on published messages.
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(vhost: &str, publication: &str) -> ConnectionSettings {
        let mut vhost_config = VhostConfig::default();
        vhost_config
            .publications
            .insert(publication.to_string(), PublicationConfig::to_exchange("events"));
        ConnectionSettings {
            vhosts: BTreeMap::from([(vhost.to_string(), vhost_config)]),
        }
    }

    #[test]
    fn test_find_publication_returns_owning_vhost() {
        let settings = settings_with("orders", "order.created");

        let (vhost, publication) = settings.find_publication("order.created").unwrap();
        assert_eq!(vhost, "orders");
        assert_eq!(publication.exchange.as_deref(), Some("events"));
        assert!(!settings.has_publication("order.cancelled"));
    }

    #[test]
    fn test_candidates_url_first() {
        let connection = VhostConnection {
            url: Some("amqp://primary".to_string()),
            urls: vec!["amqp://secondary".to_string()],
        };
        assert_eq!(
            connection.candidates(),
            vec!["amqp://primary", "amqp://secondary"]
        );
        assert!(VhostConnection::default().candidates().is_empty());
    }

    #[test]
    fn test_publication_defaults() {
        let publication = PublicationConfig::to_queue("audit");
        assert!(publication.persistent);
        assert_eq!(publication.content_type(), DEFAULT_CONTENT_TYPE);
        assert!(publication.routing_key.is_none());
    }

    #[test]
    fn test_exchange_type_deserialize() {
        let exchange: ExchangeConfig =
            serde_json::from_value(serde_json::json!({ "type": "fanout" })).unwrap();
        assert_eq!(exchange.kind, ExchangeType::Fanout);
        assert!(exchange.durable);
    }
}
