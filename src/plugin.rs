//! Plugin construction.
//!
//! `create_bridge` is the single entry point the host application calls at
//! startup: validate settings, resolve transformers, connect, and subscribe.

use std::sync::Arc;

use tracing::info;

use crate::broker::BrokerConnector;
use crate::config::Config;
use crate::context::AppContext;
use crate::coordinator::{Bridge, BridgeError};
use crate::transform::TransformerRegistry;

/// Name under which the bridge is exposed to the rest of the application.
pub const SERVICE_NAME: &str = "rabbitmq";

/// Build, connect and start the bridge.
///
/// Configuration errors abort before any broker contact. A failed connection
/// does not: the bridge is returned disconnected and may connect later.
pub async fn create_bridge(
    config: &Config,
    registry: &TransformerRegistry,
    ctx: AppContext,
    connector: Arc<dyn BrokerConnector>,
) -> Result<Bridge, BridgeError> {
    let validated = config.validate()?;
    let transformers = registry.build_map(&validated.transformers)?;

    let bridge = Bridge::new(connector, validated.connection, transformers, ctx);
    bridge.connect().await;
    let subscriptions = bridge.start().await?;

    info!(
        service = SERVICE_NAME,
        subscriptions,
        connected = bridge.is_connected().await,
        "RabbitMQ bridge started"
    );
    Ok(bridge)
}

/// lapin-backed connector.
#[cfg(feature = "amqp")]
pub fn amqp_connector() -> Arc<dyn BrokerConnector> {
    Arc::new(crate::broker::AmqpConnector::with_connection_name(format!(
        "rabbit-bridge-{}",
        std::process::id()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::config::ConfigError;
    use crate::events::ChannelEventService;

    const CONFIG: &str = r#"
connection:
  vhosts:
    "/":
      connection:
        url: "amqp://localhost:5672"
      publications:
        user.created:
          exchange: app.events
pub_transformers:
  user.created:
    transformer: identity
    routing_key: user.created
"#;

    fn ctx(events: Arc<ChannelEventService>) -> AppContext {
        AppContext::new("test", events)
    }

    #[tokio::test]
    async fn test_create_bridge_connects_and_subscribes() {
        let events = Arc::new(ChannelEventService::new());
        let broker = Arc::new(MockBroker::new());
        let config = Config::from_yaml(CONFIG).unwrap();

        let bridge = create_bridge(
            &config,
            &TransformerRegistry::with_builtins(),
            ctx(events.clone()),
            broker.clone(),
        )
        .await
        .unwrap();

        assert!(bridge.is_connected().await);
        assert_eq!(broker.create_calls(), 1);
        assert_eq!(events.subscription_count("user.created").await, 1);
    }

    #[tokio::test]
    async fn test_create_bridge_invalid_config_never_contacts_broker() {
        let broker = Arc::new(MockBroker::new());
        let config = Config {
            connection: None,
            ..Config::from_yaml(CONFIG).unwrap()
        };

        let result = create_bridge(
            &config,
            &TransformerRegistry::with_builtins(),
            ctx(Arc::new(ChannelEventService::new())),
            broker.clone(),
        )
        .await;

        assert!(matches!(
            result,
            Err(BridgeError::Config(ConfigError::MissingConnection))
        ));
        assert_eq!(broker.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_bridge_unknown_transformer() {
        let broker = Arc::new(MockBroker::new());
        let config = Config::from_yaml(CONFIG).unwrap();

        let result = create_bridge(
            &config,
            &TransformerRegistry::new(),
            ctx(Arc::new(ChannelEventService::new())),
            broker.clone(),
        )
        .await;

        assert!(matches!(
            result,
            Err(BridgeError::Config(ConfigError::UnknownTransformer { .. }))
        ));
        assert_eq!(broker.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_bridge_survives_connect_failure() {
        let events = Arc::new(ChannelEventService::new());
        let broker = Arc::new(MockBroker::new());
        broker.set_fail_on_create(true).await;
        let config = Config::from_yaml(CONFIG).unwrap();

        let bridge = create_bridge(
            &config,
            &TransformerRegistry::with_builtins(),
            ctx(events.clone()),
            broker,
        )
        .await
        .unwrap();

        assert!(!bridge.is_connected().await);
        assert_eq!(events.subscription_count("user.created").await, 1);
    }
}
