//! Payload transformers.
//!
//! A transformer maps an event's payload to an outgoing message body. Returning
//! `Ok(None)` suppresses publishing for that occurrence.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{ConfigError, TransformerConfig};
use crate::context::AppContext;

mod builtin;

pub use builtin::{DropTransformer, Identity, Merge, Pick, Wrap};

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Errors raised by transformers.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Transform failed: {0}")]
    Failed(String),
}

/// Maps an incoming payload to an outgoing message body.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, input: Value, ctx: &AppContext) -> Result<Option<Value>>;
}

/// Adapter turning an async closure into a `Transformer`.
pub struct FnTransformer<F> {
    f: F,
}

impl<F> FnTransformer<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Transformer for FnTransformer<F>
where
    F: Fn(Value, AppContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>>> + Send,
{
    async fn transform(&self, input: Value, ctx: &AppContext) -> Result<Option<Value>> {
        (self.f)(input, ctx.clone()).await
    }
}

/// Wrap an async closure as a shareable transformer.
pub fn transformer_fn<F, Fut>(f: F) -> Arc<dyn Transformer>
where
    F: Fn(Value, AppContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    Arc::new(FnTransformer::new(f))
}

/// Resolved transformer for one event name.
#[derive(Clone)]
pub struct TransformerEntry {
    pub transformer: Arc<dyn Transformer>,
    pub routing_key: String,
    pub options: Option<Value>,
}

impl TransformerEntry {
    pub fn new(transformer: Arc<dyn Transformer>, routing_key: impl Into<String>) -> Self {
        Self {
            transformer,
            routing_key: routing_key.into(),
            options: None,
        }
    }
}

impl std::fmt::Debug for TransformerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerEntry")
            .field("routing_key", &self.routing_key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Event name -> transformer entry. Built once at startup.
pub type TransformerMap = BTreeMap<String, TransformerEntry>;

type Factory = Arc<dyn Fn(Option<&Value>) -> Result<Arc<dyn Transformer>> + Send + Sync>;

/// Resolves configured transformer names to implementations.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    factories: HashMap<String, Factory>,
}

impl TransformerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `identity`, `drop`, `pick`, `merge` and `wrap`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_transformer("identity", Arc::new(Identity));
        registry.register_transformer("drop", Arc::new(DropTransformer));
        registry.register("pick", |options| Ok(Arc::new(Pick::from_options(options)?)));
        registry.register("merge", |options| Ok(Arc::new(Merge::from_options(options)?)));
        registry.register("wrap", |options| Ok(Arc::new(Wrap::from_options(options)?)));
        registry
    }

    /// Register a factory that builds a transformer from its options.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Option<&Value>) -> Result<Arc<dyn Transformer>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register a ready-made transformer; options are ignored.
    pub fn register_transformer(
        &mut self,
        name: impl Into<String>,
        transformer: Arc<dyn Transformer>,
    ) {
        self.register(name, move |_| Ok(transformer.clone()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the transformer map from configuration.
    pub fn build_map(
        &self,
        configs: &BTreeMap<String, TransformerConfig>,
    ) -> std::result::Result<TransformerMap, ConfigError> {
        configs
            .iter()
            .map(|(event, config)| {
                let factory = self.factories.get(&config.transformer).ok_or_else(|| {
                    ConfigError::UnknownTransformer {
                        event: event.clone(),
                        transformer: config.transformer.clone(),
                    }
                })?;
                let transformer = factory(config.options.as_ref()).map_err(|e| {
                    ConfigError::InvalidTransformerOptions {
                        event: event.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let entry = TransformerEntry {
                    transformer,
                    routing_key: config.routing_key.clone(),
                    options: config.options.clone(),
                };
                Ok((event.clone(), entry))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEventService;
    use serde_json::json;

    fn ctx() -> AppContext {
        AppContext::new("test", Arc::new(ChannelEventService::new()))
    }

    fn config(transformer: &str, options: Option<Value>) -> TransformerConfig {
        TransformerConfig {
            transformer: transformer.to_string(),
            routing_key: "user.created".to_string(),
            options,
        }
    }

    #[tokio::test]
    async fn test_transformer_fn_receives_context() {
        let transformer = transformer_fn(|input: Value, ctx: AppContext| async move {
            Ok(Some(json!({ "app": ctx.name(), "input": input })))
        });

        let output = transformer.transform(json!(1), &ctx()).await.unwrap();
        assert_eq!(output, Some(json!({ "app": "test", "input": 1 })));
    }

    #[test]
    fn test_build_map_with_builtins() {
        let registry = TransformerRegistry::with_builtins();
        let configs = BTreeMap::from([
            ("user.created".to_string(), config("identity", None)),
            (
                "user.deleted".to_string(),
                config("pick", Some(json!({ "fields": ["id"] }))),
            ),
        ]);

        let map = registry.build_map(&configs).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map["user.created"].routing_key, "user.created");
        assert_eq!(map["user.deleted"].options, Some(json!({ "fields": ["id"] })));
    }

    #[test]
    fn test_build_map_unknown_transformer() {
        let registry = TransformerRegistry::with_builtins();
        let configs = BTreeMap::from([("user.created".to_string(), config("nope", None))]);

        let err = registry.build_map(&configs).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownTransformer { ref transformer, .. } if transformer == "nope"
        ));
    }

    #[test]
    fn test_build_map_invalid_options() {
        let registry = TransformerRegistry::with_builtins();
        let configs = BTreeMap::from([("user.created".to_string(), config("pick", None))]);

        assert!(matches!(
            registry.build_map(&configs),
            Err(ConfigError::InvalidTransformerOptions { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_custom_transformer() {
        let mut registry = TransformerRegistry::new();
        registry.register_transformer(
            "shout",
            transformer_fn(|input: Value, _ctx| async move {
                let text = input.as_str().unwrap_or_default().to_uppercase();
                Ok(Some(Value::String(text)))
            }),
        );
        assert!(registry.contains("shout"));
        assert!(!registry.contains("identity"));

        let configs = BTreeMap::from([("greeting".to_string(), config("shout", None))]);
        let map = registry.build_map(&configs).unwrap();
        let output = map["greeting"]
            .transformer
            .transform(json!("hi"), &ctx())
            .await
            .unwrap();
        assert_eq!(output, Some(json!("HI")));
    }
}
