//! Built-in transformers available by name in configuration.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{Result, TransformError, Transformer};
use crate::context::AppContext;

fn parse_options<T: for<'de> Deserialize<'de>>(name: &str, options: Option<&Value>) -> Result<T> {
    let options = options
        .ok_or_else(|| TransformError::InvalidOptions(format!("'{}' requires options", name)))?;
    serde_json::from_value(options.clone())
        .map_err(|e| TransformError::InvalidOptions(format!("'{}': {}", name, e)))
}

fn expect_object(name: &str, input: Value) -> Result<Map<String, Value>> {
    match input {
        Value::Object(fields) => Ok(fields),
        other => Err(TransformError::InvalidInput(format!(
            "'{}' expects an object, got {}",
            name, other
        ))),
    }
}

/// Publishes the payload unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl Transformer for Identity {
    async fn transform(&self, input: Value, _ctx: &AppContext) -> Result<Option<Value>> {
        Ok(Some(input))
    }
}

/// Suppresses every occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropTransformer;

#[async_trait]
impl Transformer for DropTransformer {
    async fn transform(&self, _input: Value, _ctx: &AppContext) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// Keeps only the listed top-level fields.
///
/// Options: `{ fields: ["id", "email"] }`. Missing fields are skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct Pick {
    pub fields: Vec<String>,
}

impl Pick {
    pub fn from_options(options: Option<&Value>) -> Result<Self> {
        parse_options("pick", options)
    }
}

#[async_trait]
impl Transformer for Pick {
    async fn transform(&self, input: Value, _ctx: &AppContext) -> Result<Option<Value>> {
        let mut fields = expect_object("pick", input)?;
        let picked: Map<String, Value> = self
            .fields
            .iter()
            .filter_map(|name| fields.remove(name).map(|value| (name.clone(), value)))
            .collect();
        Ok(Some(Value::Object(picked)))
    }
}

/// Merges constant fields into the payload, overwriting existing keys.
///
/// Options: `{ fields: { source: "billing" } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Merge {
    pub fields: Map<String, Value>,
}

impl Merge {
    pub fn from_options(options: Option<&Value>) -> Result<Self> {
        parse_options("merge", options)
    }
}

#[async_trait]
impl Transformer for Merge {
    async fn transform(&self, input: Value, _ctx: &AppContext) -> Result<Option<Value>> {
        let mut fields = expect_object("merge", input)?;
        fields.extend(self.fields.clone());
        Ok(Some(Value::Object(fields)))
    }
}

/// Nests the payload under a single key.
///
/// Options: `{ key: "payload" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Wrap {
    pub key: String,
}

impl Wrap {
    pub fn from_options(options: Option<&Value>) -> Result<Self> {
        parse_options("wrap", options)
    }
}

#[async_trait]
impl Transformer for Wrap {
    async fn transform(&self, input: Value, _ctx: &AppContext) -> Result<Option<Value>> {
        let mut wrapped = Map::new();
        wrapped.insert(self.key.clone(), input);
        Ok(Some(Value::Object(wrapped)))
    }
}
