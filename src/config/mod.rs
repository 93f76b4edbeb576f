//! Bridge configuration.
//!
//! Loads the plugin settings (connection block + transformer map) from YAML
//! files and environment variables, and validates them before any broker
//! contact is attempted.

mod connection;

pub use connection::{
    BindingConfig, ConnectionSettings, ExchangeConfig, ExchangeType, PublicationConfig,
    QueueConfig, VhostConfig, VhostConnection, DEFAULT_CONTENT_TYPE,
};

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "rabbit-bridge.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RABBIT_BRIDGE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RABBIT_BRIDGE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RABBIT_BRIDGE_LOG";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("RabbitMQ plugin requires a 'connection' configuration block")]
    MissingConnection,

    #[error("RabbitMQ plugin requires a non-empty 'pub_transformers' map")]
    MissingTransformers,

    #[error("Event '{event}' references unknown transformer '{transformer}'")]
    UnknownTransformer { event: String, transformer: String },

    #[error("Invalid options for transformer of event '{event}': {reason}")]
    InvalidTransformerOptions { event: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Transformer entry as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformerConfig {
    /// Name of a transformer known to the registry.
    pub transformer: String,
    /// Routing key associated with this event.
    pub routing_key: String,
    /// Transformer-specific options.
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Plugin settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection block passed verbatim to the broker client.
    pub connection: Option<ConnectionSettings>,
    /// Event name -> transformer entry.
    pub pub_transformers: Option<BTreeMap<String, TransformerConfig>>,
}

/// Non-fatal configuration finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAdvisory {
    /// A transformer exists for an event no vhost publishes.
    MissingPublication { event: String },
}

impl std::fmt::Display for ConfigAdvisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPublication { event } => write!(
                f,
                "No publication found for transformer '{}' in any vhost",
                event
            ),
        }
    }
}

/// Configuration that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub connection: ConnectionSettings,
    pub transformers: BTreeMap<String, TransformerConfig>,
    pub advisories: Vec<ConfigAdvisory>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `rabbit-bridge.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse configuration from a YAML document, without file or env layering.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Check required blocks and publication coverage.
    ///
    /// Missing connection or an absent/empty transformer map is fatal. A
    /// transformer whose event name matches no publication in any vhost is
    /// reported as an advisory and logged as a warning.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let connection = self
            .connection
            .clone()
            .ok_or(ConfigError::MissingConnection)?;

        let transformers = self
            .pub_transformers
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingTransformers)?;

        let advisories: Vec<ConfigAdvisory> = transformers
            .keys()
            .filter(|event| !connection.has_publication(event))
            .map(|event| ConfigAdvisory::MissingPublication {
                event: event.clone(),
            })
            .collect();

        for advisory in &advisories {
            match advisory {
                ConfigAdvisory::MissingPublication { event } => {
                    warn!(event = %event, "{}", advisory);
                }
            }
        }

        Ok(ValidatedConfig {
            connection,
            transformers,
            advisories,
        })
    }
}

#[cfg(test)]
mod tests;
