use crate::error::{AppError, Result};
use crate::messaging::MessagingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Legacy flat environment variables that override the nested keys
const LEGACY_ENV_OVERRIDES: [(&str, &str); 3] = [
    ("KAFKA_BROKERS", "messaging.kafka.brokers"),
    ("KAFKA_CLIENT_ID", "messaging.kafka.client_id"),
    ("KAFKA_GROUP_ID", "messaging.kafka.group_id"),
];

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Messaging configuration
    #[serde(default)]
    #[validate(nested)]
    pub messaging: MessagingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from defaults, `$CONFIG_PATH` and the environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from(Some(Path::new(&config_path)))
    }

    /// Load configuration using an explicit file path instead of `$CONFIG_PATH`
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::base_builder(path)
            // Override with environment variables (prefix: EVENT_RELAY__)
            .add_source(
                config::Environment::with_prefix("EVENT_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            builder = builder.set_override_option(key, std::env::var(var).ok())?;
        }

        Self::finish(builder)
    }

    /// Load configuration from compiled-in defaults and an optional file only
    pub fn load_file(path: Option<&Path>) -> Result<Self> {
        Self::finish(Self::base_builder(path))
    }

    fn base_builder(path: Option<&Path>) -> config::ConfigBuilder<config::builder::DefaultState> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            // Override with config file if it exists
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Config = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "event-relay".to_string()
}
