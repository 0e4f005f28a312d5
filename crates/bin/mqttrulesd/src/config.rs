//! Configuration loading — TOML file with environment variable overrides.
//!
//! Reads the file named by `MQTTRULES_CONFIG`, or `mqttrules.toml` in the
//! working directory. Every field has a default so the file is optional.
//! Environment variables take precedence over file values.

use std::collections::BTreeMap;

use serde::Deserialize;

use mqttrules_adapter_mqtt::MqttConfig;
use mqttrules_app::config::EngineConfig;
use mqttrules_domain::error::RuleError;
use mqttrules_domain::id::RuleId;
use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::rule::{Rule, RuleDefinition};

const DEFAULT_PATH: &str = "mqttrules.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub mqtt: MqttConfig,
    /// Rule engine settings.
    pub engine: EngineConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Initial parameter definitions, by name.
    pub parameters: BTreeMap<String, Parameter>,
    /// Rule definitions, by rule set then rule name.
    pub rules: BTreeMap<String, BTreeMap<String, RuleDefinition>>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mqttrulesd=info,mqttrules_app=info,mqttrules_adapter_mqtt=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the configured file (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MQTTRULES_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if path != DEFAULT_PATH {
                    return Err(ConfigError::Io(err));
                }
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("MQTTRULES_BROKER") {
            match val.rsplit_once(':') {
                Some((host, port)) => {
                    self.mqtt.broker_port = port.parse().map_err(|_| {
                        ConfigError::Validation(format!(
                            "MQTTRULES_BROKER port {port:?} is not a valid port"
                        ))
                    })?;
                    self.mqtt.broker_host = host.to_string();
                }
                None => self.mqtt.broker_host = val,
            }
        }
        if let Some(val) = lookup("MQTTRULES_USERNAME") {
            self.mqtt.username = Some(val);
        }
        if let Some(val) = lookup("MQTTRULES_PASSWORD") {
            self.mqtt.password = Some(val);
        }
        if let Some(val) = lookup("MQTTRULES_CLIENT_ID") {
            self.mqtt.client_id = val;
        }
        if let Some(val) = lookup("MQTTRULES_PREFIX") {
            self.engine.prefix = val;
        }
        if let Some(val) = lookup("MQTTRULES_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = lookup("RUST_LOG") {
            self.logging.filter = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "broker port must be non-zero".to_string(),
            ));
        }
        if self.engine.worker_pool_size == 0 {
            return Err(ConfigError::Validation(
                "worker pool size must be non-zero".to_string(),
            ));
        }
        if self.engine.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured rules, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuleError`] raised by an invalid definition.
    pub fn rules(&self) -> Result<Vec<Rule>, RuleError> {
        self.rules
            .iter()
            .flat_map(|(ruleset, rules)| {
                rules.iter().map(move |(name, definition)| {
                    Rule::from_definition(RuleId::new(ruleset, name), definition.clone())
                })
            })
            .collect()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
