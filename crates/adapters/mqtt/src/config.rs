//! MQTT broker connection configuration.

use std::time::Duration;

use rumqttc::MqttOptions;
use serde::Deserialize;

/// Configuration for the broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address.
    pub broker_host: String,
    /// MQTT broker port.
    pub broker_port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Capacity of the outgoing request and incoming message queues.
    pub channel_capacity: usize,
    /// Pause after a connection error before reconnecting, in seconds.
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "mqttrules".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            channel_capacity: 64,
            reconnect_delay_secs: 1,
        }
    }
}

impl MqttConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// rumqttc options for this configuration.
    #[must_use]
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker_host, self.broker_port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)));
        options.set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_have_sensible_defaults() {
        let config = MqttConfig::default();
        assert_eq!(config.broker_host, "localhost");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.client_id, "mqttrules");
        assert_eq!(config.username, None);
        assert_eq!(config.password, None);
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.channel_capacity, 64);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn should_deserialize_from_toml() {
        let toml = r#"
            broker_host = "mqtt.example.com"
            broker_port = 8883
            client_id = "rules-1"
            username = "rules"
            password = "secret"
            keep_alive_secs = 60
            channel_capacity = 128
            reconnect_delay_secs = 5
        "#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_host, "mqtt.example.com");
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.client_id, "rules-1");
        assert_eq!(config.username.as_deref(), Some("rules"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.channel_capacity, 128);
        assert_eq!(config.reconnect_delay_secs, 5);
    }

    #[test]
    fn should_use_defaults_for_missing_fields() {
        let toml = r#"broker_host = "192.168.1.100""#;
        let config: MqttConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker_host, "192.168.1.100");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.client_id, "mqttrules");
    }

    #[test]
    fn should_build_rumqttc_options() {
        let config = MqttConfig {
            broker_host: "broker".to_string(),
            broker_port: 1884,
            keep_alive_secs: 10,
            ..MqttConfig::default()
        };
        let options = config.options();
        assert_eq!(options.broker_address(), ("broker".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(10));
        assert_eq!(options.client_id(), "mqttrules");
    }
}
