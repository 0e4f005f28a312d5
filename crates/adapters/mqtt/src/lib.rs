//! # mqttrules-adapter-mqtt
//!
//! MQTT adapter — connects the rule engine to a broker.
//!
//! ## Responsibilities
//! - Connect to an MQTT broker with rumqttc and keep the session alive
//! - Forward incoming publishes to the engine as `InboundMessage`s
//! - Implement the `MqttClient` port for publishes and subscriptions
//! - Restore subscriptions after a reconnect
//!
//! ## Dependency rule
//! Same as other adapters: depends on `mqttrules-app` and `mqttrules-domain`.

pub mod client;
pub mod config;
pub mod error;

pub use client::RumqttClient;
pub use config::MqttConfig;
pub use error::MqttAdapterError;
