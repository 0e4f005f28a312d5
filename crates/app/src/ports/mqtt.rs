//! MQTT port — the broker connection the engine publishes through.
//!
//! The engine never speaks MQTT itself. An adapter implements [`MqttClient`]
//! for outbound traffic and hands incoming messages to the engine through a
//! `tokio::sync::mpsc::Receiver<InboundMessage>`.

use std::future::Future;

use mqttrules_domain::rule::{Action, Qos};

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

impl OutboundMessage {
    /// The publish described by `action`, carrying an already rendered payload.
    #[must_use]
    pub fn from_action(action: &Action, payload: Vec<u8>) -> Self {
        Self {
            topic: action.topic.clone(),
            payload,
            qos: action.qos,
            retain: action.retain,
        }
    }
}

/// Confirmation that the client accepted a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

/// Errors reported by an [`MqttClient`].
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The client is currently disconnected from the broker.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The connection failed while handling the request.
    #[error("MQTT connection error")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request itself was refused and retrying will not help.
    #[error("MQTT request rejected")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl MqttError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Connection(_))
    }
}

/// Outbound side of a broker connection.
///
/// Implementations handle their own internal synchronization: the engine
/// shares one client between every dispatch task.
pub trait MqttClient: Send + Sync {
    /// Publish a message.
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<Ack, MqttError>> + Send;

    /// Start receiving messages matching `filter`.
    fn subscribe(
        &self,
        filter: &str,
        qos: Qos,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;

    /// Stop receiving messages matching `filter`.
    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<(), MqttError>> + Send;
}
