//! MQTT adapter error types.

use mqttrules_app::ports::MqttError;
use mqttrules_domain::error::ValidationError;

/// Errors specific to the rumqttc adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttAdapterError {
    /// The broker connection is down.
    #[error("MQTT client not connected")]
    NotConnected,

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// The topic or filter is not valid MQTT.
    #[error("invalid topic")]
    InvalidTopic(#[source] ValidationError),
}

impl MqttAdapterError {
    /// Convert into the port error seen by the engine.
    #[must_use]
    pub fn into_port(self) -> MqttError {
        match self {
            Self::NotConnected => MqttError::NotConnected,
            Self::Client(_) => MqttError::Connection(Box::new(self)),
            Self::InvalidTopic(_) => MqttError::Rejected(Box::new(self)),
        }
    }
}

impl From<MqttAdapterError> for MqttError {
    fn from(err: MqttAdapterError) -> Self {
        err.into_port()
    }
}
