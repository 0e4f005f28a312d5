//! Action — the MQTT publish performed when a rule fires.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::topic::validate_publish_topic;

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = ValidationError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(ValidationError::InvalidQos(other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// A message to publish when the rule fires.
///
/// The payload is text and may contain [template](crate::template)
/// placeholders; it is rendered and published as bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub qos: Qos,
    #[serde(default)]
    pub retain: bool,
}

impl Action {
    /// A QoS 0, non-retained publish of `payload` on `topic`.
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::default(),
            retain: false,
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Check that the action topic can be published to.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTopic`] or
    /// [`ValidationError::WildcardInActionTopic`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_publish_topic(&self.topic)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "publish({}, qos={}", self.topic, u8::from(self.qos))?;
        if self.retain {
            f.write_str(", retain")?;
        }
        f.write_str(")")
    }
}
