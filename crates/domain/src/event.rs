//! Events — transient records flowing through the engine.
//!
//! - [`MatchEvent`]: an incoming MQTT message, consumed once by the matcher.
//! - [`FireEvent`]: a rule that must run now, produced by the matcher or the
//!   scheduler and consumed by the dispatcher.
//! - [`EngineEvent`]: observability records broadcast to interested
//!   subscribers (rule loads, fires, failed actions, cancellations).

use serde::{Deserialize, Serialize};

use crate::id::{FireId, GenerationId, RuleId};
use crate::time::{self, Timestamp};

/// An incoming message on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: Timestamp,
}

impl MatchEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: time::now(),
        }
    }
}

/// Why a rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireCause {
    Trigger,
    Schedule,
}

impl std::fmt::Display for FireCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Schedule => f.write_str("schedule"),
        }
    }
}

/// A rule that must be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireEvent {
    pub id: FireId,
    pub rule_id: RuleId,
    pub fired_at: Timestamp,
    pub cause: FireCause,
}

impl FireEvent {
    /// Create a fire event stamped with the current time.
    #[must_use]
    pub fn new(rule_id: RuleId, cause: FireCause) -> Self {
        Self {
            id: FireId::new(),
            rule_id,
            fired_at: time::now(),
            cause,
        }
    }
}

/// Observability record published on the engine event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new rule generation became active.
    RulesLoaded {
        generation: GenerationId,
        rules: usize,
    },
    /// A rule passed its conditions and was handed to the dispatcher.
    RuleFired(FireEvent),
    /// An action could not be published, even after retries.
    ActionFailed {
        rule_id: RuleId,
        fire_id: FireId,
        action_index: usize,
        attempts: u32,
        cause: String,
    },
    /// An in-flight dispatch was abandoned during shutdown.
    DispatchCancelled {
        rule_id: RuleId,
        fire_id: FireId,
        published: usize,
    },
}
