//! Condition — a guard that must be true for the rule to proceed.

use serde::{Deserialize, Serialize};

use crate::parameter::json_value_at;

/// What a condition can look at when a rule fires.
pub trait EvaluationContext {
    /// The payload of the triggering message, `None` for schedule fires.
    fn payload(&self) -> Option<&[u8]>;

    /// The current value of parameter `name`.
    fn parameter(&self, name: &str) -> Option<&str>;
}

/// A predicate that must hold for the rule actions to execute.
///
/// Conditions are evaluated *after* the trigger or schedule fires. All
/// conditions of a rule must be satisfied (logical AND). Conditions that look
/// at the payload never hold for schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The trigger payload, as text, equals `value`.
    PayloadEquals { value: String },
    /// The trigger payload is JSON and the value at `pointer` equals `equals`.
    PayloadField {
        /// JSON pointer, e.g. `"/state"`.
        pointer: String,
        equals: serde_json::Value,
    },
    /// The parameter `name` currently equals `value`.
    ParameterEquals { name: String, value: String },
}

impl Condition {
    /// Evaluate against the facts available at fire time.
    #[must_use]
    pub fn holds(&self, ctx: &impl EvaluationContext) -> bool {
        match self {
            Self::PayloadEquals { value } => ctx
                .payload()
                .is_some_and(|payload| payload == value.as_bytes()),
            Self::PayloadField { pointer, equals } => ctx
                .payload()
                .and_then(|payload| json_value_at(payload, pointer))
                .is_some_and(|actual| actual == *equals),
            Self::ParameterEquals { name, value } => ctx.parameter(name) == Some(value.as_str()),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PayloadEquals { value } => write!(f, "payload_equals({value})"),
            Self::PayloadField { pointer, equals } => {
                write!(f, "payload_field({pointer} == {equals})")
            }
            Self::ParameterEquals { name, value } => {
                write!(f, "parameter_equals({name}, {value})")
            }
        }
    }
}
