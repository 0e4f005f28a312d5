//! Rule — trigger or schedule → condition → action.
//!
//! A rule fires either when a message arrives on its trigger topic or
//! periodically at its interval. When it fires, its [`Condition`]s must all
//! hold, then its [`Action`]s are published in declared order.
//!
//! Rules are built from a [`RuleDefinition`] (the serialized shape found in
//! configuration files and live-update messages) or with [`Rule::builder`],
//! and are immutable once built.

mod action;
mod condition;

pub use action::{Action, Qos};
pub use condition::{Condition, EvaluationContext};

use serde::{Deserialize, Serialize};

use crate::error::{RuleError, ValidationError};
use crate::id::RuleId;
use crate::interval::Interval;
use crate::parameter::{json_value_at, value_to_text};
use crate::template::{self, Placeholder};
use crate::topic::validate_filter;

/// What makes a rule fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Fires on every message whose topic matches `topic`.
    Trigger { topic: String },
    /// Fires every `interval`.
    Schedule { interval: Interval },
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trigger { topic } => write!(f, "trigger({topic})"),
            Self::Schedule { interval } => write!(f, "schedule(@every {interval})"),
        }
    }
}

/// A validated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub kind: RuleKind,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create a builder for constructing a [`Rule`].
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    /// Build a rule from its serialized definition.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidRule`] when the definition does not
    /// describe a valid rule.
    pub fn from_definition(id: RuleId, definition: RuleDefinition) -> Result<Self, RuleError> {
        let kind = match (definition.trigger, definition.schedule) {
            (Some(topic), None) => RuleKind::Trigger { topic },
            (None, Some(schedule)) => RuleKind::Schedule {
                interval: schedule
                    .parse::<Interval>()
                    .map_err(|reason| RuleError::invalid(id.as_str(), reason))?,
            },
            _ => return Err(RuleError::invalid(id.as_str(), ValidationError::AmbiguousKind)),
        };
        let rule = Self {
            id,
            kind,
            conditions: definition.conditions,
            actions: definition.actions,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidRule`] when:
    /// - `actions` is empty ([`ValidationError::NoActions`])
    /// - the trigger topic is empty or not a valid filter
    /// - an action topic is empty or contains wildcards
    pub fn validate(&self) -> Result<(), RuleError> {
        let invalid = |reason| RuleError::invalid(self.id.as_str(), reason);

        if self.actions.is_empty() {
            return Err(invalid(ValidationError::NoActions));
        }
        if let RuleKind::Trigger { topic } = &self.kind {
            validate_filter(topic).map_err(invalid)?;
        }
        for action in &self.actions {
            action.validate().map_err(invalid)?;
        }
        Ok(())
    }

    /// The trigger topic, if this is a trigger rule.
    #[must_use]
    pub fn trigger_topic(&self) -> Option<&str> {
        match &self.kind {
            RuleKind::Trigger { topic } => Some(topic),
            RuleKind::Schedule { .. } => None,
        }
    }

    /// The interval, if this is a schedule rule.
    #[must_use]
    pub fn interval(&self) -> Option<Interval> {
        match &self.kind {
            RuleKind::Trigger { .. } => None,
            RuleKind::Schedule { interval } => Some(*interval),
        }
    }

    /// Whether every condition holds (`true` when there are none).
    #[must_use]
    pub fn conditions_hold(&self, ctx: &impl EvaluationContext) -> bool {
        self.conditions.iter().all(|condition| condition.holds(ctx))
    }

    /// Render the payload of every action, in declared order.
    ///
    /// Unresolvable placeholders expand to nothing and are reported to
    /// `on_missing` together with the index of the action.
    pub fn render_payloads<C, M>(&self, ctx: &C, mut on_missing: M) -> Vec<Vec<u8>>
    where
        C: EvaluationContext,
        M: FnMut(usize, &Placeholder<'_>),
    {
        self.actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                if !template::has_placeholders(&action.payload) {
                    return action.payload.clone().into_bytes();
                }
                template::render(
                    &action.payload,
                    |placeholder| resolve(ctx, placeholder),
                    |placeholder| on_missing(index, placeholder),
                )
                .into_bytes()
            })
            .collect()
    }
}

fn resolve(ctx: &impl EvaluationContext, placeholder: &Placeholder<'_>) -> Option<String> {
    match placeholder {
        Placeholder::Payload => ctx
            .payload()
            .map(|payload| String::from_utf8_lossy(payload).into_owned()),
        Placeholder::PayloadPointer(pointer) => ctx
            .payload()
            .and_then(|payload| json_value_at(payload, pointer))
            .map(|value| value_to_text(&value)),
        Placeholder::Parameter(name) => ctx.parameter(name).map(str::to_string),
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}, {} action(s)]", self.id, self.kind, self.actions.len())
    }
}

/// Serialized shape of a rule, as written by users.
///
/// Exactly one of `trigger` and `schedule` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Step-by-step builder for [`Rule`].
#[derive(Debug, Default)]
pub struct RuleBuilder {
    id: Option<RuleId>,
    kind: Option<RuleKind>,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
}

impl RuleBuilder {
    #[must_use]
    pub fn id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn trigger(mut self, topic: impl Into<String>) -> Self {
        self.kind = Some(RuleKind::Trigger {
            topic: topic.into(),
        });
        self
    }

    #[must_use]
    pub fn schedule(mut self, interval: Interval) -> Self {
        self.kind = Some(RuleKind::Schedule { interval });
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Consume the builder, validate, and return a [`Rule`].
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidRule`] if the id or kind is missing or any
    /// invariant fails.
    pub fn build(self) -> Result<Rule, RuleError> {
        let id = self
            .id
            .ok_or_else(|| RuleError::invalid("", ValidationError::EmptyRuleId))?;
        let kind = self
            .kind
            .ok_or_else(|| RuleError::invalid(id.as_str(), ValidationError::AmbiguousKind))?;
        let rule = Rule {
            id,
            kind,
            conditions: self.conditions,
            actions: self.actions,
        };
        rule.validate()?;
        Ok(rule)
    }
}
