//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts via `#[from]`.
//! The domain only knows about invalid rule definitions; IO failures live in
//! the `app` ports and adapters.

use crate::id::RuleId;

/// Why a single rule (or one of its parts) is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rule id must not be empty")]
    EmptyRuleId,

    #[error("rule has no actions")]
    NoActions,

    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("invalid topic filter {0:?}")]
    InvalidTopicFilter(String),

    #[error("action topic {0:?} must not contain wildcards")]
    WildcardInActionTopic(String),

    #[error("malformed interval {0:?}")]
    MalformedInterval(String),

    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("interval must not exceed 366 days")]
    IntervalTooLong,

    #[error("rule must declare exactly one of `trigger` or `schedule`")]
    AmbiguousKind,

    #[error("invalid QoS level {0}")]
    InvalidQos(u8),
}

/// Errors raised while loading a rule set.
///
/// A failed load never replaces the active generation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// One rule of the set failed validation.
    #[error("invalid rule {id:?}")]
    InvalidRule {
        id: String,
        #[source]
        reason: ValidationError,
    },

    /// Two rules share the same identifier.
    #[error("duplicate rule id {0}")]
    DuplicateRule(RuleId),

    /// A generation must contain at least one rule.
    #[error("rule set is empty")]
    EmptyRuleSet,
}

impl RuleError {
    /// Wrap a [`ValidationError`] for the rule identified by `id`.
    pub fn invalid(id: impl Into<String>, reason: ValidationError) -> Self {
        Self::InvalidRule {
            id: id.into(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn should_display_validation_errors() {
        assert_eq!(ValidationError::NoActions.to_string(), "rule has no actions");
        assert_eq!(
            ValidationError::MalformedInterval("ten".to_string()).to_string(),
            "malformed interval \"ten\""
        );
        assert_eq!(ValidationError::InvalidQos(3).to_string(), "invalid QoS level 3");
        assert_eq!(
            ValidationError::IntervalTooLong.to_string(),
            "interval must not exceed 366 days"
        );
    }

    #[test]
    fn should_expose_validation_reason_as_source() {
        let err = RuleError::invalid("lights/on", ValidationError::EmptyTopic);
        assert_eq!(err.to_string(), "invalid rule \"lights/on\"");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "topic must not be empty");
    }

    #[test]
    fn should_display_duplicate_rule() {
        let err = RuleError::DuplicateRule(RuleId::new("set", "rule"));
        assert_eq!(err.to_string(), "duplicate rule id set/rule");
    }
}
