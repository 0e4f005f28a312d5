//! Topic matching — how an incoming topic is compared to a rule's trigger.
//!
//! [`ExactMatch`] is the default. [`WildcardMatch`] implements MQTT filter
//! semantics: `+` matches exactly one level, `#` matches the remaining levels
//! (including none), and topics starting with `$` are never matched by a
//! leading wildcard.

use serde::Deserialize;

use crate::error::ValidationError;

/// Capability to decide whether `topic` is covered by `filter`.
pub trait TopicMatcher {
    fn matches(&self, filter: &str, topic: &str) -> bool;
}

/// Byte-for-byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl TopicMatcher for ExactMatch {
    fn matches(&self, filter: &str, topic: &str) -> bool {
        filter == topic
    }
}

/// MQTT wildcard filter matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardMatch;

impl TopicMatcher for WildcardMatch {
    fn matches(&self, filter: &str, topic: &str) -> bool {
        if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
            return false;
        }

        let mut filter_levels = filter.split('/');
        let mut topic_levels = topic.split('/');
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => {}
                (Some(expected), Some(actual)) if expected == actual => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

/// Matching strategy selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicMatching {
    #[default]
    Exact,
    Wildcard,
}

impl TopicMatcher for TopicMatching {
    fn matches(&self, filter: &str, topic: &str) -> bool {
        match self {
            Self::Exact => ExactMatch.matches(filter, topic),
            Self::Wildcard => WildcardMatch.matches(filter, topic),
        }
    }
}

/// Check that `filter` is a well-formed MQTT subscription filter.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyTopic`] for an empty filter and
/// [`ValidationError::InvalidTopicFilter`] when `+` or `#` do not occupy a
/// whole level, or `#` is not the last level.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    if filter.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (index, level) in levels.iter().enumerate() {
        let wildcard_misuse = match *level {
            "+" => false,
            "#" => index != last,
            other => other.contains(['+', '#']),
        };
        if wildcard_misuse {
            return Err(ValidationError::InvalidTopicFilter(filter.to_string()));
        }
    }
    Ok(())
}

/// Check that `topic` can be published to (non-empty, no wildcards).
///
/// # Errors
///
/// Returns [`ValidationError::EmptyTopic`] or
/// [`ValidationError::WildcardInActionTopic`].
pub fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.contains(['+', '#']) {
        return Err(ValidationError::WildcardInActionTopic(topic.to_string()));
    }
    Ok(())
}
