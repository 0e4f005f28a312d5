//! Matcher — maps incoming messages to the trigger rules they fire.

use mqttrules_domain::event::{FireCause, FireEvent, MatchEvent};
use mqttrules_domain::id::RuleId;
use mqttrules_domain::rule_set::RuleSet;
use mqttrules_domain::topic::{TopicMatcher, TopicMatching};

/// Finds the trigger rules of a snapshot matching a message topic.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    matching: TopicMatching,
}

impl Matcher {
    #[must_use]
    pub fn new(matching: TopicMatching) -> Self {
        Self { matching }
    }

    /// Ids of the rules of `rules` triggered by `topic`, ascending.
    #[must_use]
    pub fn matching_rules(&self, rules: &RuleSet, topic: &str) -> Vec<RuleId> {
        match self.matching {
            TopicMatching::Exact => rules.triggered_by(topic).to_vec(),
            TopicMatching::Wildcard => {
                let mut ids: Vec<RuleId> = rules
                    .triggers()
                    .filter(|(filter, _)| self.matching.matches(filter, topic))
                    .flat_map(|(_, ids)| ids.iter().cloned())
                    .collect();
                ids.sort();
                ids
            }
        }
    }

    /// One [`FireEvent`] per rule triggered by `event`, in ascending rule id
    /// order. Returns an empty list when nothing matches.
    #[must_use]
    pub fn on_message(&self, rules: &RuleSet, event: &MatchEvent) -> Vec<FireEvent> {
        self.matching_rules(rules, &event.topic)
            .into_iter()
            .map(|rule_id| FireEvent::new(rule_id, FireCause::Trigger))
            .collect()
    }

    /// Whether `topic` is covered by subscription `filter`.
    #[must_use]
    pub fn covers(&self, filter: &str, topic: &str) -> bool {
        self.matching.matches(filter, topic)
    }
}
