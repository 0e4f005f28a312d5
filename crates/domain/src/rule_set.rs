//! `RuleSet` — one immutable, validated generation of rules.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::RuleError;
use crate::id::{GenerationId, RuleId};
use crate::interval::Interval;
use crate::rule::Rule;

/// A validated snapshot of all rules of one generation.
///
/// Rules are kept in ascending [`RuleId`] order, which is the order used
/// whenever several rules fire at once.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    generation: GenerationId,
    rules: BTreeMap<RuleId, Arc<Rule>>,
    triggers: BTreeMap<String, Vec<RuleId>>,
}

impl RuleSet {
    /// Validate `rules` and index them.
    ///
    /// # Errors
    ///
    /// - [`RuleError::EmptyRuleSet`] when `rules` is empty
    /// - [`RuleError::InvalidRule`] when a rule breaks an invariant
    /// - [`RuleError::DuplicateRule`] when two rules share an id
    pub fn build(generation: GenerationId, rules: Vec<Rule>) -> Result<Self, RuleError> {
        if rules.is_empty() {
            return Err(RuleError::EmptyRuleSet);
        }

        let mut by_id = BTreeMap::new();
        let mut triggers: BTreeMap<String, Vec<RuleId>> = BTreeMap::new();
        for rule in rules {
            rule.validate()?;
            if by_id.contains_key(&rule.id) {
                return Err(RuleError::DuplicateRule(rule.id));
            }
            if let Some(topic) = rule.trigger_topic() {
                triggers
                    .entry(topic.to_string())
                    .or_default()
                    .push(rule.id.clone());
            }
            by_id.insert(rule.id.clone(), Arc::new(rule));
        }
        for ids in triggers.values_mut() {
            ids.sort();
        }

        Ok(Self {
            generation,
            rules: by_id,
            triggers,
        })
    }

    #[must_use]
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &RuleId) -> Option<&Arc<Rule>> {
        self.rules.get(id)
    }

    /// All rules in ascending id order.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.rules.values()
    }

    /// Schedule rules with their interval, in ascending id order.
    pub fn schedules(&self) -> impl Iterator<Item = (&RuleId, Interval)> {
        self.rules
            .iter()
            .filter_map(|(id, rule)| rule.interval().map(|interval| (id, interval)))
    }

    /// Trigger filters and the rules listening on each, ordered by filter.
    pub fn triggers(&self) -> impl Iterator<Item = (&str, &[RuleId])> {
        self.triggers
            .iter()
            .map(|(topic, ids)| (topic.as_str(), ids.as_slice()))
    }

    /// Rules triggered by exactly `topic`.
    #[must_use]
    pub fn triggered_by(&self, topic: &str) -> &[RuleId] {
        self.triggers
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Distinct trigger filters to subscribe to.
    #[must_use]
    pub fn trigger_topics(&self) -> BTreeSet<String> {
        self.triggers.keys().cloned().collect()
    }

    /// Copy of the rules, replacing or inserting `rule`.
    #[must_use]
    pub fn with_rule(&self, rule: Rule) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .rules
            .values()
            .filter(|existing| existing.id != rule.id)
            .map(|existing| Rule::clone(existing))
            .collect();
        rules.push(rule);
        rules
    }

    /// Copy of the rules without `id`.
    #[must_use]
    pub fn without_rule(&self, id: &RuleId) -> Vec<Rule> {
        self.rules
            .values()
            .filter(|existing| existing.id != *id)
            .map(|existing| Rule::clone(existing))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::rule::Action;

    fn trigger_rule(ruleset: &str, name: &str, topic: &str) -> Rule {
        Rule::builder()
            .id(RuleId::new(ruleset, name))
            .trigger(topic)
            .action(Action::publish("out", name))
            .build()
            .unwrap()
    }

    fn schedule_rule(ruleset: &str, name: &str, secs: u64) -> Rule {
        Rule::builder()
            .id(RuleId::new(ruleset, name))
            .schedule(Interval::from_secs(secs).unwrap())
            .action(Action::publish("tick", name))
            .build()
            .unwrap()
    }

    #[test]
    fn should_index_rules_in_ascending_order() {
        let set = RuleSet::build(
            GenerationId::new(1),
            vec![
                trigger_rule("b", "one", "in"),
                trigger_rule("a", "two", "in"),
                schedule_rule("a", "beat", 10),
            ],
        )
        .unwrap();

        let ids: Vec<_> = set.rules().map(|rule| rule.id.to_string()).collect();
        assert_eq!(ids, ["a/beat", "a/two", "b/one"]);
        assert_eq!(
            set.triggered_by("in"),
            &[RuleId::new("a", "two"), RuleId::new("b", "one")]
        );
        assert!(set.triggered_by("other").is_empty());
        assert_eq!(set.schedules().count(), 1);
        assert_eq!(set.generation(), GenerationId::new(1));
    }

    #[test]
    fn should_collect_distinct_trigger_topics() {
        let set = RuleSet::build(
            GenerationId::new(1),
            vec![
                trigger_rule("a", "1", "x"),
                trigger_rule("a", "2", "x"),
                trigger_rule("a", "3", "y"),
            ],
        )
        .unwrap();
        let topics: Vec<_> = set.trigger_topics().into_iter().collect();
        assert_eq!(topics, ["x", "y"]);
    }

    #[test]
    fn should_reject_empty_set() {
        let result = RuleSet::build(GenerationId::new(1), vec![]);
        assert!(matches!(result, Err(RuleError::EmptyRuleSet)));
    }

    #[test]
    fn should_reject_duplicate_ids() {
        let result = RuleSet::build(
            GenerationId::new(1),
            vec![trigger_rule("a", "1", "x"), trigger_rule("a", "1", "y")],
        );
        assert!(matches!(result, Err(RuleError::DuplicateRule(id)) if id == RuleId::new("a", "1")));
    }

    #[test]
    fn should_revalidate_rules_built_without_builder() {
        let broken = Rule {
            id: RuleId::new("a", "broken"),
            kind: crate::rule::RuleKind::Trigger {
                topic: "in".to_string(),
            },
            conditions: vec![],
            actions: vec![],
        };
        let result = RuleSet::build(GenerationId::new(1), vec![broken]);
        assert!(matches!(
            result,
            Err(RuleError::InvalidRule {
                reason: ValidationError::NoActions,
                ..
            })
        ));
    }

    #[test]
    fn should_replace_and_remove_rules() {
        let set = RuleSet::build(
            GenerationId::new(1),
            vec![trigger_rule("a", "1", "x"), trigger_rule("a", "2", "y")],
        )
        .unwrap();

        let replaced = set.with_rule(trigger_rule("a", "1", "z"));
        assert_eq!(replaced.len(), 2);
        assert!(replaced.iter().any(|r| r.trigger_topic() == Some("z")));
        assert!(!replaced.iter().any(|r| r.trigger_topic() == Some("x")));

        let removed = set.without_rule(&RuleId::new("a", "2"));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, RuleId::new("a", "1"));
    }
}
