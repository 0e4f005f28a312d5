//! Rule store — the single owner of the active rule generation.
//!
//! Readers take an `Arc<RuleSet>` snapshot and never observe a partially
//! updated set. Writers validate the candidate rules and swap the snapshot
//! in one step while holding the channel lock, so generations increase
//! monotonically even when loads race.

use std::sync::Arc;

use tokio::sync::watch;

use mqttrules_domain::error::RuleError;
use mqttrules_domain::id::{GenerationId, RuleId};
use mqttrules_domain::rule::Rule;
use mqttrules_domain::rule_set::RuleSet;

/// Holds the current [`RuleSet`] and notifies watchers of new generations.
#[derive(Debug)]
pub struct RuleStore {
    sender: watch::Sender<Arc<RuleSet>>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleStore {
    /// An empty store at generation 0.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(RuleSet::default()));
        Self { sender }
    }

    /// Validate `rules` and make them the active generation.
    ///
    /// # Errors
    ///
    /// Returns a [`RuleError`] when the rules are invalid. The previous
    /// generation stays active.
    pub fn load(&self, rules: Vec<Rule>) -> Result<GenerationId, RuleError> {
        self.replace(|_| rules)
    }

    /// Add `rule`, or replace the rule with the same id, as a new generation.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn upsert(&self, rule: Rule) -> Result<GenerationId, RuleError> {
        self.replace(|current| current.with_rule(rule))
    }

    /// Remove the rule `id` as a new generation.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load); removing the last rule yields
    /// [`RuleError::EmptyRuleSet`].
    pub fn remove(&self, id: &RuleId) -> Result<GenerationId, RuleError> {
        self.replace(|current| current.without_rule(id))
    }

    /// The active snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<RuleSet> {
        Arc::clone(&self.sender.borrow())
    }

    /// A receiver notified each time a new generation becomes active.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<RuleSet>> {
        self.sender.subscribe()
    }

    fn replace<F>(&self, candidate: F) -> Result<GenerationId, RuleError>
    where
        F: FnOnce(&RuleSet) -> Vec<Rule>,
    {
        let mut outcome = Err(RuleError::EmptyRuleSet);
        self.sender.send_if_modified(|current| {
            let generation = current.generation().next();
            match RuleSet::build(generation, candidate(&**current)) {
                Ok(next) => {
                    *current = Arc::new(next);
                    outcome = Ok(generation);
                    true
                }
                Err(err) => {
                    outcome = Err(err);
                    false
                }
            }
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqttrules_domain::interval::Interval;
    use mqttrules_domain::rule::Action;

    fn trigger_rule(name: &str, topic: &str) -> Rule {
        Rule::builder()
            .id(RuleId::new("test", name))
            .trigger(topic)
            .action(Action::publish("triggeredby/trigger", "testing"))
            .build()
            .unwrap()
    }

    #[test]
    fn should_start_empty_at_generation_zero() {
        let store = RuleStore::new();
        let current = store.current();
        assert!(current.is_empty());
        assert_eq!(current.generation(), GenerationId::default());
    }

    #[test]
    fn should_return_loaded_rules_from_current() {
        let store = RuleStore::new();
        let rules = vec![
            trigger_rule("b", "rule/test/b"),
            trigger_rule("a", "rule/test/a"),
        ];

        let generation = store.load(rules.clone()).unwrap();

        let current = store.current();
        assert_eq!(current.generation(), generation);
        assert_eq!(current.len(), 2);
        for rule in &rules {
            assert_eq!(current.get(&rule.id).map(|r| &**r), Some(rule));
        }
    }

    #[test]
    fn should_increase_generation_on_each_load() {
        let store = RuleStore::new();
        let first = store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();
        let second = store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();
        assert!(second > first);
    }

    #[test]
    fn should_keep_previous_generation_when_load_fails() {
        let store = RuleStore::new();
        let generation = store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();

        let duplicate = vec![
            trigger_rule("a", "rule/test/a"),
            trigger_rule("a", "rule/test/other"),
        ];
        let err = store.load(duplicate).unwrap_err();

        assert!(matches!(err, RuleError::DuplicateRule(_)));
        assert_eq!(store.current().generation(), generation);
        assert_eq!(store.current().len(), 1);
    }

    #[test]
    fn should_reject_empty_load() {
        let store = RuleStore::new();
        let err = store.load(Vec::new()).unwrap_err();
        assert!(matches!(err, RuleError::EmptyRuleSet));
    }

    #[test]
    fn should_upsert_and_remove_rules() {
        let store = RuleStore::new();
        store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();

        let schedule = Rule::builder()
            .id(RuleId::new("test", "tick"))
            .schedule(Interval::from_secs(10).unwrap())
            .action(Action::publish("heartbeat", "alive"))
            .build()
            .unwrap();
        store.upsert(schedule.clone()).unwrap();
        assert_eq!(store.current().len(), 2);

        store.upsert(trigger_rule("a", "rule/test/renamed")).unwrap();
        let current = store.current();
        assert_eq!(current.len(), 2);
        assert_eq!(
            current.triggered_by("rule/test/renamed"),
            &[RuleId::new("test", "a")]
        );

        store.remove(&schedule.id).unwrap();
        assert_eq!(store.current().len(), 1);
    }

    #[test]
    fn should_refuse_to_remove_last_rule() {
        let store = RuleStore::new();
        store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();
        let err = store.remove(&RuleId::new("test", "a")).unwrap_err();
        assert!(matches!(err, RuleError::EmptyRuleSet));
        assert_eq!(store.current().len(), 1);
    }

    #[tokio::test]
    async fn should_notify_watchers_of_new_generation() {
        let store = RuleStore::new();
        let mut watcher = store.watch();

        let generation = store.load(vec![trigger_rule("a", "rule/test/a")]).unwrap();

        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow_and_update().generation(), generation);
    }

    #[test]
    fn should_not_notify_watchers_on_failed_load() {
        let store = RuleStore::new();
        let watcher = store.watch();

        let _ = store.load(Vec::new());

        assert!(!watcher.has_changed().unwrap());
    }

    #[test]
    fn should_assign_distinct_generations_under_concurrent_loads() {
        let store = Arc::new(RuleStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.load(vec![trigger_rule("a", "rule/test/a")]))
            })
            .collect();

        let mut generations: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect();
        generations.sort();
        generations.dedup();

        assert_eq!(generations.len(), 8);
        assert_eq!(store.current().generation(), GenerationId::new(8));
    }
}
