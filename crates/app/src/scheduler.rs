//! Scheduler — fires schedule rules on their interval.
//!
//! The scheduler is a plain state machine driven by the engine clock: it
//! never sleeps itself. Each call to [`Scheduler::tick`] returns the rules
//! that became due since the previous call.

use std::collections::BTreeMap;

use tokio::time::Instant;

use mqttrules_domain::event::{FireCause, FireEvent};
use mqttrules_domain::id::RuleId;
use mqttrules_domain::interval::Interval;
use mqttrules_domain::rule_set::RuleSet;

#[derive(Debug, Clone, Copy)]
struct Entry {
    interval: Interval,
    next_fire: Instant,
}

impl Entry {
    fn starting_at(interval: Interval, now: Instant) -> Self {
        Self {
            interval,
            next_fire: now + interval.as_duration(),
        }
    }

    /// Move `next_fire` to the first phase-aligned instant strictly after `now`.
    fn advance_past(&mut self, now: Instant) {
        let period = self.interval.as_duration();
        let behind = now.saturating_duration_since(self.next_fire).as_nanos();
        let steps = u32::try_from(behind / period.as_nanos() + 1).unwrap_or(u32::MAX);
        self.next_fire = self
            .next_fire
            .checked_add(period.saturating_mul(steps))
            .unwrap_or(now + period);
    }
}

/// Next-fire bookkeeping for every schedule rule of the active generation.
#[derive(Debug, Default)]
pub struct Scheduler {
    entries: BTreeMap<RuleId, Entry>,
}

impl Scheduler {
    /// Start scheduling every schedule rule of `rules`, first fire one
    /// interval after `now`.
    #[must_use]
    pub fn new(rules: &RuleSet, now: Instant) -> Self {
        let entries = rules
            .schedules()
            .map(|(id, interval)| (id.clone(), Entry::starting_at(interval, now)))
            .collect();
        Self { entries }
    }

    /// Follow a new generation.
    ///
    /// Rules whose id and interval did not change keep their next fire time.
    /// New or modified rules start over from `now`; removed rules are dropped.
    pub fn resync(&mut self, rules: &RuleSet, now: Instant) {
        let previous = std::mem::take(&mut self.entries);
        self.entries = rules
            .schedules()
            .map(|(id, interval)| {
                let entry = previous
                    .get(id)
                    .filter(|entry| entry.interval == interval)
                    .copied()
                    .unwrap_or_else(|| Entry::starting_at(interval, now));
                (id.clone(), entry)
            })
            .collect();
    }

    /// Fire every rule due at `now`, in ascending rule id order.
    ///
    /// A rule fires at most once per call, however many intervals elapsed
    /// since its last fire.
    pub fn tick(&mut self, now: Instant) -> Vec<FireEvent> {
        let mut fired = Vec::new();
        for (id, entry) in &mut self.entries {
            if entry.next_fire <= now {
                entry.advance_past(now);
                fired.push(FireEvent::new(id.clone(), FireCause::Schedule));
            }
        }
        fired
    }

    /// Earliest upcoming fire time, `None` without schedule rules.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.next_fire).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use mqttrules_domain::id::GenerationId;
    use mqttrules_domain::interval::MAX_INTERVAL;
    use mqttrules_domain::rule::{Action, Rule};

    fn schedule_rule(name: &str, secs: u64) -> Rule {
        Rule::builder()
            .id(RuleId::new("test", name))
            .schedule(Interval::from_secs(secs).unwrap())
            .action(Action::publish("heartbeat", name))
            .build()
            .unwrap()
    }

    fn trigger_rule(name: &str) -> Rule {
        Rule::builder()
            .id(RuleId::new("test", name))
            .trigger("rule/test/trigger")
            .action(Action::publish("triggeredby/trigger", "testing"))
            .build()
            .unwrap()
    }

    fn rule_set(rules: Vec<Rule>) -> RuleSet {
        RuleSet::build(GenerationId::new(1), rules).unwrap()
    }

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn fired_ids(events: &[FireEvent]) -> Vec<&str> {
        events.iter().map(|event| event.rule_id.as_str()).collect()
    }

    #[test]
    fn should_only_track_schedule_rules() {
        let rules = rule_set(vec![schedule_rule("tick", 10), trigger_rule("trigger1")]);
        let scheduler = Scheduler::new(&rules, Instant::now());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn should_fire_after_one_interval() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(&rule_set(vec![schedule_rule("tick", 10)]), t0);

        assert!(scheduler.tick(t0 + secs(9)).is_empty());

        let fired = scheduler.tick(t0 + secs(10));
        assert_eq!(fired_ids(&fired), vec!["test/tick"]);
        assert_eq!(fired[0].cause, FireCause::Schedule);

        assert!(scheduler.tick(t0 + secs(15)).is_empty());
        assert_eq!(fired_ids(&scheduler.tick(t0 + secs(20))), vec!["test/tick"]);
    }

    #[test]
    fn should_fire_once_and_stay_phase_aligned_after_delayed_tick() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(&rule_set(vec![schedule_rule("tick", 10)]), t0);

        assert_eq!(scheduler.tick(t0 + secs(10)).len(), 1);
        // the tick at t0+20s is late and happens at t0+35s
        assert_eq!(scheduler.tick(t0 + secs(35)).len(), 1);
        assert_eq!(scheduler.next_deadline(), Some(t0 + secs(40)));
        assert!(scheduler.tick(t0 + secs(39)).is_empty());
        assert_eq!(scheduler.tick(t0 + secs(40)).len(), 1);
    }

    #[test]
    fn should_skip_many_missed_intervals_without_bursting() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(&rule_set(vec![schedule_rule("tick", 1)]), t0);

        assert_eq!(scheduler.tick(t0 + secs(3_600)).len(), 1);
        assert!(scheduler.tick(t0 + secs(3_600)).is_empty());
        assert_eq!(scheduler.next_deadline(), Some(t0 + secs(3_601)));
    }

    #[test]
    fn should_fire_due_rules_in_ascending_id_order() {
        let t0 = Instant::now();
        let rules = rule_set(vec![
            schedule_rule("c", 5),
            schedule_rule("a", 5),
            schedule_rule("b", 30),
        ]);
        let mut scheduler = Scheduler::new(&rules, t0);

        let fired = scheduler.tick(t0 + secs(30));
        assert_eq!(fired_ids(&fired), vec!["test/a", "test/b", "test/c"]);
    }

    #[test]
    fn should_keep_unchanged_entries_on_resync() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(
            &rule_set(vec![schedule_rule("keep", 10), schedule_rule("change", 10)]),
            t0,
        );

        let t1 = t0 + secs(5);
        let next = rule_set(vec![
            schedule_rule("keep", 10),
            schedule_rule("change", 20),
            schedule_rule("new", 10),
        ]);
        scheduler.resync(&next, t1);

        assert_eq!(fired_ids(&scheduler.tick(t0 + secs(10))), vec!["test/keep"]);
        assert_eq!(fired_ids(&scheduler.tick(t1 + secs(10))), vec!["test/new"]);
        assert_eq!(
            fired_ids(&scheduler.tick(t1 + secs(20))),
            vec!["test/change", "test/keep", "test/new"]
        );
    }

    #[test]
    fn should_drop_removed_rules_on_resync() {
        let t0 = Instant::now();
        let mut scheduler = Scheduler::new(
            &rule_set(vec![schedule_rule("a", 10), schedule_rule("b", 10)]),
            t0,
        );

        scheduler.resync(&rule_set(vec![schedule_rule("a", 10)]), t0);

        assert_eq!(scheduler.len(), 1);
        assert_eq!(fired_ids(&scheduler.tick(t0 + secs(10))), vec!["test/a"]);
    }

    #[test]
    fn should_schedule_longest_interval() {
        let t0 = Instant::now();
        let rule = Rule::builder()
            .id(RuleId::new("test", "yearly"))
            .schedule(Interval::new(MAX_INTERVAL).unwrap())
            .action(Action::publish("heartbeat", "yearly"))
            .build()
            .unwrap();
        let mut scheduler = Scheduler::new(&rule_set(vec![rule]), t0);

        assert_eq!(scheduler.next_deadline(), Some(t0 + MAX_INTERVAL));
        assert_eq!(scheduler.tick(t0 + MAX_INTERVAL).len(), 1);
        assert_eq!(scheduler.next_deadline(), Some(t0 + MAX_INTERVAL * 2));
    }

    #[test]
    fn should_have_no_deadline_without_schedule_rules() {
        let scheduler = Scheduler::new(&rule_set(vec![trigger_rule("t")]), Instant::now());
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }
}
