//! The serialized engine task: inbound messages, scheduler ticks and rule
//! generation changes are all handled here, one at a time.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mqttrules_domain::event::{EngineEvent, FireEvent, MatchEvent};
use mqttrules_domain::id::RuleId;
use mqttrules_domain::rule::{Qos, Rule, RuleDefinition};
use mqttrules_domain::rule_set::RuleSet;

use super::control::{ControlMessage, ControlTopics};
use crate::dispatcher::Dispatcher;
use crate::event_bus::InProcessEventBus;
use crate::matcher::Matcher;
use crate::parameters::ParameterStore;
use crate::ports::{EventPublisher, InboundMessage, MqttClient, OutboundMessage};
use crate::rule_store::RuleStore;
use crate::scheduler::Scheduler;

/// Every filter the engine must be subscribed to.
pub(crate) fn desired_filters(
    rules: &RuleSet,
    parameters: &ParameterStore,
    control: Option<&ControlTopics>,
) -> BTreeSet<String> {
    let mut filters = rules.trigger_topics();
    filters.extend(parameters.topics());
    if let Some(control) = control {
        filters.extend(control.filters());
    }
    filters
}

/// Wait for the next scheduler deadline, forever when nothing is scheduled.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) struct EventLoop<C> {
    pub(crate) client: Arc<C>,
    pub(crate) dispatcher: Dispatcher<C, InProcessEventBus>,
    pub(crate) events: Arc<InProcessEventBus>,
    pub(crate) rules: Arc<RuleStore>,
    pub(crate) snapshot: Arc<RuleSet>,
    pub(crate) watcher: watch::Receiver<Arc<RuleSet>>,
    pub(crate) matcher: Matcher,
    pub(crate) scheduler: Scheduler,
    pub(crate) parameters: ParameterStore,
    pub(crate) control: Option<ControlTopics>,
    pub(crate) subscriptions: BTreeSet<String>,
    pub(crate) inbound_qos: Qos,
    pub(crate) shutdown: CancellationToken,
}

impl<C: MqttClient + 'static> EventLoop<C> {
    /// Run until `shutdown` is cancelled, then hand back the active
    /// subscriptions.
    pub(crate) async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) -> BTreeSet<String> {
        let mut inbound_open = true;
        let shutdown = self.shutdown.clone();

        loop {
            let deadline = self.scheduler.next_deadline();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Ok(()) = self.watcher.changed() => self.on_generation().await,
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.on_message(message).await,
                    None => {
                        tracing::warn!("inbound channel closed, only schedule rules remain active");
                        inbound_open = false;
                    }
                },
                () = sleep_until(deadline) => self.on_tick().await,
            }
        }

        tracing::debug!("event loop stopped");
        self.subscriptions
    }

    async fn on_generation(&mut self) {
        let snapshot = Arc::clone(&self.watcher.borrow_and_update());
        self.snapshot = snapshot;
        self.scheduler.resync(&self.snapshot, Instant::now());
        self.sync_subscriptions().await;

        let generation = self.snapshot.generation();
        let rules = self.snapshot.len();
        tracing::info!(%generation, rules, "rule generation activated");
        self.events
            .publish(EngineEvent::RulesLoaded { generation, rules });
    }

    async fn on_tick(&mut self) {
        for fire in self.scheduler.tick(Instant::now()) {
            self.run_rule(fire, None).await;
        }
    }

    async fn on_message(&mut self, message: InboundMessage) {
        tracing::trace!(topic = %message.topic, bytes = message.payload.len(), "message received");

        if let Some(control) = self.control.as_ref().and_then(|c| c.parse(&message.topic)) {
            match control {
                ControlMessage::Rule(id) => self.on_rule_update(id, &message.payload),
                ControlMessage::Parameter(name) => {
                    if self.parameters.define(name, &message.payload) {
                        self.sync_subscriptions().await;
                    }
                    tracing::info!(parameter = name, "parameter updated");
                }
            }
        }

        let updated =
            self.parameters
                .update_from_message(&self.matcher, &message.topic, &message.payload);
        if !updated.is_empty() {
            tracing::debug!(topic = %message.topic, parameters = ?updated, "parameters updated");
        }

        let event = MatchEvent::new(message.topic, message.payload);
        for fire in self.matcher.on_message(&self.snapshot, &event) {
            self.run_rule(fire, Some(&event.payload)).await;
        }
    }

    fn on_rule_update(&self, id: RuleId, payload: &[u8]) {
        let result = if payload.is_empty() {
            if self.snapshot.get(&id).is_none() {
                tracing::debug!(rule_id = %id, "removal of unknown rule ignored");
                return;
            }
            self.rules.remove(&id)
        } else {
            let definition = match serde_json::from_slice::<RuleDefinition>(payload) {
                Ok(definition) => definition,
                Err(err) => {
                    tracing::warn!(rule_id = %id, %err, "malformed rule definition");
                    return;
                }
            };
            Rule::from_definition(id.clone(), definition).and_then(|rule| self.rules.upsert(rule))
        };

        match result {
            Ok(generation) => tracing::info!(rule_id = %id, %generation, "rule update accepted"),
            Err(err) => tracing::warn!(rule_id = %id, %err, "rule update rejected"),
        }
    }

    async fn run_rule(&self, fire: FireEvent, payload: Option<&[u8]>) {
        let Some(rule) = self.snapshot.get(&fire.rule_id).cloned() else {
            return;
        };

        let messages = {
            let ctx = self.parameters.context(payload);
            if !rule.conditions_hold(&ctx) {
                tracing::debug!(rule_id = %rule.id, "conditions not met");
                return;
            }
            let payloads = rule.render_payloads(&ctx, |index, placeholder| {
                tracing::warn!(
                    rule_id = %rule.id,
                    action_index = index,
                    ?placeholder,
                    "unresolved placeholder"
                );
            });
            rule.actions
                .iter()
                .zip(payloads)
                .map(|(action, payload)| OutboundMessage::from_action(action, payload))
                .collect::<Vec<_>>()
        };

        tracing::info!(
            rule_id = %fire.rule_id,
            fire_id = %fire.id,
            cause = %fire.cause,
            "rule fired"
        );
        self.events.publish(EngineEvent::RuleFired(fire.clone()));

        let rule_id = fire.rule_id.clone();
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                tracing::debug!(%rule_id, "engine stopping, fire dropped");
            }
            _ = self.dispatcher.submit(fire, messages) => {}
        }
    }

    async fn sync_subscriptions(&mut self) {
        let desired = desired_filters(&self.snapshot, &self.parameters, self.control.as_ref());

        let stale: Vec<String> = self.subscriptions.difference(&desired).cloned().collect();
        for filter in stale {
            match self.client.unsubscribe(&filter).await {
                Ok(()) => tracing::debug!(%filter, "unsubscribed"),
                Err(err) => tracing::warn!(%filter, %err, "unable to unsubscribe"),
            }
            self.subscriptions.remove(&filter);
        }

        let missing: Vec<String> = desired.difference(&self.subscriptions).cloned().collect();
        for filter in missing {
            match self.client.subscribe(&filter, self.inbound_qos).await {
                Ok(()) => {
                    tracing::debug!(%filter, "subscribed");
                    self.subscriptions.insert(filter);
                }
                Err(err) => tracing::warn!(%filter, %err, "unable to subscribe"),
            }
        }
    }
}
