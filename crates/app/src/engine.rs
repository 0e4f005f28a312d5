//! Engine coordinator — wires the rule store, matcher, scheduler and
//! dispatcher together and owns the lifecycle.
//!
//! ```text
//! Stopped ──start──▶ Starting ──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                       │
//!                       └── failure ──▶ Stopped
//! ```
//!
//! While running, a single task serializes inbound messages, scheduler
//! deadlines and rule generation changes. Fired rules are handed to the
//! [`Dispatcher`], which publishes their actions on a bounded worker pool.

mod control;
mod event_loop;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mqttrules_domain::error::RuleError;
use mqttrules_domain::event::EngineEvent;
use mqttrules_domain::id::GenerationId;
use mqttrules_domain::parameter::Parameter;
use mqttrules_domain::rule::Rule;
use mqttrules_domain::rule_set::RuleSet;

use self::control::ControlTopics;
use self::event_loop::{EventLoop, desired_filters};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::event_bus::InProcessEventBus;
use crate::matcher::Matcher;
use crate::parameters::ParameterStore;
use crate::ports::{EventPublisher, InboundMessage, MqttClient, MqttError};
use crate::retry::RetryPolicy;
use crate::rule_store::RuleStore;
use crate::scheduler::Scheduler;

/// Lifecycle state of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// An operation was requested in a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {operation} engine while {state}")]
pub struct EngineStateError {
    pub operation: &'static str,
    pub state: EngineState,
}

/// Errors returned by the [`Engine`] lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid rule set")]
    Rules(#[from] RuleError),

    #[error(transparent)]
    State(#[from] EngineStateError),

    #[error("unable to subscribe to {topic}")]
    Subscribe {
        topic: String,
        #[source]
        source: MqttError,
    },
}

struct Running<C> {
    client: Arc<C>,
    dispatcher: Dispatcher<C, InProcessEventBus>,
    shutdown: CancellationToken,
    event_loop: JoinHandle<BTreeSet<String>>,
}

/// The rule engine.
///
/// The MQTT client is handed over at [`start`](Self::start) and released at
/// [`stop`](Self::stop); the engine can be started again afterwards.
pub struct Engine<C> {
    config: EngineConfig,
    parameters: BTreeMap<String, Parameter>,
    rules: Arc<RuleStore>,
    events: Arc<InProcessEventBus>,
    state: Arc<watch::Sender<EngineState>>,
    running: Option<Running<C>>,
}

impl<C: MqttClient + 'static> Engine<C> {
    /// Create a stopped engine with the initial parameter definitions.
    #[must_use]
    pub fn new(config: EngineConfig, parameters: BTreeMap<String, Parameter>) -> Self {
        let events = Arc::new(InProcessEventBus::new(config.event_capacity));
        Self {
            config,
            parameters,
            rules: Arc::new(RuleStore::new()),
            events,
            state: Arc::new(watch::Sender::new(EngineState::Stopped)),
            running: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// A receiver notified on every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Engine events (rule loads, fires, failed actions, cancellations).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The active rule generation.
    #[must_use]
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.current()
    }

    /// Load `rules`, subscribe to every needed topic and start processing
    /// `inbound` messages.
    ///
    /// # Errors
    ///
    /// - [`EngineError::State`] unless the engine is stopped
    /// - [`EngineError::Rules`] when `rules` is not a valid rule set
    /// - [`EngineError::Subscribe`] when a subscription fails; subscriptions
    ///   made so far are rolled back
    ///
    /// The engine is stopped again after any error. Whatever a crashed
    /// event loop left behind is released first.
    #[tracing::instrument(skip_all)]
    pub async fn start(
        &mut self,
        client: Arc<C>,
        inbound: mpsc::Receiver<InboundMessage>,
        rules: Vec<Rule>,
    ) -> Result<GenerationId, EngineError> {
        self.transition("start", EngineState::Stopped, EngineState::Starting)?;
        self.release().await;
        match self.launch(client, inbound, rules).await {
            Ok((generation, running)) => {
                self.running = Some(running);
                if self.transition("start", EngineState::Starting, EngineState::Running).is_ok() {
                    tracing::info!(%generation, "engine running");
                }
                Ok(generation)
            }
            Err(err) => {
                self.state.send_replace(EngineState::Stopped);
                tracing::error!(%err, "engine failed to start");
                Err(err)
            }
        }
    }

    async fn launch(
        &self,
        client: Arc<C>,
        inbound: mpsc::Receiver<InboundMessage>,
        rules: Vec<Rule>,
    ) -> Result<(GenerationId, Running<C>), EngineError> {
        let generation = self.rules.load(rules)?;
        let snapshot = self.rules.current();
        let watcher = self.rules.watch();

        let parameters = ParameterStore::new(self.parameters.clone());
        let control = self
            .config
            .rule_updates
            .then(|| ControlTopics::new(self.config.prefix.clone()));

        let mut subscriptions = BTreeSet::new();
        for filter in desired_filters(&snapshot, &parameters, control.as_ref()) {
            if let Err(source) = client.subscribe(&filter, self.config.inbound_qos).await {
                rollback(client.as_ref(), &subscriptions).await;
                return Err(EngineError::Subscribe {
                    topic: filter,
                    source,
                });
            }
            tracing::debug!(%filter, "subscribed");
            subscriptions.insert(filter);
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&client),
            Arc::clone(&self.events),
            RetryPolicy::from(&self.config.retry),
            self.config.worker_pool_size,
        );
        let shutdown = CancellationToken::new();
        let event_loop = EventLoop {
            client: Arc::clone(&client),
            dispatcher: dispatcher.clone(),
            events: Arc::clone(&self.events),
            rules: Arc::clone(&self.rules),
            scheduler: Scheduler::new(&snapshot, Instant::now()),
            snapshot: Arc::clone(&snapshot),
            watcher,
            matcher: Matcher::new(self.config.topic_matching),
            parameters,
            control,
            subscriptions,
            inbound_qos: self.config.inbound_qos,
            shutdown: shutdown.clone(),
        };
        let event_loop = tokio::spawn(supervise(
            tokio::spawn(event_loop.run(inbound)),
            Arc::clone(&self.state),
        ));

        self.events.publish(EngineEvent::RulesLoaded {
            generation,
            rules: snapshot.len(),
        });

        Ok((
            generation,
            Running {
                client,
                dispatcher,
                shutdown,
                event_loop,
            },
        ))
    }

    /// Replace the active rules with `rules` as a new generation.
    ///
    /// The event loop picks the new generation up and adjusts the scheduler
    /// and subscriptions.
    ///
    /// # Errors
    ///
    /// - [`EngineError::State`] unless the engine is running
    /// - [`EngineError::Rules`] when `rules` is invalid; the previous
    ///   generation stays active
    #[tracing::instrument(skip_all)]
    pub fn reload(&self, rules: Vec<Rule>) -> Result<GenerationId, EngineError> {
        let state = self.state();
        if state != EngineState::Running {
            return Err(EngineStateError {
                operation: "reload",
                state,
            }
            .into());
        }
        let generation = self.rules.load(rules)?;
        tracing::info!(%generation, "rules reloaded");
        Ok(generation)
    }

    /// Stop processing, unsubscribe, drain in-flight dispatches and release
    /// the client.
    ///
    /// After an event loop crash the engine is already stopped; `stop` then
    /// only releases the remaining dispatches and the client.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::State`] unless the engine is running or left
    /// behind by a crashed event loop.
    #[tracing::instrument(skip_all)]
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        if let Err(err) = self.transition("stop", EngineState::Running, EngineState::Stopping) {
            if err.state == EngineState::Stopped && self.running.is_some() {
                self.release().await;
                return Ok(());
            }
            return Err(err.into());
        }

        self.release().await;
        self.state.send_replace(EngineState::Stopped);
        tracing::info!("engine stopped");
        Ok(())
    }

    /// Shut the event loop down, unsubscribe, drain in-flight dispatches and
    /// drop the client.
    async fn release(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.shutdown.cancel();
        let subscriptions = match running.event_loop.await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::error!(%err, "event loop supervisor failed");
                BTreeSet::new()
            }
        };
        rollback(running.client.as_ref(), &subscriptions).await;

        running.dispatcher.drain(self.config.stop_grace()).await;
    }

    fn transition(
        &self,
        operation: &'static str,
        from: EngineState,
        to: EngineState,
    ) -> Result<(), EngineStateError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                outcome = Err(EngineStateError {
                    operation,
                    state: *state,
                });
                false
            }
        });
        outcome
    }
}

/// Wait for the event loop and hand back its subscriptions.
///
/// A crashed loop moves a starting or running engine to `Stopped`, so
/// `state()` and `reload()` stop reporting a live engine.
async fn supervise(
    event_loop: JoinHandle<BTreeSet<String>>,
    state: Arc<watch::Sender<EngineState>>,
) -> BTreeSet<String> {
    match event_loop.await {
        Ok(subscriptions) => subscriptions,
        Err(err) => {
            tracing::error!(%err, "event loop crashed, engine stopped");
            state.send_if_modified(|state| match state {
                EngineState::Starting | EngineState::Running => {
                    *state = EngineState::Stopped;
                    true
                }
                EngineState::Stopping | EngineState::Stopped => false,
            });
            BTreeSet::new()
        }
    }
}

async fn rollback<C: MqttClient>(client: &C, subscriptions: &BTreeSet<String>) {
    for filter in subscriptions {
        if let Err(err) = client.unsubscribe(filter).await {
            tracing::warn!(%filter, %err, "unable to unsubscribe");
        }
    }
}
