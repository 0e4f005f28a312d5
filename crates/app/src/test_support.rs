//! In-memory doubles of the ports, shared by the unit tests of this crate.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;

use mqttrules_domain::event::EngineEvent;
use mqttrules_domain::rule::Qos;

use crate::ports::{Ack, EventPublisher, MqttClient, MqttError, OutboundMessage};

/// Kind of failure a [`MockMqttClient`] publish can be scripted to return.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotConnected,
    Rejected,
}

impl Failure {
    fn to_error(self) -> MqttError {
        match self {
            Self::NotConnected => MqttError::NotConnected,
            Self::Rejected => MqttError::Rejected("refused by broker".into()),
        }
    }
}

// ── Mock MQTT client ───────────────────────────────────────────

#[derive(Default)]
struct State {
    published: Vec<OutboundMessage>,
    attempts: BTreeMap<String, usize>,
    failures: BTreeMap<String, (Failure, usize)>,
    subscriptions: BTreeSet<String>,
    subscribe_calls: Vec<String>,
    failing_filters: BTreeSet<String>,
    crashing_filters: BTreeSet<String>,
}

/// Records every publish and subscription; publishes can be scripted to fail
/// or to hang until released.
pub struct MockMqttClient {
    state: Mutex<State>,
    held: watch::Sender<BTreeSet<String>>,
}

impl Default for MockMqttClient {
    fn default() -> Self {
        let (held, _) = watch::channel(BTreeSet::new());
        Self {
            state: Mutex::new(State::default()),
            held,
        }
    }
}

impl MockMqttClient {
    /// Fail the next `times` publishes on `topic`.
    pub fn fail_topic(&self, topic: &str, failure: Failure, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(topic.to_string(), (failure, times));
    }

    /// Fail every subscription to `filter`.
    pub fn fail_subscribe(&self, filter: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_filters
            .insert(filter.to_string());
    }

    /// Panic inside the caller's task on any subscription to `filter`.
    pub fn crash_on_subscribe(&self, filter: &str) {
        self.state
            .lock()
            .unwrap()
            .crashing_filters
            .insert(filter.to_string());
    }

    /// Make publishes on `topic` wait until [`release`](Self::release).
    pub fn hold(&self, topic: &str) {
        self.held.send_modify(|held| {
            held.insert(topic.to_string());
        });
    }

    pub fn release(&self, topic: &str) {
        self.held.send_modify(|held| {
            held.remove(topic);
        });
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }

    /// Number of publish calls made on `topic`, failed ones included.
    pub fn attempts(&self, topic: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(topic)
            .copied()
            .unwrap_or_default()
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribe_calls.clone()
    }

    /// Poll until `count` messages were published on `topic`.
    pub async fn wait_for_published(&self, topic: &str, count: usize) {
        for _ in 0..1_000 {
            if self.published_on(topic).len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} message(s) on {topic}");
    }

    fn record_attempt(&self, topic: &str) -> Option<Failure> {
        let mut state = self.state.lock().unwrap();
        *state.attempts.entry(topic.to_string()).or_default() += 1;
        let (failure, remaining) = state.failures.get_mut(topic)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*failure)
    }
}

impl MqttClient for MockMqttClient {
    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<Ack, MqttError>> + Send {
        let mut held = self.held.subscribe();
        async move {
            let topic = message.topic.clone();
            loop {
                let blocked = held.borrow_and_update().contains(&topic);
                if !blocked || held.changed().await.is_err() {
                    break;
                }
            }
            if let Some(failure) = self.record_attempt(&topic) {
                return Err(failure.to_error());
            }
            self.state.lock().unwrap().published.push(message);
            Ok(Ack)
        }
    }

    fn subscribe(
        &self,
        filter: &str,
        _qos: Qos,
    ) -> impl Future<Output = Result<(), MqttError>> + Send {
        let mut state = self.state.lock().unwrap();
        state.subscribe_calls.push(filter.to_string());
        let crash = state.crashing_filters.contains(filter).then(|| filter.to_string());
        let result = if state.failing_filters.contains(filter) {
            Err(Failure::Rejected.to_error())
        } else {
            state.subscriptions.insert(filter.to_string());
            Ok(())
        };
        drop(state);
        async move {
            if let Some(filter) = crash {
                panic!("broker connection crashed while subscribing to {filter}");
            }
            result
        }
    }

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<(), MqttError>> + Send {
        self.state.lock().unwrap().subscriptions.remove(filter);
        async { Ok(()) }
    }
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ── Spy publisher ──────────────────────────────────────────────

#[derive(Default)]
pub struct SpyPublisher {
    events: Mutex<Vec<EngineEvent>>,
}

impl SpyPublisher {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for SpyPublisher {
    fn publish(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}
