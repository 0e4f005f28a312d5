//! Dispatcher — publishes the actions of fired rules.
//!
//! Every fire runs on its own task, bounded by a semaphore-backed worker
//! pool. Within one fire, actions are published sequentially in declared
//! order; each action has its own retry budget for transient failures.
//! Shutdown closes the pool, lets in-flight fires finish within a grace
//! period, then cancels what is left.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use mqttrules_domain::event::{EngineEvent, FireEvent};
use mqttrules_domain::id::{FireId, RuleId};

use crate::ports::{EventPublisher, MqttClient, MqttError, OutboundMessage};
use crate::retry::RetryPolicy;

/// Outcome of a fire whose actions were all published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchAck {
    pub fire_id: FireId,
    pub published: usize,
}

/// Why a fire did not publish all of its actions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Some actions could not be published; the others were.
    #[error("rule {rule_id}: action(s) {failed:?} failed")]
    ActionsFailed {
        rule_id: RuleId,
        /// Indices of the failed actions, ascending.
        failed: Vec<usize>,
    },
    /// The engine stopped before every action was attempted.
    #[error("rule {rule_id}: dispatch cancelled after {published} action(s)")]
    Cancelled { rule_id: RuleId, published: usize },
}

enum PublishFailure {
    Cancelled,
    Exhausted { attempts: u32, error: MqttError },
}

/// Publishes fired rules through the MQTT client on a bounded worker pool.
pub struct Dispatcher<C, P> {
    client: Arc<C>,
    events: Arc<P>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<C, P> Clone for Dispatcher<C, P> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            events: Arc::clone(&self.events),
            retry: self.retry,
            permits: Arc::clone(&self.permits),
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C, P> Dispatcher<C, P>
where
    C: MqttClient + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    /// `workers` is clamped to at least one.
    #[must_use]
    pub fn new(client: Arc<C>, events: Arc<P>, retry: RetryPolicy, workers: usize) -> Self {
        Self {
            client,
            events,
            retry,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Number of fires currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Run `event` on the worker pool.
    ///
    /// Waits for a free worker, which is how a saturated pool pushes back on
    /// the caller. Returns `false` when the dispatcher is shutting down and
    /// the fire was dropped.
    pub async fn submit(&self, event: FireEvent, messages: Vec<OutboundMessage>) -> bool {
        if self.tracker.is_closed() {
            tracing::debug!(rule_id = %event.rule_id, "dispatcher closed, dropping fire");
            return false;
        }
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            tracing::debug!(rule_id = %event.rule_id, "dispatcher cancelled, dropping fire");
            return false;
        };

        let this = self.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            match this.fire(&event, &messages).await {
                Ok(ack) => {
                    tracing::debug!(
                        rule_id = %event.rule_id,
                        fire_id = %ack.fire_id,
                        published = ack.published,
                        "rule dispatched"
                    );
                }
                Err(err) => {
                    tracing::warn!(fire_id = %event.id, %err, "rule dispatch incomplete");
                }
            }
        });
        true
    }

    /// Publish `messages` for `event`, in order.
    ///
    /// A failed action is reported as [`EngineEvent::ActionFailed`] and does
    /// not prevent the following actions from being published.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ActionsFailed`] when at least one action failed
    /// - [`DispatchError::Cancelled`] when the dispatcher was cancelled
    pub async fn fire(
        &self,
        event: &FireEvent,
        messages: &[OutboundMessage],
    ) -> Result<DispatchAck, DispatchError> {
        let mut published = 0;
        let mut failed = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            match self.publish_with_retry(event, message).await {
                Ok(()) => published += 1,
                Err(PublishFailure::Cancelled) => {
                    tracing::info!(
                        rule_id = %event.rule_id,
                        fire_id = %event.id,
                        published,
                        "dispatch cancelled"
                    );
                    self.events.publish(EngineEvent::DispatchCancelled {
                        rule_id: event.rule_id.clone(),
                        fire_id: event.id,
                        published,
                    });
                    return Err(DispatchError::Cancelled {
                        rule_id: event.rule_id.clone(),
                        published,
                    });
                }
                Err(PublishFailure::Exhausted { attempts, error }) => {
                    tracing::error!(
                        rule_id = %event.rule_id,
                        fire_id = %event.id,
                        action_index = index,
                        topic = %message.topic,
                        attempts,
                        err = %error,
                        "action failed"
                    );
                    self.events.publish(EngineEvent::ActionFailed {
                        rule_id: event.rule_id.clone(),
                        fire_id: event.id,
                        action_index: index,
                        attempts,
                        cause: error.to_string(),
                    });
                    failed.push(index);
                }
            }
        }

        if failed.is_empty() {
            Ok(DispatchAck {
                fire_id: event.id,
                published,
            })
        } else {
            Err(DispatchError::ActionsFailed {
                rule_id: event.rule_id.clone(),
                failed,
            })
        }
    }

    async fn publish_with_retry(
        &self,
        event: &FireEvent,
        message: &OutboundMessage,
    ) -> Result<(), PublishFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(PublishFailure::Cancelled),
                result = self.client.publish(message.clone()) => result,
            };
            let error = match result {
                Ok(_) => return Ok(()),
                Err(error) => error,
            };
            if !error.is_transient() || !self.retry.should_retry(attempt) {
                return Err(PublishFailure::Exhausted {
                    attempts: attempt,
                    error,
                });
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                rule_id = %event.rule_id,
                topic = %message.topic,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                err = %error,
                "publish failed, retrying"
            );
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(PublishFailure::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Stop accepting fires and wait for in-flight ones.
    ///
    /// Fires still running after `grace` are cancelled; their remaining
    /// actions are never published.
    pub async fn drain(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "grace period elapsed, cancelling in-flight dispatches"
            );
            self.cancel.cancel();
            self.tracker.wait().await;
        }
    }
}
