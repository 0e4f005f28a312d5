//! Engine configuration, deserialized from the `[engine]` table.

use std::time::Duration;

use serde::Deserialize;

use mqttrules_domain::rule::Qos;
use mqttrules_domain::topic::TopicMatching;

use crate::retry::RetryPolicy;

/// Tuning knobs of the [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prepended to the `rule/…` and `param/…` control topics.
    pub prefix: String,
    /// Accept rule and parameter updates over MQTT.
    pub rule_updates: bool,
    /// How trigger topics are compared with incoming topics.
    pub topic_matching: TopicMatching,
    /// Maximum number of fires dispatched concurrently.
    pub worker_pool_size: usize,
    /// How long `stop` waits for in-flight dispatches before cancelling them.
    pub stop_grace_secs: u64,
    /// Capacity of the engine event bus.
    pub event_capacity: usize,
    /// QoS requested for every subscription.
    pub inbound_qos: Qos,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            rule_updates: true,
            topic_matching: TopicMatching::Exact,
            worker_pool_size: 8,
            stop_grace_secs: 5,
            event_capacity: 256,
            inbound_qos: Qos::AtLeastOnce,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Backoff applied to transient publish failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per action, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}
