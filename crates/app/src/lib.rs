//! # mqttrules-app
//!
//! Application layer — the rule engine core and its **port definitions**.
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `MqttClient` — publish, subscribe, unsubscribe
//!   - `EventPublisher` — fan-out of engine observability events
//! - Hold the active rule generation (`RuleStore`)
//! - Decide *what* fires: `Matcher` for incoming messages, `Scheduler` for
//!   periodic rules
//! - Decide *how* it fires: `Dispatcher` publishes actions on a bounded
//!   worker pool with retry and backoff
//! - Coordinate everything through the `Engine` lifecycle
//!   (`Stopped → Starting → Running → Stopping → Stopped`)
//!
//! ## Dependency rule
//! Depends on `mqttrules-domain` only (plus `tokio`/`tokio-util` for tasks,
//! channels and timers). Never imports adapter crates. Adapters depend on
//! *this* crate, not the reverse.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod event_bus;
pub mod matcher;
pub mod parameters;
pub mod ports;
pub mod retry;
pub mod rule_store;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;
