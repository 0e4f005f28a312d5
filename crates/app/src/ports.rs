//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the rule engine and the outside world.
//! They are defined here (in `app`) so that both the engine and the adapter
//! layer can depend on them without creating circular dependencies.

pub mod event_bus;
pub mod mqtt;

pub use event_bus::EventPublisher;
pub use mqtt::{Ack, InboundMessage, MqttClient, MqttError, OutboundMessage};
