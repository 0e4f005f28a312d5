//! Event bus port — publish/subscribe for engine events.

use mqttrules_domain::event::EngineEvent;

/// Publishes engine events to interested subscribers.
///
/// Publishing never fails from the caller's point of view: an event nobody
/// listens to is simply dropped.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: EngineEvent);
}

impl<T: EventPublisher + ?Sized> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: EngineEvent) {
        (**self).publish(event);
    }
}
