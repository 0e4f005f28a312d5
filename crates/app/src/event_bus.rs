//! In-process event bus backed by a tokio broadcast channel.

use tokio::sync::broadcast;

use mqttrules_domain::event::EngineEvent;

use crate::ports::EventPublisher;

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped). Slow subscribers lag and lose the oldest
/// events rather than slowing the engine down.
#[derive(Debug)]
pub struct InProcessEventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl InProcessEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: EngineEvent) {
        // fails only when there are zero receivers
        let _ = self.sender.send(event);
    }
}
