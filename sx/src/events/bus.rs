//! Event Bus - pub/sub delivery of exchange outcomes
//!
//! The EventBus uses a tokio broadcast channel so every subscriber sees every
//! outcome. Publishing never blocks, which matters because the exchange
//! publishes from inside the transport's listener callback.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::ExchangeEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Destination for exchange outcomes
///
/// Implementations must not block: `publish` is called from timer tasks and
/// from transport callback threads.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ExchangeEvent);
}

/// Broadcast bus for exchange events
pub struct EventBus {
    tx: broadcast::Sender<ExchangeEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers, returning how many received it
    ///
    /// With no subscribers the event is dropped and 0 is returned.
    pub fn emit(&self, event: ExchangeEvent) -> usize {
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(event_type = event.event_type(), delivered, "EventBus::emit: called");
        delivered
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: ExchangeEvent) {
        if self.emit(event) == 0 {
            debug!(event_type = event.event_type(), "EventBus: outcome published with no subscribers");
        }
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_event_bus_subscribe() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        let _rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.emit(ExchangeEvent::ResponseReceived), 0);

        let _rx = bus.subscribe();
        assert_eq!(bus.emit(ExchangeEvent::ResponseReceived), 1);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = create_event_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let sink: Arc<dyn EventSink> = bus.clone();
        sink.publish(ExchangeEvent::ResponseTimedOut);

        assert_eq!(rx1.recv().await.unwrap(), ExchangeEvent::ResponseTimedOut);
        assert_eq!(rx2.recv().await.unwrap(), ExchangeEvent::ResponseTimedOut);
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));
    }
}
