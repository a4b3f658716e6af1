//! Event fan-out.
//!
//! Every observer gets its own unbounded queue, so each published event is
//! seen exactly once by every live observer. Observers that dropped their
//! receiver are pruned on the next publish.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Publish/subscribe bus for lifecycle events.
#[derive(Debug)]
pub struct EventBus<E> {
    observers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus without observers.
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    /// Deliver an event to every observer.
    pub fn publish(&self, event: E) {
        self.observers
            .lock()
            .retain(|observer| observer.send(event.clone()).is_ok());
    }

    /// Number of registered observers, including ones not yet pruned.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a subscriber session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Id the server assigned to this client.
    pub client_id: String,
}

/// Events produced by a [`Subscriber`](crate::Subscriber).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// The connect sequence completed.
    Connected(SessionInfo),
    /// The session ended, locally or by the server.
    Disconnected(SessionInfo),
    /// A push frame arrived on a subscribed channel.
    ChannelMessage {
        /// Session the message arrived on.
        session: SessionInfo,
        /// Channel name as sent by the server.
        channel: String,
        /// Message body, possibly empty.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_observer_sees_each_event_once() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(1u32);
        bus.publish(2u32);

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
        assert!(a.try_recv().is_err());
        assert_eq!(b.try_recv().unwrap(), 1);
        assert_eq!(b.try_recv().unwrap(), 2);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_dropped_observers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        bus.publish("x".to_string());
        assert_eq!(bus.observer_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_publish_without_observers() {
        let bus: EventBus<u8> = EventBus::default();
        bus.publish(7);
        assert_eq!(bus.observer_count(), 0);
    }
}
