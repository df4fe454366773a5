//! Event system for real-time state notifications
//!
//! Provides a broadcast event bus used to notify a host application (the
//! CLI front-end, a Scrypted plugin, anything embedding this crate) of
//! gateway lifecycle, connection, and streaming events without coupling
//! the gateway to any particular transport.

pub mod types;

pub use types::{ConnectionInfo, FrameInfo, GatewayEvent, VideoMetadata};

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size).
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast event bus for gateway events.
///
/// # Example
///
/// ```no_run
/// use eufy_stream_gateway::events::{EventBus, GatewayEvent};
///
/// let bus = EventBus::new();
///
/// bus.publish(GatewayEvent::Stopped);
///
/// let mut rx = bus.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("received event: {:?}", event);
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    ///
    /// If there are no active subscribers, the event is silently dropped —
    /// events are fire-and-forget notifications.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events. The receiver is a ring buffer: a subscriber that
    /// falls too far behind receives a `Lagged` error and misses some events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// The current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
