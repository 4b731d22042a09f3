//! Event bus for inter-component communication.
//!
//! A process-wide broadcast channel of typed events. Publishing never
//! blocks; slow subscribers may miss intermediate events but each
//! subscriber observes a single publisher's events in publish order.

mod events;

pub use events::{
    BusEvent, DspLink, ImageData, NowPlaying, PlaybackState, PrefixedZoneId, VolumeControl,
    VolumeKind, Zone, VALID_PREFIXES,
};

use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-subscriber ring of in-flight events; sized to absorb poll-cycle
/// bursts without lagging interactive consumers.
const DEFAULT_CAPACITY: usize = 256;

/// Handle for publishing and subscribing. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Send errors (no
    /// subscribers) are ignored.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events from this point on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Shared event bus handed to every component.
pub type SharedBus = Arc<EventBus>;

pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
