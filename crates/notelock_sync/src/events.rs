//! Sync lifecycle events.
//!
//! Subscribers receive events over plain mpsc channels; disconnected
//! receivers are pruned on the next emit.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use uuid::Uuid;

/// An event emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A sync cycle (all its rounds) finished.
    Completed {
        /// UUIDs mapped from `retrieved_items`.
        retrieved: Vec<Uuid>,
        /// UUIDs mapped from `saved_items`.
        saved: Vec<Uuid>,
        /// UUIDs the server refused.
        unsaved: Vec<Uuid>,
        /// The cycle started with no sync token.
        initial_sync: bool,
    },
    /// The in-flight request passed the watchdog threshold. Emitted at
    /// most once per request; the request itself continues.
    TakingTooLong,
    /// A new sync token was persisted.
    UpdatedToken(String),
    /// The cycle failed; the dirty set is retained for retry.
    SyncError(String),
    /// The server rejected the session (401); the auth collaborator
    /// should sign the user out.
    SessionInvalid,
    /// An item could not be prepared for sync.
    Exception(String),
    /// A cycle touched enough items to warrant a backup.
    MajorDataChange,
    /// The bulk local load finished.
    LocalDataLoaded,
}

/// Fan-out of sync events to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Sender<SyncEvent>>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to every live subscriber.
    pub fn emit(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_receive() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(SyncEvent::MajorDataChange);
        assert_eq!(rx.recv().unwrap(), SyncEvent::MajorDataChange);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.emit(SyncEvent::LocalDataLoaded);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn multiple_subscribers() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.emit(SyncEvent::SessionInvalid);
        assert_eq!(rx1.recv().unwrap(), SyncEvent::SessionInvalid);
        assert_eq!(rx2.recv().unwrap(), SyncEvent::SessionInvalid);
    }
}
