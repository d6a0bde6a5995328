//! Event emitter trait for cross-window event broadcasting.
//!
//! Implementations handle transport details (in-process channels, Tauri
//! events). The core only ever talks to the trait.

use tokio::sync::broadcast;

use crate::events::AppEvent;

/// Trait for emitting application events.
///
/// Keeps event plumbing consistent across domains and prevents channel
/// types from becoming part of the public API surface.
pub trait AppEventEmitter: Send + Sync {
    /// Emit an application event.
    ///
    /// Implementations should not block; a lagging or absent subscriber
    /// must never stall an upload.
    fn emit(&self, event: AppEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn AppEventEmitter>;
}

/// A no-op event emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    /// Create a new no-op emitter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AppEventEmitter for NoopEmitter {
    fn emit(&self, _event: AppEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

/// In-process fan-out emitter backed by a tokio broadcast channel.
///
/// Every open window subscribes once; events are delivered to all current
/// subscribers. Send errors (no subscribers) are ignored.
#[derive(Debug, Clone)]
pub struct BroadcastEmitter {
    tx: broadcast::Sender<AppEvent>,
}

impl BroadcastEmitter {
    /// Create an emitter with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AppEventEmitter for BroadcastEmitter {
    fn emit(&self, event: AppEvent) {
        // No subscribers is fine; the queue must keep moving regardless.
        let _ = self.tx.send(event);
    }

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemId, ServiceId};
    use crate::events::ProgressPhase;

    #[test]
    fn test_noop_emitter_accepts_events() {
        let emitter = NoopEmitter::new();
        emitter.emit(AppEvent::QueueCleared);
    }

    #[tokio::test]
    async fn test_broadcast_emitter_delivers_to_subscribers() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();

        let event = AppEvent::upload_progress(
            ItemId::new(),
            ServiceId::new("a"),
            50,
            ProgressPhase::Uploading,
        );
        emitter.emit(event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_broadcast_emitter_without_subscribers_does_not_panic() {
        let emitter = BroadcastEmitter::new(8);
        emitter.emit(AppEvent::HistoryCleared);
    }
}
