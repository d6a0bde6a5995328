//! In-memory upload queue.
//!
//! The single source of truth for "what is currently uploading". The
//! fan-out uploader and the retry engine write into it, the presentation
//! layer reads cloned snapshots out of it; nothing mutates an item except
//! through this API. The queue never touches disk or network.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{ItemId, ItemStatus, QueueItem, ServiceId, ServiceProgress, ServiceProgressUpdate};
use crate::events::AppEvent;
use crate::ports::AppEventEmitter;

/// Partial update for one queue item.
///
/// `service_progress` is deep-merged per service: an update touching
/// service A never clobbers service B's stored entry. This is the single
/// subtlest invariant in the engine; a shallow overwrite here silently
/// erases sibling state mid-flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    /// Per-service partial updates.
    pub service_progress: IndexMap<ServiceId, ServiceProgressUpdate>,
}

impl ItemUpdate {
    /// Update touching a single service.
    #[must_use]
    pub fn for_service(service: ServiceId, update: ServiceProgressUpdate) -> Self {
        let mut service_progress = IndexMap::new();
        service_progress.insert(service, update);
        Self { service_progress }
    }
}

/// The reactive upload ledger.
///
/// Explicitly constructed and passed by reference (`Arc`) to whatever
/// needs it; emits typed change events for every mutation.
pub struct UploadQueue {
    items: RwLock<IndexMap<ItemId, QueueItem>>,
    emitter: Arc<dyn AppEventEmitter>,
}

impl UploadQueue {
    /// Create an empty queue.
    pub fn new(emitter: Arc<dyn AppEventEmitter>) -> Self {
        Self {
            items: RwLock::new(IndexMap::new()),
            emitter,
        }
    }

    /// Add an item. Replaces any stale item with the same id.
    pub async fn add_item(&self, item: QueueItem) {
        let id = item.id;
        self.items.write().await.insert(id, item);
        debug!(item = %id, "queue item added");
        self.emitter.emit(AppEvent::QueueItemAdded { item_id: id });
    }

    /// Deep-merge a partial update into an item.
    ///
    /// Unknown items are ignored (the item may have been removed by the
    /// user while its upload was settling). Unknown services within a
    /// known item are inserted fresh, so a retry of a service the item
    /// did not originally track still lands.
    ///
    /// Returns the item's status after the merge.
    pub async fn update_item(&self, id: &ItemId, update: &ItemUpdate) -> Option<ItemStatus> {
        let mut items = self.items.write().await;
        let item = items.get_mut(id)?;

        for (service, progress_update) in &update.service_progress {
            match item.service_progress.get_mut(service) {
                Some(entry) => entry.apply(progress_update),
                None => {
                    let mut entry = ServiceProgress::pending(service.clone());
                    entry.apply(progress_update);
                    item.service_progress.insert(service.clone(), entry);
                }
            }
        }
        item.status = item.derived_status();
        let status = item.status;
        drop(items);

        self.emitter.emit(AppEvent::QueueItemUpdated { item_id: *id });
        Some(status)
    }

    /// Shorthand for a single-service update.
    pub async fn update_service(
        &self,
        id: &ItemId,
        service: &ServiceId,
        update: ServiceProgressUpdate,
    ) -> Option<ItemStatus> {
        self.update_item(id, &ItemUpdate::for_service(service.clone(), update))
            .await
    }

    /// Remove one item.
    pub async fn remove_item(&self, id: &ItemId) -> Option<QueueItem> {
        let removed = self.items.write().await.shift_remove(id);
        if removed.is_some() {
            debug!(item = %id, "queue item removed");
            self.emitter.emit(AppEvent::QueueItemRemoved { item_id: *id });
        }
        removed
    }

    /// Drop every item, in-flight or not.
    ///
    /// Safe because history persistence is independent of the queue's
    /// lifetime; settling uploads simply find their item gone.
    pub async fn clear(&self) {
        self.items.write().await.clear();
        self.emitter.emit(AppEvent::QueueCleared);
    }

    /// Drop only items whose status is terminal, preserving in-flight
    /// ones.
    pub async fn clear_completed(&self) -> u32 {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.status.is_terminal());
        let removed = (before - items.len()) as u32;
        drop(items);

        if removed > 0 {
            self.emitter.emit(AppEvent::QueueCleared);
        }
        removed
    }

    /// Cloned snapshot of one item.
    pub async fn get_item(&self, id: &ItemId) -> Option<QueueItem> {
        self.items.read().await.get(id).cloned()
    }

    /// Cloned snapshot of the whole queue, in insertion order.
    pub async fn snapshot(&self) -> Vec<QueueItem> {
        self.items.read().await.values().cloned().collect()
    }

    /// Number of items currently tracked.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UploadError;
    use crate::ports::NoopEmitter;

    fn queue() -> UploadQueue {
        UploadQueue::new(Arc::new(NoopEmitter::new()))
    }

    fn item_ab(id: ItemId) -> QueueItem {
        QueueItem::new(id, "photo.png", "/tmp/photo.png", vec!["a".into(), "b".into()])
    }

    #[tokio::test]
    async fn test_update_merges_without_clobbering_siblings() {
        let queue = queue();
        let id = ItemId::new();
        queue.add_item(item_ab(id)).await;

        queue
            .update_service(&id, &"a".into(), ServiceProgressUpdate::succeeded("https://a/x"))
            .await;
        queue
            .update_service(&id, &"b".into(), ServiceProgressUpdate::progress(40))
            .await;

        let item = queue.get_item(&id).await.unwrap();
        // B's tick did not erase A's terminal state.
        let a = &item.service_progress[&ServiceId::new("a")];
        assert_eq!(a.link.as_deref(), Some("https://a/x"));
        assert_eq!(item.service_progress[&ServiceId::new("b")].progress, 40);
    }

    #[tokio::test]
    async fn test_status_derivation_partial_success() {
        let queue = queue();
        let id = ItemId::new();
        queue.add_item(item_ab(id)).await;

        let status = queue
            .update_service(&id, &"a".into(), ServiceProgressUpdate::succeeded("https://a/x"))
            .await
            .unwrap();
        assert_eq!(status, ItemStatus::Uploading);

        let status = queue
            .update_service(
                &id,
                &"b".into(),
                ServiceProgressUpdate::failed(UploadError::network("down")),
            )
            .await
            .unwrap();
        assert_eq!(status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn test_update_unknown_item_is_ignored() {
        let queue = queue();
        let status = queue
            .update_service(
                &ItemId::new(),
                &"a".into(),
                ServiceProgressUpdate::progress(10),
            )
            .await;
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_clear_completed_preserves_in_flight() {
        let queue = queue();
        let done = ItemId::new();
        let live = ItemId::new();
        queue.add_item(item_ab(done)).await;
        queue.add_item(item_ab(live)).await;

        for s in ["a", "b"] {
            queue
                .update_service(&done, &s.into(), ServiceProgressUpdate::succeeded("https://x"))
                .await;
        }
        queue
            .update_service(&live, &"a".into(), ServiceProgressUpdate::uploading())
            .await;

        let removed = queue.clear_completed().await;
        assert_eq!(removed, 1);
        assert!(queue.get_item(&done).await.is_none());
        assert!(queue.get_item(&live).await.is_some());
    }

    #[tokio::test]
    async fn test_events_emitted_on_mutation() {
        let emitter = Arc::new(crate::ports::BroadcastEmitter::new(16));
        let queue = UploadQueue::new(emitter.clone());
        let mut rx = emitter.subscribe();

        let id = ItemId::new();
        queue.add_item(item_ab(id)).await;
        queue.remove_item(&id).await;

        assert_eq!(rx.recv().await.unwrap(), AppEvent::QueueItemAdded { item_id: id });
        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::QueueItemRemoved { item_id: id }
        );
    }
}
