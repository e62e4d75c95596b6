//! Live document subscriptions.
//!
//! Subscriptions are explicit stream objects with scoped lifetimes: a
//! [`DocumentWatch`] registers itself in the store's [`WatcherRegistry`] and
//! unregisters on [`DocumentWatch::stop`] or drop, so a torn-down view can
//! never receive duplicate deliveries or leak its channel.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// A document state pushed to subscribers: the full post-write body, or
/// `None` while the document does not exist.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    pub body: Option<Value>,
}

struct Watcher {
    id: u64,
    tx: mpsc::UnboundedSender<DocumentChange>,
}

/// Per-store registry of live subscriptions, keyed by (collection, id).
pub(crate) struct WatcherRegistry {
    next_id: AtomicU64,
    watchers: Mutex<HashMap<(String, String), Vec<Watcher>>>,
}

impl WatcherRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            watchers: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new watch and queue its initial snapshot.
    pub(crate) fn register(
        self: &Arc<Self>,
        collection: &str,
        id: &str,
        initial: DocumentChange,
    ) -> DocumentWatch {
        let watcher_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // Queue the snapshot before the watcher becomes visible to writers,
        // so it is always the first item the stream yields.
        let _ = tx.send(initial);

        self.watchers
            .lock()
            .entry((collection.to_string(), id.to_string()))
            .or_default()
            .push(Watcher { id: watcher_id, tx });

        DocumentWatch {
            collection: collection.to_string(),
            id: id.to_string(),
            watcher_id,
            rx,
            registry: Arc::clone(self),
        }
    }

    fn unregister(&self, collection: &str, id: &str, watcher_id: u64) {
        let mut watchers = self.watchers.lock();
        let key = (collection.to_string(), id.to_string());
        if let Some(entries) = watchers.get_mut(&key) {
            entries.retain(|w| w.id != watcher_id);
            if entries.is_empty() {
                watchers.remove(&key);
            }
        }
    }

    /// Deliver a committed change to every watcher of that document.
    /// Watchers whose receiving end is gone are pruned on the way.
    pub(crate) fn notify(&self, change: &DocumentChange) {
        let mut watchers = self.watchers.lock();
        let key = (change.collection.clone(), change.id.clone());
        if let Some(entries) = watchers.get_mut(&key) {
            entries.retain(|w| w.tx.send(change.clone()).is_ok());
            if entries.is_empty() {
                watchers.remove(&key);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self, collection: &str, id: &str) -> usize {
        self.watchers
            .lock()
            .get(&(collection.to_string(), id.to_string()))
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

/// Live subscription handle for a single document.
///
/// Yields the current state first, then every committed change. Dropping the
/// handle (or calling [`stop`](Self::stop)) unregisters the subscription.
pub struct DocumentWatch {
    collection: String,
    id: String,
    watcher_id: u64,
    rx: mpsc::UnboundedReceiver<DocumentChange>,
    registry: Arc<WatcherRegistry>,
}

impl DocumentWatch {
    /// Tear the subscription down explicitly.
    pub fn stop(self) {}
}

impl Stream for DocumentWatch {
    type Item = DocumentChange;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for DocumentWatch {
    fn drop(&mut self) {
        self.registry
            .unregister(&self.collection, &self.id, self.watcher_id);
    }
}
