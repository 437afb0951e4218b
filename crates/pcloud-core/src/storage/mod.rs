//! Local object storage observed by the sync core
//!
//! The core only needs a generic document store: lookups by key, scans of a
//! collection, merge-writes of pulled data, silent removal, and a change hook
//! that reports the keys touched by each local write.

mod libsql_store;

pub use libsql_store::LibSqlLocalStorage;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;
use crate::models::{LocalCollection, ObjectKey, SchemaVersion};

/// Keys touched by one local write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageChange {
    Create { pk: Value },
    Modify { pks: Vec<Value> },
    Delete { pks: Vec<Value> },
}

/// Batch of changes to one collection, delivered after the write committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChangeEvent {
    pub collection: LocalCollection,
    pub changes: Vec<StorageChange>,
}

/// Callback run for every change event
pub type ChangeHandler = Arc<dyn Fn(StorageChangeEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Pulled data to merge into local storage
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingWrite {
    pub collection: LocalCollection,
    /// Key of the object to write, read from the object itself when absent
    pub where_: Option<ObjectKey>,
    pub object: Value,
}

/// Contract the sync core needs from a local store
#[async_trait]
pub trait LocalStorage: Send + Sync {
    /// Look up one object by key
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<Value>>;

    /// All objects of a collection, ordered by key
    async fn find_objects(&self, collection: LocalCollection) -> Result<Vec<Value>>;

    /// Replace an object by its pulled version, creating it when missing.
    /// Device-local fields the pull does not carry are kept.
    ///
    /// Does not notify change handlers.
    async fn write_incoming_data(&self, write: IncomingWrite) -> Result<()>;

    /// Remove objects without notifying change handlers, returns how many existed
    async fn remove_objects(&self, keys: &[ObjectKey]) -> Result<usize>;

    /// Register a change handler, active until the subscription is dropped
    fn on_change(&self, handler: ChangeHandler) -> Subscription;

    /// Local schema version of the stored objects
    async fn schema_version(&self) -> Result<SchemaVersion>;
}

type HandlerList = Mutex<Vec<(u64, ChangeHandler)>>;

/// Registry of change handlers shared by a store and its subscriptions
#[derive(Default)]
pub(crate) struct ChangeHandlers {
    next_id: std::sync::atomic::AtomicU64,
    handlers: Arc<HandlerList>,
}

impl ChangeHandlers {
    pub(crate) fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push((id, handler));
        }
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Run every handler for `event`, one after another.
    pub(crate) async fn notify(&self, event: StorageChangeEvent) {
        let handlers: Vec<ChangeHandler> = match self.handlers.lock() {
            Ok(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event.clone()).await;
        }
    }
}

/// Handle of a registered change handler; dropping it unregisters the handler
#[must_use = "the handler is removed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl Subscription {
    /// Unregister the handler now.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut handlers) = handlers.lock() {
                handlers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
