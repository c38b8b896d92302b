//! Typed JSON store with change notifications.
//!
//! [`JsonStore`] is the origin-wide key-value storage every page reads and
//! writes. Documents are JSON; the session flag is the literal string
//! `"true"` or absent. Every successful write or removal publishes a
//! [`StoreChange`] on a broadcast feed shared by all contexts opened from the
//! same store.
//!
//! # Contexts and consistency
//!
//! A context is one open page. Clones of a `JsonStore` are the same context
//! and serialize their read-modify-write cycles through one async mutex.
//! [`JsonStore::open_context`] creates a sibling context that shares the
//! backend and change feed but not the mutex: two contexts can both read a
//! document before either writes it back. That race is the accepted
//! weak-consistency boundary between pages; the change feed is for view
//! refresh only.
//!
//! # List documents
//!
//! The registries keep JSON arrays and go through [`JsonStore::get_list`]
//! and [`JsonStore::update_list`], which decode entry by entry. An entry
//! that does not decode is skipped on read and written back untouched, in
//! its original position, on the next commit.

use std::sync::Arc;

use musiflow_storage::{MemoryBackend, StorageBackend};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Storage keys for the persisted documents.
pub mod keys {
    /// Ordered list of redemption codes.
    pub const CODES: &str = "codes";
    /// Ordered list of allocatable stock records.
    pub const STOCK: &str = "stock";
    /// Append-only list of submitted credentials.
    pub const CREDENTIALS: &str = "credentials";
    /// Session flag set once an offer has been claimed.
    pub const OFFER_CLAIMED: &str = "offerClaimed";
}

/// Buffered notifications per subscriber before it starts lagging.
const CHANGE_FEED_CAPACITY: usize = 64;

const FLAG_SET: &[u8] = b"true";

/// Notification that a key was written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// The key that changed.
    pub key: String,
}

/// Result of a read-modify-write closure passed to [`JsonStore::update_json`].
#[derive(Debug)]
pub enum Edit<R> {
    /// The document was modified and must be written back.
    Commit(R),
    /// The document is unchanged; nothing is written and nothing is published.
    Skip(R),
}

/// Typed accessor over a [`StorageBackend`].
#[derive(Clone)]
pub struct JsonStore {
    backend: Arc<dyn StorageBackend>,
    changes: broadcast::Sender<StoreChange>,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for JsonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore")
            .field("subscribers", &self.changes.receiver_count())
            .finish_non_exhaustive()
    }
}

impl JsonStore {
    /// Wrap a storage backend as the first context of a new change feed.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            backend,
            changes,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// A store over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a sibling context over the same backend and change feed.
    #[must_use]
    pub fn open_context(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            changes: self.changes.clone(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Subscribe to change notifications from every context on this feed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Read and decode a JSON document.
    ///
    /// A missing key and a document that fails to decode both read as
    /// `None`; the latter is logged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "malformed document treated as empty");
                Ok(None)
            }
        }
    }

    /// Encode and write a JSON document, then publish the change.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Encode`] if serialization fails.
    /// - [`StoreError::Storage`] if the backend write fails.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_json(key, value).await
    }

    /// Read a document, let `f` edit it in place, and write it back if `f`
    /// committed.
    ///
    /// A missing or malformed document starts from `T::default()`. The cycle
    /// holds this context's write lock, so it is atomic against other
    /// updates made through the same context.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Encode`] if serialization fails.
    /// - [`StoreError::Storage`] if the backend read or write fails.
    pub async fn update_json<T, R, F>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Edit<R>,
    {
        let _guard = self.write_lock.lock().await;
        let mut doc: T = self.get_json(key).await?.unwrap_or_default();
        match f(&mut doc) {
            Edit::Commit(result) => {
                self.write_json(key, &doc).await?;
                Ok(result)
            }
            Edit::Skip(result) => Ok(result),
        }
    }

    /// Read a list document, skipping entries that fail to decode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend read fails.
    pub async fn get_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        let raw: Vec<Value> = self.get_json(key).await?.unwrap_or_default();
        Ok(decode_entries(key, raw).0)
    }

    /// [`update_json`](Self::update_json) for list documents.
    ///
    /// `f` sees only the entries that decode. It may edit them in place and
    /// append; undecodable entries keep their slots on commit.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Encode`] if serialization fails; nothing is written.
    /// - [`StoreError::Storage`] if the backend read or write fails.
    pub async fn update_list<T, R, F>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut Vec<T>) -> Edit<R>,
    {
        self.update_json(key, |raw: &mut Vec<Value>| {
            let (mut items, slots) = decode_entries::<T>(key, std::mem::take(raw));
            match f(&mut items) {
                Edit::Skip(result) => Edit::Skip(Ok(result)),
                Edit::Commit(result) => match merge_entries(slots, &items) {
                    Ok(merged) => {
                        *raw = merged;
                        Edit::Commit(Ok(result))
                    }
                    Err(e) => Edit::Skip(Err(StoreError::Encode {
                        key: key.to_owned(),
                        reason: e.to_string(),
                    })),
                },
            }
        })
        .await?
    }

    /// Remove a key and publish the change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend delete fails.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.backend.delete(key).await?;
        self.publish(key);
        Ok(())
    }

    /// Whether a flag key holds `"true"`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend read fails.
    pub async fn get_flag(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.backend.get(key).await?.as_deref() == Some(FLAG_SET))
    }

    /// Set a flag key to `"true"` and publish the change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the backend write fails.
    pub async fn set_flag(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.backend.put(key, FLAG_SET).await?;
        self.publish(key);
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Encode {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;
        self.backend.put(key, &bytes).await?;
        self.publish(key);
        Ok(())
    }

    fn publish(&self, key: &str) {
        // No subscribers is fine: nobody is watching.
        let delivered = self
            .changes
            .send(StoreChange {
                key: key.to_owned(),
            })
            .unwrap_or(0);
        debug!(key = %key, delivered, "store change published");
    }
}

/// Where an entry of a list document ended up after decoding.
enum Slot {
    Decoded,
    Kept(Value),
}

fn decode_entries<T: DeserializeOwned>(key: &str, raw: Vec<Value>) -> (Vec<T>, Vec<Slot>) {
    let mut items = Vec::with_capacity(raw.len());
    let mut slots = Vec::with_capacity(raw.len());
    for value in raw {
        match <T as Deserialize>::deserialize(&value) {
            Ok(item) => {
                items.push(item);
                slots.push(Slot::Decoded);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable entry kept as-is");
                slots.push(Slot::Kept(value));
            }
        }
    }
    (items, slots)
}

/// Kept entries hold their positions, decoded slots take the edited items
/// in order, and any extra items are appended.
fn merge_entries<T: Serialize>(slots: Vec<Slot>, items: &[T]) -> Result<Vec<Value>, serde_json::Error> {
    let mut edited = items.iter();
    let mut merged = Vec::with_capacity(slots.len().max(items.len()));
    for slot in slots {
        match slot {
            Slot::Kept(value) => merged.push(value),
            Slot::Decoded => {
                if let Some(item) = edited.next() {
                    merged.push(serde_json::to_value(item)?);
                }
            }
        }
    }
    for item in edited {
        merged.push(serde_json::to_value(item)?);
    }
    Ok(merged)
}
