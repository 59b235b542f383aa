//! Shared state store abstraction.

use crate::error::StoreError;
use crate::types::{ChangeEvent, Record};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Locks a mutex that callbacks write into. A panicked writer leaves plain
/// data behind, so a poisoned lock is still usable.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invoked for every change matching a subscription.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Invoked when a subscription fails to deliver.
pub type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// What a subscription listens to: a whole collection or one record in it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    pub collection: String,
    pub id: Option<String>,
}

impl Topic {
    /// Every record of a collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: None,
        }
    }

    /// A single named record.
    pub fn record(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: Some(id.into()),
        }
    }

    /// Returns true if a change to `collection/id` should be delivered.
    pub fn matches(&self, collection: &str, id: &str) -> bool {
        self.collection == collection && self.id.as_deref().map_or(true, |wanted| wanted == id)
    }
}

/// Abstraction over the shared, latency-prone state store all sessions see.
///
/// # Implementations
///
/// - **Production**: `SledStore` - persistent, process-shared key-value tree
/// - **Simulation**: `SimStore` - in-memory with latency, loss and partitions
///
/// # Delivery
///
/// ```text
/// Session A                  Store                     Session B
///   |                          |                           |
///   |-- put(fish_state, id) -->|                           |
///   |                          |-- [latency/jitter] ------>|
///   |                          |                           |-- on_change(event)
/// ```
///
/// Success of a write does not mean other sessions have seen it.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Writes a named record, overwriting any previous value.
    async fn put(&self, collection: &str, id: &str, record: Record) -> Result<(), StoreError>;

    /// Non-destructive partial update. Creates the record if absent.
    async fn merge(&self, collection: &str, id: &str, partial: Record) -> Result<(), StoreError>;

    /// Deletes a record. Deleting an absent record succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Subscribes to changes.
    ///
    /// The current state of every matching record is delivered first; a
    /// single-record topic whose record is absent receives a
    /// [`ChangeEvent::Removed`]. Delivery happens on the store's schedule.
    /// Dropping the returned handle unsubscribes.
    fn subscribe(
        &self,
        topic: Topic,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription;

    /// Returns true if [`StateStore::compare_and_swap`] is implemented.
    fn supports_conditional_writes(&self) -> bool {
        false
    }

    /// Writes `new` only if the current value equals `expected`
    /// (`None` = record absent). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        _collection: &str,
        _id: &str,
        _expected: Option<Record>,
        _new: Record,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Unsupported("compare_and_swap"))
    }
}

/// Handle returned by [`StateStore::subscribe`]; unsubscribes on drop.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a handle that runs `cancel` exactly once when released.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to cancel.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Stops delivery.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_topic_matching() {
        let all = Topic::collection("fish");
        let one = Topic::record("aquarium_owner", "owner");

        assert!(all.matches("fish", "a"));
        assert!(!all.matches("fish_state", "a"));
        assert!(one.matches("aquarium_owner", "owner"));
        assert!(!one.matches("aquarium_owner", "other"));
    }

    #[test]
    fn test_subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_cancels_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        {
            let _sub = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
