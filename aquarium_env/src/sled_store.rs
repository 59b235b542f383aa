//! Persistent StateStore backed by sled.
//!
//! Each collection is a sled tree; records are JSON-encoded values keyed by
//! id. Sessions sharing one database (threads of one process, or processes
//! taking turns on the same path) see each other's writes through
//! `watch_prefix` subscriptions.

use crate::error::StoreError;
use crate::store::{ChangeCallback, ErrorCallback, StateStore, Subscription, Topic};
use crate::types::{merge_records, ChangeEvent, Record};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a watcher thread blocks before re-checking cancellation.
const WATCH_POLL: Duration = Duration::from_millis(100);

/// Production store on top of a sled database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Opens a throwaway database that is deleted on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, collection: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(collection)?)
    }

    /// Reads a record.
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, StoreError> {
        match self.tree(collection)?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn initial_events(&self, topic: &Topic) -> Result<Vec<ChangeEvent>, StoreError> {
        let tree = self.tree(&topic.collection)?;
        let mut events = Vec::new();

        match &topic.id {
            Some(id) => {
                let event = match tree.get(id.as_bytes())? {
                    Some(bytes) => ChangeEvent::Upserted {
                        collection: topic.collection.clone(),
                        id: id.clone(),
                        record: serde_json::from_slice(&bytes)?,
                    },
                    None => ChangeEvent::Removed {
                        collection: topic.collection.clone(),
                        id: id.clone(),
                    },
                };
                events.push(event);
            }
            None => {
                for entry in tree.iter() {
                    let (key, value) = entry?;
                    events.push(ChangeEvent::Upserted {
                        collection: topic.collection.clone(),
                        id: String::from_utf8_lossy(&key).into_owned(),
                        record: serde_json::from_slice(&value)?,
                    });
                }
            }
        }

        Ok(events)
    }
}

fn decode_event(collection: &str, event: sled::Event) -> Result<ChangeEvent, StoreError> {
    match event {
        sled::Event::Insert { key, value } => Ok(ChangeEvent::Upserted {
            collection: collection.to_string(),
            id: String::from_utf8_lossy(&key).into_owned(),
            record: serde_json::from_slice(&value)?,
        }),
        sled::Event::Remove { key } => Ok(ChangeEvent::Removed {
            collection: collection.to_string(),
            id: String::from_utf8_lossy(&key).into_owned(),
        }),
    }
}

#[async_trait]
impl StateStore for SledStore {
    async fn put(&self, collection: &str, id: &str, record: Record) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(&record)?;
        self.tree(collection)?.insert(id.as_bytes(), encoded)?;
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, partial: Record) -> Result<(), StoreError> {
        let tree = self.tree(collection)?;

        loop {
            let current = tree.get(id.as_bytes())?;
            let mut value = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Record::Object(Default::default()),
            };
            merge_records(&mut value, &partial);

            let encoded = serde_json::to_vec(&value)?;
            if tree.compare_and_swap(id.as_bytes(), current, Some(encoded))?.is_ok() {
                return Ok(());
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.tree(collection)?.remove(id.as_bytes())?;
        Ok(())
    }

    fn subscribe(
        &self,
        topic: Topic,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription {
        let tree = match self.tree(&topic.collection) {
            Ok(tree) => tree,
            Err(err) => {
                on_error(err);
                return Subscription::detached();
            }
        };

        let prefix = topic.id.clone().unwrap_or_default().into_bytes();
        let mut watcher = tree.watch_prefix(prefix);

        match self.initial_events(&topic) {
            Ok(events) => events.into_iter().for_each(|event| on_change(event)),
            Err(err) => on_error(err),
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let stop = cancelled.clone();
        let collection = topic.collection.clone();
        let thread_error = on_error.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("sled-watch-{}", collection))
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let event = match watcher.next_timeout(WATCH_POLL) {
                        Ok(event) => event,
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                            on_error(StoreError::Closed);
                            break;
                        }
                    };

                    match decode_event(&collection, event) {
                        Ok(change) if topic.matches(change.collection(), change.id()) => {
                            on_change(change)
                        }
                        Ok(_) => {}
                        Err(err) => on_error(err),
                    }
                }
            });

        if let Err(err) = spawned {
            thread_error(StoreError::Backend(err.to_string()));
            return Subscription::detached();
        }

        Subscription::new(move || cancelled.store(true, Ordering::Release))
    }

    fn supports_conditional_writes(&self) -> bool {
        true
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<Record>,
        new: Record,
    ) -> Result<bool, StoreError> {
        let tree = self.tree(collection)?;
        let current = tree.get(id.as_bytes())?;

        let decoded: Option<Record> = match &current {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        if decoded != expected {
            return Ok(false);
        }

        let encoded = serde_json::to_vec(&new)?;
        Ok(tree
            .compare_and_swap(id.as_bytes(), current, Some(encoded))?
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = SledStore::temporary().unwrap();
        store.put("fish", "a", json!({ "name": "Nemo" })).await.unwrap();

        assert_eq!(store.get("fish", "a").unwrap(), Some(json!({ "name": "Nemo" })));
        assert_eq!(store.get("fish", "b").unwrap(), None);
    }

    #[tokio::test]
    async fn test_merge_is_non_destructive() {
        let store = SledStore::temporary().unwrap();
        store
            .put("aquarium_owner", "owner", json!({ "sessionId": "s1", "lastHeartbeat": 1 }))
            .await
            .unwrap();
        store
            .merge("aquarium_owner", "owner", json!({ "lastHeartbeat": 2 }))
            .await
            .unwrap();

        assert_eq!(
            store.get("aquarium_owner", "owner").unwrap(),
            Some(json!({ "sessionId": "s1", "lastHeartbeat": 2 }))
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap_requires_expected_value() {
        let store = SledStore::temporary().unwrap();
        assert!(store.supports_conditional_writes());

        let first = json!({ "sessionId": "a" });
        assert!(store.compare_and_swap("o", "owner", None, first.clone()).await.unwrap());
        assert!(!store.compare_and_swap("o", "owner", None, json!({ "sessionId": "b" })).await.unwrap());
        assert!(store
            .compare_and_swap("o", "owner", Some(first), json!({ "sessionId": "b" }))
            .await
            .unwrap());
        assert_eq!(store.get("o", "owner").unwrap(), Some(json!({ "sessionId": "b" })));
    }

    #[test]
    fn test_subscribe_delivers_absent_record_first() {
        let store = SledStore::temporary().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _sub = store.subscribe(
            Topic::record("aquarium_owner", "owner"),
            Arc::new(move |event| sink.lock().unwrap().push(event)),
            Arc::new(|_| {}),
        );

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.first(),
            Some(&ChangeEvent::Removed {
                collection: "aquarium_owner".to_string(),
                id: "owner".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_subscribe_sees_later_writes() {
        let store = SledStore::temporary().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _sub = store.subscribe(
            Topic::collection("fish"),
            Arc::new(move |event| sink.lock().unwrap().push(event)),
            Arc::new(|_| {}),
        );
        store.put("fish", "a", json!({ "name": "Dory" })).await.unwrap();

        let mut delivered = false;
        for _ in 0..50 {
            if seen.lock().unwrap().iter().any(|e| e.id() == "a") {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered);
    }
}
