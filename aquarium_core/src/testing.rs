//! In-crate test doubles: a manual clock and an in-memory store whose
//! notifications wait until flushed.

use crate::lock;
use async_trait::async_trait;
use aquarium_env::{
    merge_records, AquariumContext, ChangeCallback, ChangeEvent, ErrorCallback, Record, StateStore,
    StoreError, Subscription, Topic,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Duration::ZERO),
        })
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

#[async_trait]
impl AquariumContext for ManualClock {
    fn now(&self) -> Duration {
        *lock(&self.now)
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_704_067_200) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<(String, String), Record>,
    subscribers: Vec<(u64, Topic, ChangeCallback)>,
    queue: VecDeque<ChangeEvent>,
    next_subscriber: u64,
}

/// Writes apply immediately; notifications are held until [`MemoryStore::flush`].
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    cas: bool,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::default(),
            cas: false,
            failing: AtomicBool::new(false),
        })
    }

    pub fn shared_with_cas() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::default(),
            cas: true,
            failing: AtomicBool::new(false),
        })
    }

    /// Makes every write fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Record> {
        lock(&self.inner)
            .data
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn remove(&self, collection: &str, id: &str) {
        self.erase(collection, id);
    }

    fn erase(&self, collection: &str, id: &str) {
        let mut inner = lock(&self.inner);
        if inner.data.remove(&(collection.to_string(), id.to_string())).is_some() {
            inner.queue.push_back(ChangeEvent::Removed {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
    }

    /// Number of records in a collection.
    pub fn count(&self, collection: &str) -> usize {
        lock(&self.inner).data.keys().filter(|(c, _)| c == collection).count()
    }

    /// Delivers every queued notification.
    pub fn flush(&self) {
        loop {
            let (event, targets) = {
                let mut inner = lock(&self.inner);
                let Some(event) = inner.queue.pop_front() else {
                    return;
                };
                let targets: Vec<ChangeCallback> = inner
                    .subscribers
                    .iter()
                    .filter(|(_, topic, _)| topic.matches(event.collection(), event.id()))
                    .map(|(_, _, callback)| callback.clone())
                    .collect();
                (event, targets)
            };
            for callback in targets {
                callback(event.clone());
            }
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("injected failure"))
        } else {
            Ok(())
        }
    }

    fn write(&self, collection: &str, id: &str, record: Record) {
        let mut inner = lock(&self.inner);
        inner
            .data
            .insert((collection.to_string(), id.to_string()), record.clone());
        inner.queue.push_back(ChangeEvent::Upserted {
            collection: collection.to_string(),
            id: id.to_string(),
            record,
        });
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, collection: &str, id: &str, record: Record) -> Result<(), StoreError> {
        self.check()?;
        self.write(collection, id, record);
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, partial: Record) -> Result<(), StoreError> {
        self.check()?;
        let mut value = self
            .get(collection, id)
            .unwrap_or_else(|| Record::Object(Default::default()));
        merge_records(&mut value, &partial);
        self.write(collection, id, value);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.erase(collection, id);
        Ok(())
    }

    fn subscribe(
        &self,
        topic: Topic,
        on_change: ChangeCallback,
        _on_error: ErrorCallback,
    ) -> Subscription {
        let (key, initial) = {
            let mut inner = lock(&self.inner);
            let key = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.push((key, topic.clone(), on_change.clone()));

            let mut initial: Vec<ChangeEvent> = inner
                .data
                .iter()
                .filter(|((c, i), _)| topic.matches(c, i))
                .map(|((c, i), r)| ChangeEvent::Upserted {
                    collection: c.clone(),
                    id: i.clone(),
                    record: r.clone(),
                })
                .collect();
            if let (Some(id), true) = (&topic.id, initial.is_empty()) {
                initial.push(ChangeEvent::Removed {
                    collection: topic.collection.clone(),
                    id: id.clone(),
                });
            }
            (key, initial)
        };

        for event in initial {
            on_change(event);
        }

        let inner = self.inner.clone();
        Subscription::new(move || {
            lock(&inner).subscribers.retain(|(k, _, _)| *k != key);
        })
    }

    fn supports_conditional_writes(&self) -> bool {
        self.cas
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<Record>,
        new: Record,
    ) -> Result<bool, StoreError> {
        if !self.cas {
            return Err(StoreError::Unsupported("compare_and_swap"));
        }
        self.check()?;
        if self.get(collection, id) != expected {
            return Ok(false);
        }
        self.write(collection, id, new);
        Ok(true)
    }
}
