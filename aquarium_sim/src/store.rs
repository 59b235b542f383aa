//! Simulated shared store with fault injection.
//!
//! Every session in a world talks to the same [`SimStoreHub`] through its own
//! [`SimStore`] handle. Writes apply to the hub's data at once; change
//! notifications are queued with per-subscriber latency and only delivered
//! when the world calls [`SimStoreHub::deliver_due`].
//!
//! ```text
//!  SimStore(A) ──put──►┌──────────── SimStoreHub ────────────┐
//!                      │ data        pending (deliver_at, seq)│──deliver_due(now)──► on_change(B)
//!  SimStore(B) ──put──►│ subscribers controller (faults)      │
//!                      └──────────────────────────────────────┘
//! ```

use crate::context::SimContext;
use async_trait::async_trait;
use aquarium_env::{
    lock, merge_records, AquariumContext, ChangeCallback, ChangeEvent, ErrorCallback, Record, SessionId,
    StateStore, StoreError, Subscription, Topic,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::cmp::Reverse;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Fault knobs shared by every handle of a hub.
#[derive(Debug, Clone, Default)]
struct Faults {
    /// Base notification latency in milliseconds
    latency_ms: u64,

    /// Standard deviation of the latency jitter in milliseconds
    jitter_ms: f64,

    /// Chance that any single write fails (0.0 - 1.0)
    write_failure_rate: f64,

    /// Sessions whose writes fail and whose notifications are dropped
    disconnected: HashSet<SessionId>,
}

/// Store controller for fault injection.
#[derive(Debug, Clone, Default)]
pub struct SimStoreController {
    faults: Arc<Mutex<Faults>>,
}

impl SimStoreController {
    /// Creates a new store controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base notification latency.
    pub fn set_latency(&self, latency_ms: u64) {
        lock(&self.faults).latency_ms = latency_ms;
    }

    /// Sets the notification jitter (standard deviation).
    pub fn set_jitter(&self, jitter_ms: f64) {
        lock(&self.faults).jitter_ms = jitter_ms.max(0.0);
    }

    /// Sets the write failure rate.
    pub fn set_write_failure_rate(&self, rate: f64) {
        lock(&self.faults).write_failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Cuts a session off the store.
    pub fn disconnect(&self, session: SessionId) {
        lock(&self.faults).disconnected.insert(session);
    }

    /// Reconnects a session. Its subscriptions are resynced by the hub.
    pub fn reconnect(&self, session: SessionId) -> bool {
        lock(&self.faults).disconnected.remove(&session)
    }

    /// Checks if a session can reach the store.
    pub fn is_connected(&self, session: SessionId) -> bool {
        !lock(&self.faults).disconnected.contains(&session)
    }

    pub fn latency_ms(&self) -> u64 {
        lock(&self.faults).latency_ms
    }

    pub fn write_failure_rate(&self) -> f64 {
        lock(&self.faults).write_failure_rate
    }

    fn snapshot(&self) -> Faults {
        lock(&self.faults).clone()
    }
}

/// Counters kept by the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub writes: u64,
    pub failed_writes: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub max_latency_ms: u64,
}

struct Subscriber {
    key: u64,
    session: SessionId,
    topic: Topic,
    on_change: ChangeCallback,
    on_error: ErrorCallback,
    /// Latest scheduled delivery, so a subscriber sees changes in write order
    last_scheduled: Duration,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    deliver_at: Duration,
    seq: u64,
    subscriber: u64,
    event: PendingEvent,
}

// ChangeEvent carries a JSON value, which has no total order; the queue
// orders on (deliver_at, seq) only.
struct PendingEvent(ChangeEvent);

impl PartialEq for PendingEvent {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for PendingEvent {}

impl PartialOrd for PendingEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEvent {
    fn cmp(&self, _: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}

struct HubState {
    data: BTreeMap<(String, String), Record>,
    subscribers: Vec<Subscriber>,
    pending: BinaryHeap<Reverse<Pending>>,
    next_seq: u64,
    next_key: u64,
    rng: ChaCha8Rng,
    stats: StoreStats,
}

/// The shared in-memory store all sessions of a world see.
pub struct SimStoreHub {
    clock: Arc<SimContext>,
    controller: SimStoreController,
    conditional_writes: bool,
    state: Mutex<HubState>,
}

impl SimStoreHub {
    /// Creates a hub on the world's clock. `seed` drives jitter and write
    /// failures.
    pub fn new(clock: Arc<SimContext>, seed: u64, conditional_writes: bool) -> Arc<Self> {
        Arc::new(Self {
            clock,
            controller: SimStoreController::new(),
            conditional_writes,
            state: Mutex::new(HubState {
                data: BTreeMap::new(),
                subscribers: Vec::new(),
                pending: BinaryHeap::new(),
                next_seq: 0,
                next_key: 0,
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: StoreStats::default(),
            }),
        })
    }

    /// A handle for one session.
    pub fn connect(self: &Arc<Self>, session: SessionId) -> Arc<SimStore> {
        Arc::new(SimStore {
            hub: self.clone(),
            session,
            writes: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn controller(&self) -> &SimStoreController {
        &self.controller
    }

    pub fn stats(&self) -> StoreStats {
        lock(&self.state).stats
    }

    /// Current value of a record, bypassing latency.
    pub fn get(&self, collection: &str, id: &str) -> Option<Record> {
        lock(&self.state)
            .data
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Ids in a collection, in key order.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        lock(&self.state)
            .data
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Deletes a record, bypassing fault injection (catalog churn).
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let faults = self.controller.snapshot();
        let now = self.clock.now();
        let mut state = lock(&self.state);
        Self::erase(&mut state, &faults, now, collection, id)
    }

    fn erase(state: &mut HubState, faults: &Faults, now: Duration, collection: &str, id: &str) -> bool {
        if state.data.remove(&(collection.to_string(), id.to_string())).is_none() {
            return false;
        }
        let event = ChangeEvent::Removed {
            collection: collection.to_string(),
            id: id.to_string(),
        };
        Self::schedule(state, faults, now, event);
        true
    }

    /// A session's delete, subject to the same faults as its writes.
    fn delete(&self, session: SessionId, collection: &str, id: &str) -> Result<bool, StoreError> {
        let faults = self.controller.snapshot();
        let now = self.clock.now();
        let mut state = lock(&self.state);
        self.admit(&mut state, &faults, session)?;
        Ok(Self::erase(&mut state, &faults, now, collection, id))
    }

    /// Delivers every notification due at or before `now`, in
    /// (due time, write order). Returns how many were delivered.
    pub fn deliver_due(&self, now: Duration) -> usize {
        let mut delivered = 0;
        loop {
            let (callback, event) = {
                let mut state = lock(&self.state);
                match state.pending.peek() {
                    Some(Reverse(next)) if next.deliver_at <= now => {}
                    _ => break,
                }
                let Some(Reverse(next)) = state.pending.pop() else {
                    break;
                };
                let callback = state
                    .subscribers
                    .iter()
                    .find(|s| s.key == next.subscriber)
                    .map(|s| s.on_change.clone());
                match callback {
                    Some(callback) => {
                        state.stats.delivered += 1;
                        (callback, next.event.0)
                    }
                    None => continue,
                }
            };
            callback(event);
            delivered += 1;
        }
        delivered
    }

    /// Reports an error to every subscription of `session` (simulated
    /// listener failure). Delivery itself is unaffected.
    pub fn fail_subscriptions(&self, session: SessionId, error: StoreError) {
        let callbacks: Vec<ErrorCallback> = lock(&self.state)
            .subscribers
            .iter()
            .filter(|s| s.session == session)
            .map(|s| s.on_error.clone())
            .collect();
        for callback in callbacks {
            callback(error.clone());
        }
    }

    /// Re-sends the current state of every record a session listens to, as a
    /// real store does when a client comes back online.
    pub fn resync(&self, session: SessionId) {
        let faults = self.controller.snapshot();
        let now = self.clock.now();
        let mut state = lock(&self.state);
        let keys: Vec<(u64, Topic)> = state
            .subscribers
            .iter()
            .filter(|s| s.session == session)
            .map(|s| (s.key, s.topic.clone()))
            .collect();
        for (key, topic) in keys {
            for event in Self::current_state(&state.data, &topic) {
                Self::schedule_for(&mut state, &faults, now, key, event);
            }
        }
    }

    fn current_state(data: &BTreeMap<(String, String), Record>, topic: &Topic) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = data
            .iter()
            .filter(|((c, i), _)| topic.matches(c, i))
            .map(|((c, i), record)| ChangeEvent::Upserted {
                collection: c.clone(),
                id: i.clone(),
                record: record.clone(),
            })
            .collect();
        if let (Some(id), true) = (&topic.id, events.is_empty()) {
            events.push(ChangeEvent::Removed {
                collection: topic.collection.clone(),
                id: id.clone(),
            });
        }
        events
    }

    fn latency(state: &mut HubState, faults: &Faults) -> Duration {
        let jitter = if faults.jitter_ms > 0.0 {
            Normal::new(0.0, faults.jitter_ms)
                .map(|normal| normal.sample(&mut state.rng).abs())
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let ms = faults.latency_ms as f64 + jitter;
        state.stats.max_latency_ms = state.stats.max_latency_ms.max(ms as u64);
        Duration::from_secs_f64(ms / 1000.0)
    }

    /// Queues `event` for every matching subscriber.
    fn schedule(state: &mut HubState, faults: &Faults, now: Duration, event: ChangeEvent) {
        let targets: Vec<u64> = state
            .subscribers
            .iter()
            .filter(|s| s.topic.matches(event.collection(), event.id()))
            .map(|s| s.key)
            .collect();
        for key in targets {
            Self::schedule_for(state, faults, now, key, event.clone());
        }
    }

    fn schedule_for(state: &mut HubState, faults: &Faults, now: Duration, key: u64, event: ChangeEvent) {
        let Some(index) = state.subscribers.iter().position(|s| s.key == key) else {
            return;
        };
        if faults.disconnected.contains(&state.subscribers[index].session) {
            state.stats.dropped += 1;
            return;
        }

        let latency = Self::latency(state, faults);
        let subscriber = &mut state.subscribers[index];
        let deliver_at = (now + latency).max(subscriber.last_scheduled);
        subscriber.last_scheduled = deliver_at;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Reverse(Pending {
            deliver_at,
            seq,
            subscriber: key,
            event: PendingEvent(event),
        }));
    }

    /// Fault checks shared by every write path.
    fn admit(&self, state: &mut HubState, faults: &Faults, session: SessionId) -> Result<(), StoreError> {
        state.stats.writes += 1;
        if faults.disconnected.contains(&session) {
            state.stats.failed_writes += 1;
            return Err(StoreError::unavailable(format!("session {} is disconnected", session)));
        }
        if faults.write_failure_rate > 0.0 && state.rng.gen_bool(faults.write_failure_rate) {
            state.stats.failed_writes += 1;
            return Err(StoreError::unavailable("injected write failure"));
        }
        Ok(())
    }

    /// Applies `update` to the current value under one lock; `None` leaves
    /// the record untouched. Returns whether a write happened.
    fn write(
        &self,
        session: SessionId,
        collection: &str,
        id: &str,
        update: impl FnOnce(Option<&Record>) -> Option<Record>,
    ) -> Result<bool, StoreError> {
        let faults = self.controller.snapshot();
        let now = self.clock.now();
        let mut state = lock(&self.state);
        self.admit(&mut state, &faults, session)?;

        let key = (collection.to_string(), id.to_string());
        let Some(record) = update(state.data.get(&key)) else {
            return Ok(false);
        };
        state.data.insert(key, record.clone());
        let event = ChangeEvent::Upserted {
            collection: collection.to_string(),
            id: id.to_string(),
            record,
        };
        Self::schedule(&mut state, &faults, now, event);
        Ok(true)
    }

    fn subscribe(
        self: &Arc<Self>,
        session: SessionId,
        topic: Topic,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription {
        let faults = self.controller.snapshot();
        let now = self.clock.now();
        let key = {
            let mut state = lock(&self.state);
            let key = state.next_key;
            state.next_key += 1;
            state.subscribers.push(Subscriber {
                key,
                session,
                topic: topic.clone(),
                on_change,
                on_error,
                last_scheduled: Duration::ZERO,
            });
            for event in Self::current_state(&state.data, &topic) {
                Self::schedule_for(&mut state, &faults, now, key, event);
            }
            key
        };
        debug!(%session, collection = %topic.collection, "simulated subscription opened");

        let hub = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(hub) = hub.upgrade() {
                lock(&hub.state).subscribers.retain(|s| s.key != key);
            }
        })
    }
}

/// One session's handle on the hub.
pub struct SimStore {
    hub: Arc<SimStoreHub>,
    session: SessionId,
    /// Successful writes per collection
    writes: Mutex<BTreeMap<String, u64>>,
}

impl SimStore {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Successful writes this handle made to `collection`.
    pub fn writes_to(&self, collection: &str) -> u64 {
        lock(&self.writes).get(collection).copied().unwrap_or(0)
    }

    fn count(&self, collection: &str, written: bool) {
        if written {
            *lock(&self.writes).entry(collection.to_string()).or_default() += 1;
        }
    }

    pub fn hub(&self) -> &Arc<SimStoreHub> {
        &self.hub
    }
}

#[async_trait]
impl StateStore for SimStore {
    async fn put(&self, collection: &str, id: &str, record: Record) -> Result<(), StoreError> {
        let written = self.hub.write(self.session, collection, id, |_| Some(record))?;
        self.count(collection, written);
        Ok(())
    }

    async fn merge(&self, collection: &str, id: &str, partial: Record) -> Result<(), StoreError> {
        let written = self.hub.write(self.session, collection, id, |current| {
            let mut value = current
                .cloned()
                .unwrap_or_else(|| Record::Object(Default::default()));
            merge_records(&mut value, &partial);
            Some(value)
        })?;
        self.count(collection, written);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let deleted = self.hub.delete(self.session, collection, id)?;
        self.count(collection, deleted);
        Ok(())
    }

    fn subscribe(
        &self,
        topic: Topic,
        on_change: ChangeCallback,
        on_error: ErrorCallback,
    ) -> Subscription {
        self.hub.subscribe(self.session, topic, on_change, on_error)
    }

    fn supports_conditional_writes(&self) -> bool {
        self.hub.conditional_writes
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<Record>,
        new: Record,
    ) -> Result<bool, StoreError> {
        if !self.hub.conditional_writes {
            return Err(StoreError::Unsupported("compare_and_swap"));
        }
        let written = self
            .hub
            .write(self.session, collection, id, |current| (current == expected.as_ref()).then_some(new))?;
        self.count(collection, written);
        Ok(written)
    }
}
