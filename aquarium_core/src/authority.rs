//! Authority Election - keeps a single simulation owner across sessions.
//!
//! # Protocol
//!
//! ```text
//!  observe owner record ──► absent ────────────► claim
//!         │                 names me ──────────► owner (heartbeat every 5s)
//!         │                 names other, fresh ─► follower
//!         └──────────────── names other, stale ─► claim
//! ```
//!
//! Ownership is derived only from observed records. A session never assumes
//! its own claim won until the store echoes it back.
//!
//! # Race window
//!
//! Without conditional writes two sessions can both see "no owner" and both
//! write a claim. Each briefly believes it owns the tank until the later
//! write reaches both; the session it does not name relinquishes. When the
//! store supports compare-and-swap, a claim only lands if the record is still
//! the absent or stale one the claimant observed, which closes the window.

use crate::config::ElectionConfig;
use crate::error::AquariumError;
use crate::lock;
use aquarium_env::{AquariumContext, ChangeEvent, Record, SessionId, StateStore, Subscription, Topic};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The single shared owner record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityRecord {
    pub session_id: SessionId,
    pub claimed_at: u64,
    pub last_heartbeat: u64,
}

impl AuthorityRecord {
    pub fn from_record(record: &Record) -> Result<Self, AquariumError> {
        Ok(serde_json::from_value(record.clone())?)
    }

    pub fn to_record(&self) -> Result<Record, AquariumError> {
        Ok(serde_json::to_value(self)?)
    }

    /// True once `now_ms` is more than `stale_after_ms` past the last heartbeat.
    pub fn is_stale(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) > stale_after_ms
    }
}

/// Latest known state of the owner record.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Nothing delivered yet
    Unknown,
    /// The record does not exist
    Absent,
    /// A well-formed owner record
    Held { record: AuthorityRecord, raw: Record },
    /// A record that does not decode; treated as claimable
    Unreadable { raw: Record },
}

/// What one [`AuthorityElection::pump`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionAction {
    /// Nothing to do
    Idle,
    /// A claim was written (not yet confirmed)
    Claimed,
    /// A conditional claim lost to a concurrent writer
    ClaimLost,
    /// The owner heartbeat was refreshed
    Heartbeat,
    /// A write failed and was dropped
    WriteFailed,
    /// The election was stopped
    Stopped,
}

/// Counters for one election.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElectionStats {
    pub claims: u64,
    pub claims_lost: u64,
    pub heartbeats: u64,
    pub write_failures: u64,
    pub role_changes: u64,
}

#[derive(Debug)]
struct ElectionState {
    observed: Observation,
    last_claim: Option<Duration>,
    last_heartbeat: Option<Duration>,
}

/// State shared with the subscription callback.
#[derive(Debug)]
struct Shared {
    session_id: SessionId,
    owner: AtomicBool,
    stopped: AtomicBool,
    state: Mutex<ElectionState>,
    claims: AtomicU64,
    claims_lost: AtomicU64,
    heartbeats: AtomicU64,
    write_failures: AtomicU64,
    role_changes: AtomicU64,
}

impl Shared {
    fn observe(&self, event: ChangeEvent) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let observed = match event {
            ChangeEvent::Removed { .. } => Observation::Absent,
            ChangeEvent::Upserted { record, .. } => match AuthorityRecord::from_record(&record) {
                Ok(parsed) => Observation::Held {
                    record: parsed,
                    raw: record,
                },
                Err(err) => {
                    warn!(session = %self.session_id, %err, "unreadable owner record");
                    Observation::Unreadable { raw: record }
                }
            },
        };

        let owner = matches!(&observed, Observation::Held { record, .. } if record.session_id == self.session_id);
        lock(&self.state).observed = observed;

        let was_owner = self.owner.swap(owner, Ordering::AcqRel);
        if owner != was_owner {
            self.role_changes.fetch_add(1, Ordering::Relaxed);
            if owner {
                info!(session = %self.session_id, "acquired simulation authority");
            } else {
                info!(session = %self.session_id, "relinquished simulation authority");
            }
        }
    }
}

/// One session's view of, and participation in, the owner election.
pub struct AuthorityElection<Ctx, S>
where
    Ctx: AquariumContext,
    S: StateStore,
{
    context: Arc<Ctx>,
    store: Arc<S>,
    config: ElectionConfig,
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
}

impl<Ctx, S> AuthorityElection<Ctx, S>
where
    Ctx: AquariumContext,
    S: StateStore,
{
    pub fn new(session_id: SessionId, context: Arc<Ctx>, store: Arc<S>, config: ElectionConfig) -> Self {
        Self {
            context,
            store,
            config,
            shared: Arc::new(Shared {
                session_id,
                owner: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                state: Mutex::new(ElectionState {
                    observed: Observation::Unknown,
                    last_claim: None,
                    last_heartbeat: None,
                }),
                claims: AtomicU64::new(0),
                claims_lost: AtomicU64::new(0),
                heartbeats: AtomicU64::new(0),
                write_failures: AtomicU64::new(0),
                role_changes: AtomicU64::new(0),
            }),
            subscription: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    /// Subscribes to the owner record. Idempotent.
    pub fn start(&self) {
        let mut slot = lock(&self.subscription);
        if slot.is_some() {
            return;
        }
        self.shared.stopped.store(false, Ordering::Release);

        let shared = self.shared.clone();
        let session = self.shared.session_id;
        let subscription = self.store.subscribe(
            Topic::record(self.config.collection.clone(), self.config.record_id.clone()),
            Arc::new(move |event| shared.observe(event)),
            Arc::new(move |err| {
                warn!(%session, %err, "owner subscription failed; keeping last observation");
            }),
        );
        *slot = Some(subscription);
    }

    /// Stops participating: no more writes, no more observations.
    ///
    /// There is no handoff; another session takes over once the heartbeat
    /// goes stale.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        lock(&self.subscription).take();
        if self.shared.owner.swap(false, Ordering::AcqRel) {
            info!(session = %self.shared.session_id, "stopped while holding authority");
        }
    }

    /// Whether this session currently holds authority.
    pub fn is_owner(&self) -> bool {
        self.shared.owner.load(Ordering::Acquire)
    }

    /// Latest observation of the owner record.
    pub fn observation(&self) -> Observation {
        lock(&self.shared.state).observed.clone()
    }

    /// The owner named by the latest observation, if any.
    pub fn observed_owner(&self) -> Option<SessionId> {
        match self.observation() {
            Observation::Held { record, .. } => Some(record.session_id),
            _ => None,
        }
    }

    pub fn stats(&self) -> ElectionStats {
        let s = &self.shared;
        ElectionStats {
            claims: s.claims.load(Ordering::Relaxed),
            claims_lost: s.claims_lost.load(Ordering::Relaxed),
            heartbeats: s.heartbeats.load(Ordering::Relaxed),
            write_failures: s.write_failures.load(Ordering::Relaxed),
            role_changes: s.role_changes.load(Ordering::Relaxed),
        }
    }

    /// Performs whatever the latest observation calls for: claim an absent
    /// or stale record, or refresh our own heartbeat when due.
    pub async fn pump(&self) -> ElectionAction {
        if self.shared.stopped.load(Ordering::Acquire) {
            return ElectionAction::Stopped;
        }

        let now = self.context.now();
        let wall_ms = self.context.unix_millis();
        let me = self.shared.session_id;

        enum Next {
            Idle,
            Claim(Option<Record>),
            Heartbeat,
        }

        let next = {
            let mut state = lock(&self.shared.state);
            let claim_allowed = state
                .last_claim
                .map_or(true, |t| now.saturating_sub(t) >= self.config.claim_retry());

            let next = match &state.observed {
                Observation::Unknown => Next::Idle,
                Observation::Absent if claim_allowed => Next::Claim(None),
                Observation::Unreadable { raw } if claim_allowed => Next::Claim(Some(raw.clone())),
                Observation::Held { record, .. } if record.session_id == me => {
                    let due = state
                        .last_heartbeat
                        .map_or(true, |t| now.saturating_sub(t) >= self.config.heartbeat_interval());
                    if due {
                        Next::Heartbeat
                    } else {
                        Next::Idle
                    }
                }
                Observation::Held { record, raw }
                    if claim_allowed && record.is_stale(wall_ms, self.config.stale_after_ms) =>
                {
                    info!(
                        session = %me,
                        stale_owner = %record.session_id,
                        age_ms = wall_ms.saturating_sub(record.last_heartbeat),
                        "owner heartbeat stale; claiming"
                    );
                    Next::Claim(Some(raw.clone()))
                }
                _ => Next::Idle,
            };

            match next {
                Next::Claim(_) => {
                    // A claim carries a fresh heartbeat
                    state.last_claim = Some(now);
                    state.last_heartbeat = Some(now);
                }
                Next::Heartbeat => state.last_heartbeat = Some(now),
                Next::Idle => {}
            }
            next
        };

        match next {
            Next::Idle => ElectionAction::Idle,
            Next::Claim(expected) => self.claim(expected, wall_ms).await,
            Next::Heartbeat => self.heartbeat(wall_ms).await,
        }
    }

    async fn claim(&self, expected: Option<Record>, wall_ms: u64) -> ElectionAction {
        let me = self.shared.session_id;
        let record = AuthorityRecord {
            session_id: me,
            claimed_at: wall_ms,
            last_heartbeat: wall_ms,
        };
        let record = match record.to_record() {
            Ok(record) => record,
            Err(err) => {
                warn!(session = %me, %err, "could not encode claim");
                return ElectionAction::WriteFailed;
            }
        };

        let result = if self.store.supports_conditional_writes() {
            self.store
                .compare_and_swap(&self.config.collection, &self.config.record_id, expected, record)
                .await
        } else {
            self.store
                .put(&self.config.collection, &self.config.record_id, record)
                .await
                .map(|()| true)
        };

        match result {
            Ok(true) => {
                self.shared.claims.fetch_add(1, Ordering::Relaxed);
                info!(session = %me, "claimed simulation authority");
                ElectionAction::Claimed
            }
            Ok(false) => {
                self.shared.claims_lost.fetch_add(1, Ordering::Relaxed);
                debug!(session = %me, "conditional claim lost to a concurrent writer");
                ElectionAction::ClaimLost
            }
            Err(err) => {
                self.shared.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(session = %me, %err, "claim write failed; dropped");
                ElectionAction::WriteFailed
            }
        }
    }

    async fn heartbeat(&self, wall_ms: u64) -> ElectionAction {
        let partial = serde_json::json!({ "lastHeartbeat": wall_ms });
        match self
            .store
            .merge(&self.config.collection, &self.config.record_id, partial)
            .await
        {
            Ok(()) => {
                self.shared.heartbeats.fetch_add(1, Ordering::Relaxed);
                debug!(session = %self.shared.session_id, wall_ms, "heartbeat");
                ElectionAction::Heartbeat
            }
            Err(err) => {
                self.shared.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(session = %self.shared.session_id, %err, "heartbeat write failed; dropped");
                ElectionAction::WriteFailed
            }
        }
    }

    /// Background loop for production: pump, then sleep, until stopped.
    pub async fn run(self: Arc<Self>) {
        while !self.shared.stopped.load(Ordering::Acquire) {
            self.pump().await;
            self.context.sleep(self.config.poll_interval()).await;
        }
        debug!(session = %self.shared.session_id, "election loop exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MemoryStore};

    const OWNER: (&str, &str) = ("aquarium_owner", "owner");

    fn election(
        seed: u64,
        clock: &Arc<ManualClock>,
        store: &Arc<MemoryStore>,
    ) -> AuthorityElection<ManualClock, MemoryStore> {
        AuthorityElection::new(
            SessionId::from_seed(seed),
            clock.clone(),
            store.clone(),
            ElectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_single_session_claims_and_owns() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);

        assert!(!a.is_owner());
        assert_eq!(a.pump().await, ElectionAction::Idle);

        a.start();
        assert_eq!(a.observation(), Observation::Absent);
        assert_eq!(a.pump().await, ElectionAction::Claimed);
        store.flush();

        assert!(a.is_owner());
        assert_eq!(a.observed_owner(), Some(a.session_id()));
    }

    #[tokio::test]
    async fn test_owner_heartbeats_on_interval() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        a.start();
        a.pump().await;
        store.flush();

        assert_eq!(a.pump().await, ElectionAction::Idle);

        clock.advance(Duration::from_secs(4));
        assert_eq!(a.pump().await, ElectionAction::Idle);

        clock.advance(Duration::from_secs(1));
        assert_eq!(a.pump().await, ElectionAction::Heartbeat);
        assert_eq!(a.pump().await, ElectionAction::Idle);
        store.flush();

        let raw = store.get(OWNER.0, OWNER.1).unwrap();
        let record = AuthorityRecord::from_record(&raw).unwrap();
        assert_eq!(record.last_heartbeat, clock.unix_millis());
        assert_eq!(record.session_id, a.session_id());
        assert_eq!(a.stats().heartbeats, 1);
        assert!(a.is_owner());
    }

    #[tokio::test]
    async fn test_simultaneous_claims_converge() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        let b = election(2, &clock, &store);
        a.start();
        b.start();

        // Both saw "no owner" and both write before either hears back
        assert_eq!(a.pump().await, ElectionAction::Claimed);
        assert_eq!(b.pump().await, ElectionAction::Claimed);
        store.flush();

        assert!(a.is_owner() ^ b.is_owner());
        assert_eq!(a.observed_owner(), b.observed_owner());
    }

    #[tokio::test]
    async fn test_conditional_claims_admit_one_winner() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared_with_cas();
        let a = election(1, &clock, &store);
        let b = election(2, &clock, &store);
        a.start();
        b.start();

        assert_eq!(a.pump().await, ElectionAction::Claimed);
        assert_eq!(b.pump().await, ElectionAction::ClaimLost);
        store.flush();

        assert!(a.is_owner());
        assert!(!b.is_owner());
    }

    #[tokio::test]
    async fn test_stale_owner_is_replaced() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        let b = election(2, &clock, &store);

        a.start();
        a.pump().await;
        store.flush();
        b.start();
        assert!(a.is_owner());

        // Owner vanishes without a handoff
        a.stop();
        clock.advance(Duration::from_secs(10));
        assert_eq!(b.pump().await, ElectionAction::Idle);

        clock.advance(Duration::from_secs(6));
        assert_eq!(b.pump().await, ElectionAction::Claimed);
        store.flush();
        assert!(b.is_owner());
        assert!(!a.is_owner());
    }

    #[tokio::test]
    async fn test_fresh_owner_is_respected() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        let b = election(2, &clock, &store);
        a.start();
        a.pump().await;
        store.flush();
        b.start();

        for _ in 0..10 {
            clock.advance(Duration::from_secs(5));
            a.pump().await;
            store.flush();
            assert_eq!(b.pump().await, ElectionAction::Idle);
        }
        assert!(a.is_owner());
        assert!(!b.is_owner());
    }

    #[tokio::test]
    async fn test_failed_claim_is_dropped_and_retried_later() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        a.start();

        store.set_failing(true);
        assert_eq!(a.pump().await, ElectionAction::WriteFailed);
        store.set_failing(false);

        // Within the retry spacing nothing is written
        assert_eq!(a.pump().await, ElectionAction::Idle);
        clock.advance(Duration::from_secs(1));
        assert_eq!(a.pump().await, ElectionAction::Claimed);
        store.flush();
        assert!(a.is_owner());
        assert_eq!(a.stats().write_failures, 1);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_claimable() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        store.put(OWNER.0, OWNER.1, serde_json::json!({ "garbage": 1 })).await.unwrap();
        store.flush();

        let a = election(1, &clock, &store);
        a.start();
        assert!(matches!(a.observation(), Observation::Unreadable { .. }));
        assert_eq!(a.pump().await, ElectionAction::Claimed);
        store.flush();
        assert!(a.is_owner());
    }

    #[tokio::test]
    async fn test_stopped_election_does_nothing() {
        let clock = ManualClock::shared();
        let store = MemoryStore::shared();
        let a = election(1, &clock, &store);
        a.start();
        a.stop();
        assert_eq!(a.pump().await, ElectionAction::Stopped);
        assert!(store.get(OWNER.0, OWNER.1).is_none());
    }

    #[test]
    fn test_record_wire_shape() {
        let record = AuthorityRecord {
            session_id: SessionId::from_seed(1),
            claimed_at: 10,
            last_heartbeat: 20,
        };
        let json = record.to_record().unwrap();
        assert_eq!(json["claimedAt"], 10);
        assert_eq!(json["lastHeartbeat"], 20);
        assert!(json["sessionId"].is_string());
        assert!(record.is_stale(15_021, 15_000));
        assert!(!record.is_stale(15_020, 15_000));
    }
}
