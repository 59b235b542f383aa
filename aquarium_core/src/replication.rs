//! Replication Channel - owner snapshots out, follower mirror in.
//!
//! ```text
//!   Owner tick ──► SnapshotPublisher ──put(fish_state/<id>)──► Store
//!                  (≥ publish_interval since last success)        │
//!                                                                 ▼
//!   Follower tick ◄── FollowerMirror::apply ◄── staged map ◄── on_change
//! ```
//!
//! Followers never write snapshots. They only ever see the latest record
//! per fish and ease toward it, so a late or dropped publish costs
//! smoothness, not correctness.

use crate::behavior::BehaviorMode;
use crate::error::AquariumError;
use crate::fish::{Fish, Personality};
use crate::lock;
use aquarium_env::{ChangeCallback, ChangeEvent, Record, StateStore};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// The owner's published state of one fish. Numeric state only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    pub species: String,
    pub color: String,
    pub size: f64,
    pub base_speed: f64,
    pub personality: Personality,
    pub behavior: BehaviorMode,
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    /// Quaternion as `[x, y, z, w]`
    pub orientation: [f64; 4],
    pub home_position: [f64; 3],
    /// Wall-clock milliseconds of the publish
    pub last_updated: u64,
}

impl SnapshotRecord {
    pub fn capture(fish: &Fish, wall_ms: u64) -> Self {
        let q = fish.orientation.quaternion();
        Self {
            id: fish.id.clone(),
            name: fish.name.clone(),
            species: fish.species.clone(),
            color: fish.color.clone(),
            size: fish.size,
            base_speed: fish.base_speed,
            personality: fish.personality,
            behavior: fish.behavior,
            position: fish.position.into(),
            velocity: fish.velocity.into(),
            orientation: [q.i, q.j, q.k, q.w],
            home_position: fish.home.into(),
            last_updated: wall_ms,
        }
    }

    pub fn to_record(&self) -> Result<Record, AquariumError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decodes a store record, rejecting non-finite kinematics.
    pub fn from_record(record: &Record) -> Result<Self, AquariumError> {
        let snapshot: Self = serde_json::from_value(record.clone())?;
        let finite = snapshot
            .position
            .iter()
            .chain(&snapshot.velocity)
            .chain(&snapshot.orientation)
            .all(|v| v.is_finite());
        if !finite {
            return Err(AquariumError::invalid_record(format!(
                "snapshot {} has non-finite state",
                snapshot.id
            )));
        }
        Ok(snapshot)
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::from(self.velocity)
    }

    /// The published orientation; a degenerate quaternion reads as identity.
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let [x, y, z, w] = self.orientation;
        UnitQuaternion::try_new(Quaternion::new(w, x, y, z), 1e-9).unwrap_or_else(UnitQuaternion::identity)
    }
}

/// Result of one [`SnapshotPublisher::maybe_publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Too soon after the last successful publish
    Throttled,
    /// Every snapshot was written
    Published(usize),
    /// At least one write failed; the throttle was not advanced
    Failed { written: usize, failed: usize },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published(_))
    }
}

/// Owner-side, rate-limited snapshot writer.
#[derive(Debug, Clone)]
pub struct SnapshotPublisher {
    collection: String,
    interval: Duration,
    last_success: Option<Duration>,
}

impl SnapshotPublisher {
    pub fn new(collection: impl Into<String>, interval: Duration) -> Self {
        Self {
            collection: collection.into(),
            interval,
            last_success: None,
        }
    }

    /// Monotonic time of the last successful publish.
    pub fn last_success(&self) -> Option<Duration> {
        self.last_success
    }

    /// Forgets the throttle, so the next call publishes. Used when a session
    /// becomes owner.
    pub fn reset(&mut self) {
        self.last_success = None;
    }

    /// Writes one snapshot per fish unless the last successful publish was
    /// less than the interval ago. Failures are logged and dropped.
    pub async fn maybe_publish<S>(&mut self, store: &S, fishes: &[Fish], now: Duration, wall_ms: u64) -> PublishOutcome
    where
        S: StateStore + ?Sized,
    {
        if let Some(last) = self.last_success {
            if now.saturating_sub(last) < self.interval {
                return PublishOutcome::Throttled;
            }
        }

        let mut written = 0;
        let mut failed = 0;
        for fish in fishes {
            let result = match SnapshotRecord::capture(fish, wall_ms).to_record() {
                Ok(record) => store.put(&self.collection, &fish.id, record).await.map_err(AquariumError::from),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => written += 1,
                Err(err) => {
                    failed += 1;
                    warn!(fish = %fish.id, %err, "snapshot write failed; dropped");
                }
            }
        }

        if failed > 0 {
            return PublishOutcome::Failed { written, failed };
        }
        self.last_success = Some(now);
        debug!(count = written, "published snapshots");
        PublishOutcome::Published(written)
    }
}

/// Follower-side staging of the latest snapshot per fish.
///
/// The subscription callback writes, [`FollowerMirror::apply`] reads on the
/// next tick. Clones share the same staging map.
#[derive(Debug, Clone)]
pub struct FollowerMirror {
    staged: Arc<Mutex<HashMap<String, SnapshotRecord>>>,
    interpolation_rate: f64,
}

impl FollowerMirror {
    pub fn new(interpolation_rate: f64) -> Self {
        Self {
            staged: Arc::default(),
            interpolation_rate,
        }
    }

    /// Stages one store notification. The store delivers in order, so the
    /// latest delivery wins whatever its `last_updated`; that stamp comes
    /// from the publishing owner's clock. Undecodable records are logged and
    /// skipped.
    pub fn stage(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Upserted { id, record, .. } => {
                let snapshot = match SnapshotRecord::from_record(&record) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        warn!(record = %id, %err, "unreadable snapshot; skipped");
                        return;
                    }
                };
                lock(&self.staged).insert(id, snapshot);
            }
            ChangeEvent::Removed { id, .. } => {
                lock(&self.staged).remove(&id);
            }
        }
    }

    /// Subscription callback feeding this mirror.
    pub fn callback(&self) -> ChangeCallback {
        let mirror = self.clone();
        Arc::new(move |event| mirror.stage(event))
    }

    pub fn latest(&self, id: &str) -> Option<SnapshotRecord> {
        lock(&self.staged).get(id).cloned()
    }

    pub fn forget(&self, id: &str) {
        lock(&self.staged).remove(id);
    }

    pub fn len(&self) -> usize {
        lock(&self.staged).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eases every fish toward its staged snapshot. Fish with no snapshot
    /// yet sit at their home position with zero velocity. Returns how many
    /// fish had a snapshot.
    pub fn apply(&self, fishes: &mut [Fish], dt: f64) -> usize {
        let t = 1.0 - (-self.interpolation_rate * dt).exp();
        let staged = lock(&self.staged);
        let mut mirrored = 0;

        for fish in fishes.iter_mut() {
            let Some(snapshot) = staged.get(&fish.id) else {
                fish.position = fish.home;
                fish.velocity = Vector3::zeros();
                continue;
            };

            let target = snapshot.position();
            fish.position += (target - fish.position) * t;

            let facing = snapshot.orientation();
            fish.orientation = fish.orientation.try_slerp(&facing, t, 1e-9).unwrap_or(facing);

            fish.velocity = snapshot.velocity();
            fish.behavior = snapshot.behavior;
            fish.personality = snapshot.personality;
            fish.name.clone_from(&snapshot.name);
            fish.color.clone_from(&snapshot.color);
            fish.size = snapshot.size;
            fish.base_speed = snapshot.base_speed;
            mirrored += 1;
        }
        mirrored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FishDefinition;
    use crate::testing::MemoryStore;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn fish(id: &str, home: [f64; 3]) -> Fish {
        let def = FishDefinition::new(id, "Nemo", "clownfish");
        Fish::at_rest(&def, Vector3::from(home))
    }

    fn snapshot_at(id: &str, position: [f64; 3], wall_ms: u64) -> SnapshotRecord {
        let mut f = fish(id, [0.0, 0.0, 0.0]);
        f.position = Vector3::from(position);
        f.velocity = Vector3::new(1.0, 0.0, 0.0);
        SnapshotRecord::capture(&f, wall_ms)
    }

    fn upsert(snapshot: &SnapshotRecord) -> ChangeEvent {
        ChangeEvent::Upserted {
            collection: "fish_state".into(),
            id: snapshot.id.clone(),
            record: snapshot.to_record().unwrap(),
        }
    }

    #[test]
    fn test_record_uses_camel_case_keys() {
        let record = snapshot_at("f1", [1.0, 2.0, 3.0], 7).to_record().unwrap();
        let object = record.as_object().unwrap();
        for key in ["baseSpeed", "homePosition", "lastUpdated", "orientation", "personality", "behavior"] {
            assert!(object.contains_key(key), "missing {}", key);
        }
        assert_eq!(record["behavior"]["mode"], "cruising");
        assert_eq!(record["lastUpdated"], 7);
    }

    #[test]
    fn test_from_record_rejects_missing_position() {
        let mut record = snapshot_at("f1", [1.0, 2.0, 3.0], 7).to_record().unwrap();
        record.as_object_mut().unwrap().remove("position");
        assert!(SnapshotRecord::from_record(&record).is_err());
    }

    #[test]
    fn test_degenerate_orientation_reads_as_identity() {
        let mut snapshot = snapshot_at("f1", [0.0; 3], 0);
        snapshot.orientation = [0.0; 4];
        assert_eq!(snapshot.orientation(), UnitQuaternion::identity());
    }

    #[tokio::test]
    async fn test_publish_throttled_at_60hz() {
        let store = MemoryStore::shared();
        let fishes = vec![fish("a", [0.0; 3]), fish("b", [1.0, 0.0, 0.0])];
        let mut publisher = SnapshotPublisher::new("fish_state", Duration::from_millis(100));

        let mut publishes = 0;
        let mut last: Option<Duration> = None;
        for frame in 0..120u32 {
            let now = Duration::from_secs_f64(frame as f64 / 60.0);
            if publisher.maybe_publish(&*store, &fishes, now, 0).await.is_published() {
                if let Some(prev) = last {
                    assert!(now - prev >= Duration::from_millis(100));
                }
                last = Some(now);
                publishes += 1;
            }
        }

        // 2 s of frames: at most one publish per 100 ms
        assert!(publishes <= 20, "published {} times", publishes);
        assert!(publishes >= 10, "published {} times", publishes);
        assert_eq!(store.count("fish_state"), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_advance_throttle() {
        let store = MemoryStore::shared();
        let fishes = vec![fish("a", [0.0; 3])];
        let mut publisher = SnapshotPublisher::new("fish_state", Duration::from_millis(100));

        store.set_failing(true);
        let outcome = publisher.maybe_publish(&*store, &fishes, Duration::ZERO, 0).await;
        assert_eq!(outcome, PublishOutcome::Failed { written: 0, failed: 1 });
        assert_eq!(publisher.last_success(), None);

        store.set_failing(false);
        let outcome = publisher
            .maybe_publish(&*store, &fishes, Duration::from_millis(16), 0)
            .await;
        assert_eq!(outcome, PublishOutcome::Published(1));
        assert!(store.get("fish_state", "a").is_some());
    }

    #[test]
    fn test_follower_without_snapshot_sits_at_home() {
        let mirror = FollowerMirror::new(10.0);
        let mut fishes = vec![fish("x", [3.0, -1.0, 2.0])];
        fishes[0].position = Vector3::new(9.0, 9.0, 9.0);
        fishes[0].velocity = Vector3::new(1.0, 1.0, 1.0);

        for _ in 0..5 {
            assert_eq!(mirror.apply(&mut fishes, 1.0 / 60.0), 0);
        }
        assert_eq!(fishes[0].position, Vector3::new(3.0, -1.0, 2.0));
        assert_eq!(fishes[0].velocity, Vector3::zeros());
    }

    #[test]
    fn test_follower_converges_on_snapshot() {
        let mirror = FollowerMirror::new(10.0);
        let mut fishes = vec![fish("x", [0.0; 3])];
        mirror.stage(upsert(&snapshot_at("x", [4.0, 2.0, -1.0], 1)));

        assert_eq!(mirror.apply(&mut fishes, 1.0 / 60.0), 1);
        let first = fishes[0].position;
        assert!(first.x > 0.0 && first.x < 4.0, "interpolates, does not snap");
        assert_relative_eq!(fishes[0].velocity, Vector3::new(1.0, 0.0, 0.0));

        for _ in 0..300 {
            mirror.apply(&mut fishes, 1.0 / 60.0);
        }
        assert_relative_eq!(fishes[0].position, Vector3::new(4.0, 2.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_successor_with_lagging_clock_is_mirrored() {
        let mirror = FollowerMirror::new(10.0);
        let mut fishes = vec![fish("x", [0.0; 3])];
        mirror.stage(upsert(&snapshot_at("x", [5.0, 0.0, 0.0], 1_704_067_202_000)));

        // New owner's wall clock is two seconds behind the crashed one
        for i in 0..19u64 {
            let x = -5.0 + i as f64 * 0.1;
            mirror.stage(upsert(&snapshot_at("x", [x, 0.0, 0.0], 1_704_067_200_100 + i * 100)));
            mirror.apply(&mut fishes, 1.0 / 60.0);
        }
        assert_relative_eq!(mirror.latest("x").unwrap().position[0], -3.2, epsilon = 1e-9);
        for _ in 0..120 {
            mirror.apply(&mut fishes, 1.0 / 60.0);
        }
        assert_relative_eq!(fishes[0].position.x, -3.2, epsilon = 1e-3);

        mirror.stage(ChangeEvent::Removed {
            collection: "fish_state".into(),
            id: "x".into(),
        });
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_unreadable_snapshot_is_skipped() {
        let mirror = FollowerMirror::new(10.0);
        mirror.stage(ChangeEvent::Upserted {
            collection: "fish_state".into(),
            id: "x".into(),
            record: serde_json::json!({ "id": "x", "position": "up" }),
        });
        assert!(mirror.latest("x").is_none());
    }

    #[test]
    fn test_opposite_orientation_does_not_panic() {
        let mirror = FollowerMirror::new(10.0);
        let mut fishes = vec![fish("x", [0.0; 3])];
        let mut snapshot = snapshot_at("x", [0.0; 3], 1);
        let turned = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
        let q = turned.quaternion();
        snapshot.orientation = [q.i, q.j, q.k, q.w];
        mirror.stage(upsert(&snapshot));

        mirror.apply(&mut fishes, 1.0 / 60.0);
        assert!(fishes[0].orientation.quaternion().coords.iter().all(|v| v.is_finite()));
    }
}
