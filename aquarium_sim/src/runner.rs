//! Scenario runner - executes fault scenarios against a SimWorld.

use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::oracle::Oracle;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use aquarium_core::{mean_speed, AuthorityRecord, BehaviorCensus, SessionConfig};
use aquarium_env::{AquariumContext, SessionId, StateStore};
use nalgebra::Vector3;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Fish in the catalog at the end
    pub final_fish_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Store writes attempted
    pub store_writes: u64,

    /// Store writes that failed
    pub failed_writes: u64,

    /// Notifications delivered
    pub delivered: u64,

    /// Notifications dropped (disconnected sessions)
    pub dropped: u64,

    /// Maximum notification latency (ms)
    pub max_latency_ms: u64,

    /// Successful claims across all sessions
    pub claims: u64,

    /// Snapshot publishes across all sessions
    pub publishes: u64,

    /// Publishes with at least one failed write
    pub publish_failures: u64,

    /// Frames with more than one owner
    pub split_frames: u64,

    /// Longest run of split frames
    pub max_split_run: u64,

    /// Changes of the single owner
    pub owner_changes: u64,

    /// Behavior modes in the final owner's tank
    pub census: BehaviorCensus,

    /// Mean fish speed in the final owner's tank
    pub mean_speed: f64,

    /// Share of its ticks the final owner spent as owner
    pub owner_ratio: f64,
}

/// Drives one world frame by frame and feeds the oracle and export.
struct Harness<'a> {
    world: SimWorld,
    oracle: Oracle,
    export: Option<&'a mut SimExport>,
    export_every: u64,
    events: Vec<SimEvent>,
    end_time: f64,
}

impl<'a> Harness<'a> {
    async fn frame(&mut self) {
        let frame = self.world.step().await;
        self.oracle.observe(&self.world, &frame);

        if let Some(export) = self.export.as_deref_mut() {
            if frame.tick % self.export_every == 0 || !self.events.is_empty() {
                export.add_frame(SimFrame::capture(&self.world, std::mem::take(&mut self.events)));
            }
        }
    }

    fn frames_for(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.world.config.fps as f64).round() as u64
    }

    /// Runs for `secs` of simulated time.
    async fn run_for(&mut self, secs: f64) {
        for _ in 0..self.frames_for(secs) {
            self.frame().await;
        }
    }

    /// Runs until simulation time reaches `time`.
    async fn run_until_time(&mut self, time: f64) {
        let remaining = time - self.world.time();
        self.run_for(remaining).await;
    }

    /// Runs until `done` holds or `secs` elapse; returns the time it held.
    async fn run_until(&mut self, secs: f64, done: impl Fn(&SimWorld) -> bool) -> Option<f64> {
        for _ in 0..self.frames_for(secs) {
            self.frame().await;
            if done(&self.world) {
                return Some(self.world.time());
            }
        }
        None
    }

    async fn run_to_end(&mut self) {
        self.run_until_time(self.end_time).await;
    }

    fn event(&mut self, message: String) {
        info!(t = format!("{:.2}", self.world.time()), "{}", message);
        if self.export.is_some() {
            self.events.push(SimEvent::info(message));
        }
    }

    fn single_owner(&self) -> Result<SessionId, String> {
        match self.world.owners().as_slice() {
            [one] => Ok(*one),
            [] => Err(format!("no owner at t={:.2}s", self.world.time())),
            many => Err(format!("{} owners at t={:.2}s", many.len(), self.world.time())),
        }
    }

    /// Every alive session names `owner` in its latest observation.
    fn all_agree_on(&self, owner: SessionId) -> Result<(), String> {
        for handle in self.world.alive() {
            let seen = handle.session.election().observed_owner();
            if seen != Some(owner) {
                return Err(format!("session {} sees owner {:?}, expected {}", handle.id, seen, owner));
            }
        }
        Ok(())
    }

    /// Followers mirror the owner within `tolerance` on average.
    fn followers_track(&self, owner: SessionId, tolerance: f64) -> Result<(), String> {
        let Some(leader) = self.world.session(owner) else {
            return Err(format!("owner {} not found", owner));
        };
        for handle in self.world.alive().filter(|h| h.id != owner) {
            let fishes = handle.session.fishes();
            if fishes.is_empty() {
                continue;
            }
            let total: f64 = fishes
                .iter()
                .filter_map(|f| leader.session.fish(&f.id).map(|l| (f.position - l.position).norm()))
                .sum();
            let mean = total / fishes.len() as f64;
            if mean > tolerance {
                return Err(format!(
                    "follower {} lags owner by {:.2} on average (> {:.2})",
                    handle.id, mean, tolerance
                ));
            }
        }
        Ok(())
    }

    fn metrics(&self) -> ScenarioMetrics {
        let stats = self.world.hub().stats();
        let mut metrics = ScenarioMetrics {
            store_writes: stats.writes,
            failed_writes: stats.failed_writes,
            delivered: stats.delivered,
            dropped: stats.dropped,
            max_latency_ms: stats.max_latency_ms,
            split_frames: self.oracle.split_frames(),
            max_split_run: self.oracle.max_split_run(),
            owner_changes: self
                .oracle
                .timeline()
                .iter()
                .filter(|(_, owner)| owner.is_some())
                .count()
                .saturating_sub(1) as u64,
            ..Default::default()
        };
        if let Some(owner) = self.single_owner().ok().and_then(|id| self.world.session(id)) {
            let fishes = owner.session.fishes();
            metrics.census = BehaviorCensus::of(fishes);
            metrics.mean_speed = mean_speed(fishes);
            metrics.owner_ratio = owner.session.metrics().owner_ratio();
        }
        for handle in self.world.sessions() {
            metrics.claims += handle.session.election().stats().claims;
            metrics.publishes += handle.session.metrics().publishes;
            metrics.publish_failures += handle.session.metrics().publish_failures;
        }
        metrics
    }
}

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of sessions
    sessions: usize,

    /// Starter catalog size
    fish: usize,

    /// Render rate in Hz
    fps: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Per-session configuration
    session_config: SessionConfig,

    /// Export every Nth frame
    export_every: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, sessions: usize) -> Self {
        Self {
            seed,
            sessions,
            fish: 12,
            fps: 60,
            max_duration_secs: 30.0,
            session_config: SessionConfig::default(),
            export_every: 10,
        }
    }

    /// Sets the starter catalog size.
    pub fn with_fish(mut self, fish: usize) -> Self {
        self.fish = fish;
        self
    }

    /// Sets the render rate.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the per-session configuration.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets how often frames are exported.
    pub fn with_export_every(mut self, frames: u64) -> Self {
        self.export_every = frames.max(1);
        self
    }

    /// The world configuration a scenario runs with.
    pub fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let sessions = match scenario {
            ScenarioId::SoloClaim => 1,
            _ => self.sessions.max(scenario.min_sessions()),
        };
        let base = SimConfig {
            seed: self.seed,
            sessions,
            fish: self.fish,
            fps: self.fps,
            duration_secs: self.max_duration_secs.max(scenario.min_duration()),
            session: self.session_config.clone(),
            ..SimConfig::default()
        };

        match scenario {
            ScenarioId::SoloClaim => SimConfig {
                latency_ms: 20,
                jitter_ms: 5.0,
                ..base
            },
            ScenarioId::ContestedClaim => SimConfig {
                latency_ms: 40,
                jitter_ms: 20.0,
                ..base
            },
            ScenarioId::ContestedClaimCas => SimConfig {
                latency_ms: 40,
                jitter_ms: 20.0,
                conditional_writes: true,
                ..base
            },
            ScenarioId::FlakyStore => SimConfig {
                latency_ms: 40,
                jitter_ms: 50.0,
                write_failure_rate: 0.3,
                ..base
            },
            _ => base,
        }
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).await
    }

    /// Runs a scenario, recording frames into `export`.
    pub async fn run_with_export(&self, scenario: ScenarioId, export: &mut SimExport) -> ScenarioResult {
        self.execute(scenario, Some(export)).await
    }

    async fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let config = self.config_for(scenario);
        let end_time = config.duration_secs;
        let bounds = config.session.bounds;

        let mut harness = Harness {
            world: SimWorld::new(config),
            oracle: Oracle::new(bounds),
            export,
            export_every: self.export_every,
            events: Vec::new(),
            end_time,
        };

        let outcome = match harness.world.seed_catalog().await {
            Ok(_) => match scenario {
                ScenarioId::SoloClaim => self.run_solo_claim(&mut harness).await,
                ScenarioId::ContestedClaim => self.run_contested_claim(&mut harness).await,
                ScenarioId::ContestedClaimCas => self.run_contested_claim_cas(&mut harness).await,
                ScenarioId::OwnerCrash => self.run_owner_crash(&mut harness).await,
                ScenarioId::OwnerPartition => self.run_owner_partition(&mut harness).await,
                ScenarioId::ColdFollower => self.run_cold_follower(&mut harness).await,
                ScenarioId::FlakyStore => self.run_flaky_store(&mut harness).await,
                ScenarioId::Purchase => self.run_purchase(&mut harness).await,
                ScenarioId::CatalogChurn => self.run_catalog_churn(&mut harness).await,
            },
            Err(err) => Err(format!("could not seed catalog: {}", err)),
        };

        let mut failures: Vec<String> = harness.oracle.violations().iter().map(|v| v.to_string()).collect();
        if let Err(reason) = outcome {
            failures.insert(0, reason);
        }
        for failure in &failures {
            warn!("{}: {}", scenario.name(), failure);
        }

        let passed = failures.is_empty();
        let final_owner = harness.single_owner().ok();
        let metrics = harness.metrics();
        let final_fish_count = harness.world.hub().ids(&harness.world.config.session.catalog_collection).len();

        if let Some(export) = harness.export.as_deref_mut() {
            export.add_frame(SimFrame::capture(&harness.world, std::mem::take(&mut harness.events)));
            export.finalize(passed, final_owner.map(|o| o.to_string()), failures.clone());
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: harness.world.tick_count(),
            final_time_secs: harness.world.time(),
            final_fish_count,
            failure_reason: failures.into_iter().next(),
            metrics,
        }
    }

    /// AQ-001: SoloClaim - a lone session takes an empty tank.
    ///
    /// **Assertion**: owner within 1s, never split, publishes at most once
    /// per publish interval.
    async fn run_solo_claim(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();

        let claimed_at = h
            .run_until(1.0, |w| w.owners().len() == 1)
            .await
            .ok_or("no owner within 1s")?;
        h.event(format!("owner established at {:.2}s", claimed_at));
        h.run_to_end().await;

        let owner = h.single_owner()?;
        let publishes = h.world.session(owner).map_or(0, |s| s.session.metrics().publishes);
        let interval = h.world.config.session.replication.publish_interval().as_secs_f64();
        let allowed = ((h.world.time() - claimed_at) / interval).ceil() as u64 + 1;
        if publishes == 0 || publishes > allowed {
            return Err(format!("{} publishes, expected 1..={}", publishes, allowed));
        }
        if h.oracle.split_frames() > 0 {
            return Err("a lone session saw a split".into());
        }
        Ok(())
    }

    /// AQ-002: ContestedClaim - every session races for the claim.
    ///
    /// **Assertion**: one owner settles that everyone agrees on; splits are
    /// brief; followers track the owner.
    async fn run_contested_claim(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        h.run_to_end().await;

        let owner = h.single_owner()?;
        h.all_agree_on(owner)?;
        let limit = h.world.config.fps as u64;
        if h.oracle.max_split_run() > limit {
            return Err(format!("split lasted {} frames (> {})", h.oracle.max_split_run(), limit));
        }
        debug!(split_frames = h.oracle.split_frames(), "contested claim settled");
        h.followers_track(owner, 2.0)
    }

    /// AQ-003: ContestedClaimCas - the race on a conditional store.
    ///
    /// **Assertion**: exactly one claim lands and no frame has two owners.
    async fn run_contested_claim_cas(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        h.run_to_end().await;

        let owner = h.single_owner()?;
        h.all_agree_on(owner)?;
        if h.oracle.split_frames() > 0 {
            return Err(format!("{} split frames despite CAS", h.oracle.split_frames()));
        }
        let claims: u64 = h.world.sessions().iter().map(|s| s.session.election().stats().claims).sum();
        if claims != 1 {
            return Err(format!("{} claims landed, expected 1", claims));
        }
        h.followers_track(owner, 2.0)
    }

    /// AQ-004: OwnerCrash - the owner vanishes at 5s.
    ///
    /// **Assertion**: nobody takes over before the heartbeat is stale, and
    /// somebody does within one heartbeat interval after that.
    async fn run_owner_crash(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        h.run_until(2.0, |w| w.owners().len() == 1)
            .await
            .ok_or("no owner within 2s")?;
        h.run_until_time(5.0).await;

        let crashed = h.single_owner()?;
        let last_heartbeat = self.last_heartbeat_secs(&h.world)?;
        h.world.kill(crashed);
        h.event(format!("owner {} crashed (last heartbeat {:.2}s)", crashed, last_heartbeat));

        let election = &h.world.config.session.election;
        let stale = election.stale_after_ms as f64 / 1000.0;
        let window = stale + election.heartbeat_interval().as_secs_f64() + 1.0;
        let took_over = h
            .run_until(window + 5.0, |w| w.owners().len() == 1)
            .await
            .ok_or("nobody took over")?;
        h.event(format!("takeover at {:.2}s", took_over));

        if took_over < last_heartbeat + stale {
            return Err(format!(
                "takeover at {:.2}s before heartbeat went stale at {:.2}s",
                took_over,
                last_heartbeat + stale
            ));
        }
        if took_over > last_heartbeat + window {
            return Err(format!("takeover at {:.2}s is too late", took_over));
        }

        h.run_to_end().await;
        let owner = h.single_owner()?;
        if owner == crashed {
            return Err("crashed session still owns the tank".into());
        }
        h.all_agree_on(owner)
    }

    /// AQ-005: OwnerPartition - the owner is cut off for 20s.
    ///
    /// **Assertion**: a successor takes over during the partition and the
    /// old owner relinquishes once it hears about it.
    async fn run_owner_partition(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        h.run_until(2.0, |w| w.owners().len() == 1)
            .await
            .ok_or("no owner within 2s")?;
        h.run_until_time(5.0).await;

        let isolated = h.single_owner()?;
        h.world.disconnect(isolated);
        h.event(format!("owner {} partitioned", isolated));
        h.run_until_time(25.0).await;

        let successor = h
            .world
            .owners()
            .into_iter()
            .find(|&id| id != isolated)
            .ok_or("no successor during the partition")?;
        h.world.reconnect(isolated);
        h.event(format!("partition healed; successor {}", successor));
        h.run_to_end().await;

        let owner = h.single_owner()?;
        if owner != successor {
            return Err(format!("owner {} after healing, expected {}", owner, successor));
        }
        h.all_agree_on(owner)
    }

    /// AQ-006: ColdFollower - a live owner record whose holder never
    /// publishes.
    ///
    /// **Assertion**: every fish sits at its catalog position at rest.
    async fn run_cold_follower(&self, h: &mut Harness<'_>) -> Result<(), String> {
        let election = h.world.config.session.election.clone();
        let phantom = SessionId::from_seed(0xC01D);
        let now_ms = h.world.context.unix_millis();
        let record = AuthorityRecord {
            session_id: phantom,
            claimed_at: now_ms,
            last_heartbeat: now_ms,
        }
        .to_record()
        .map_err(|e| e.to_string())?;
        h.world
            .admin()
            .put(&election.collection, &election.record_id, record)
            .await
            .map_err(|e| e.to_string())?;

        h.world.spawn_sessions();
        let definitions = aquarium_core::starter_catalog(h.world.config.fish);
        let bounds = h.world.config.session.bounds;
        let heartbeat_every = election.heartbeat_interval().as_secs_f64();
        let mut next_heartbeat = heartbeat_every;

        while h.world.time() < h.end_time - 1e-9 {
            h.run_for(0.5).await;

            if h.world.time() >= next_heartbeat {
                let partial = serde_json::json!({ "lastHeartbeat": h.world.context.unix_millis() });
                h.world
                    .admin()
                    .merge(&election.collection, &election.record_id, partial)
                    .await
                    .map_err(|e| e.to_string())?;
                next_heartbeat += heartbeat_every;
            }

            if !h.world.owners().is_empty() {
                return Err(format!("a session claimed a live tank at {:.2}s", h.world.time()));
            }
            if h.world.time() < 0.5 {
                continue;
            }
            for handle in h.world.alive() {
                for definition in &definitions {
                    let Some(fish) = handle.session.fish(&definition.id) else {
                        return Err(format!("session {} is missing {}", handle.id, definition.id));
                    };
                    let home = bounds.clamp(&Vector3::from(definition.position), 0.5);
                    if (fish.position - home).norm() > 1e-9 || fish.velocity.norm() > 0.0 {
                        return Err(format!("{} moved without a snapshot in session {}", fish.id, handle.id));
                    }
                }
            }
        }
        Ok(())
    }

    /// AQ-007: FlakyStore - writes fail, deliveries jitter, listeners error.
    ///
    /// **Assertion**: nothing crashes, invariants hold, an owner emerges and
    /// followers still receive snapshots.
    async fn run_flaky_store(&self, h: &mut Harness<'_>) -> Result<(), String> {
        let ids = h.world.spawn_sessions();

        let mut round = 0;
        while h.world.time() < h.end_time - 1e-9 {
            h.run_for(2.0).await;
            let target = ids[round % ids.len()];
            h.world.fail_subscriptions(target);
            h.event(format!("listener failure injected into {}", target));
            round += 1;
        }

        if h.oracle.owners_seen().is_empty() {
            return Err("no owner ever emerged".into());
        }
        let limit = h.world.config.fps as u64;
        if h.oracle.max_split_run() > limit {
            return Err(format!("split lasted {} frames (> {})", h.oracle.max_split_run(), limit));
        }
        let mirrored = h.world.alive().any(|s| !s.session.is_owner() && !s.session.mirror().is_empty());
        if !mirrored {
            return Err("no follower received a snapshot".into());
        }
        Ok(())
    }

    /// AQ-008: Purchase - two fish are bought mid-run.
    ///
    /// **Assertion**: every session has both fish and the owner publishes
    /// them.
    async fn run_purchase(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        let mut bought = Vec::new();

        for (at, species) in [(3.0, "tang"), (6.0, "angelfish")] {
            h.run_until_time(at).await;
            let definition = h.world.purchase(species).await.map_err(|e| e.to_string())?;
            h.event(format!("purchased {} ({})", definition.id, species));
            bought.push(definition.id);
        }
        h.run_to_end().await;

        let expected = h.world.config.fish + bought.len();
        let snapshots = &h.world.config.session.replication.collection;
        for handle in h.world.alive() {
            if handle.session.fishes().len() != expected {
                return Err(format!(
                    "session {} has {} fish, expected {}",
                    handle.id,
                    handle.session.fishes().len(),
                    expected
                ));
            }
            for id in &bought {
                if handle.session.fish(id).is_none() {
                    return Err(format!("session {} never saw {}", handle.id, id));
                }
                if !handle.session.is_owner() && handle.session.mirror().latest(id).is_none() {
                    return Err(format!("follower {} has no snapshot of {}", handle.id, id));
                }
            }
        }
        for id in &bought {
            if h.world.hub().get(snapshots, id).is_none() {
                return Err(format!("{} was never published", id));
            }
        }
        Ok(())
    }

    /// AQ-009: CatalogChurn - fish leave and arrive every second.
    ///
    /// **Assertion**: every session ends with exactly the catalog's fish, in
    /// slot order.
    async fn run_catalog_churn(&self, h: &mut Harness<'_>) -> Result<(), String> {
        h.world.spawn_sessions();
        let catalog = h.world.config.session.catalog_collection.clone();

        for step in 0..8u32 {
            h.run_until_time(2.0 + step as f64).await;
            if step % 2 == 0 {
                let id = format!("fish-{:03}", step / 2);
                if h.world.remove_fish(&id) {
                    h.event(format!("removed {}", id));
                }
            } else {
                let definition = h.world.purchase("clownfish").await.map_err(|e| e.to_string())?;
                h.event(format!("purchased {}", definition.id));
            }
        }
        h.run_to_end().await;

        let mut expected = h.world.hub().ids(&catalog);
        expected.sort();
        for handle in h.world.alive() {
            let mut ids: Vec<String> = handle.session.fishes().iter().map(|f| f.id.clone()).collect();
            let in_order = handle.session.fishes().windows(2).all(|w| w[0].slot <= w[1].slot);
            if !in_order {
                return Err(format!("session {} fish out of slot order", handle.id));
            }
            ids.sort();
            if ids != expected {
                return Err(format!("session {} has {:?}, catalog has {:?}", handle.id, ids, expected));
            }
        }

        let snapshots = &h.world.config.session.replication.collection;
        let orphans: Vec<String> = h
            .world
            .hub()
            .ids(snapshots)
            .into_iter()
            .filter(|id| !expected.contains(id))
            .collect();
        if !orphans.is_empty() {
            return Err(format!("snapshots outlived their fish: {:?}", orphans));
        }
        Ok(())
    }

    /// Simulation time of the current owner record's last heartbeat.
    fn last_heartbeat_secs(&self, world: &SimWorld) -> Result<f64, String> {
        let election = &world.config.session.election;
        let raw = world
            .hub()
            .get(&election.collection, &election.record_id)
            .ok_or("owner record missing")?;
        let record = AuthorityRecord::from_record(&raw).map_err(|e| e.to_string())?;
        let start_ms = world.context.unix_millis() as f64 - world.time() * 1000.0;
        Ok((record.last_heartbeat as f64 - start_ms) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn assert_passes(scenario: ScenarioId, seed: u64) {
        let result = ScenarioRunner::new(seed, 3).with_duration(0.0).run(scenario).await;
        assert!(
            result.passed,
            "{} failed: {:?}",
            scenario.name(),
            result.failure_reason
        );
    }

    #[tokio::test]
    async fn test_solo_claim_scenario() {
        assert_passes(ScenarioId::SoloClaim, 42).await;
    }

    #[tokio::test]
    async fn test_solo_claim_reports_owner_school() {
        let result = ScenarioRunner::new(42, 1).with_fish(8).run(ScenarioId::SoloClaim).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.census.total(), 8);
        assert!(result.metrics.mean_speed > 0.0);
        assert!(result.metrics.owner_ratio > 0.9);
    }

    #[tokio::test]
    async fn test_contested_claim_scenario() {
        assert_passes(ScenarioId::ContestedClaim, 42).await;
    }

    #[tokio::test]
    async fn test_contested_claim_cas_scenario() {
        assert_passes(ScenarioId::ContestedClaimCas, 42).await;
    }

    #[tokio::test]
    async fn test_owner_crash_scenario() {
        assert_passes(ScenarioId::OwnerCrash, 42).await;
    }

    #[tokio::test]
    async fn test_cold_follower_scenario() {
        assert_passes(ScenarioId::ColdFollower, 42).await;
    }

    #[tokio::test]
    async fn test_purchase_scenario() {
        assert_passes(ScenarioId::Purchase, 42).await;
    }

    #[tokio::test]
    async fn test_owner_partition_scenario() {
        assert_passes(ScenarioId::OwnerPartition, 42).await;
    }

    #[tokio::test]
    async fn test_flaky_store_scenario() {
        assert_passes(ScenarioId::FlakyStore, 42).await;
    }

    #[tokio::test]
    async fn test_catalog_churn_scenario() {
        let result = ScenarioRunner::new(42, 3).with_duration(0.0).run(ScenarioId::CatalogChurn).await;
        assert!(result.passed, "catalog_churn failed: {:?}", result.failure_reason);
        // Four removals and four purchases
        assert_eq!(result.final_fish_count, 12);
    }

    #[tokio::test]
    async fn test_owner_crash_deterministic() {
        let runner = ScenarioRunner::new(7, 3).with_duration(0.0);
        let a = runner.run(ScenarioId::OwnerCrash).await;
        let b = runner.run(ScenarioId::OwnerCrash).await;

        assert_eq!(a.passed, b.passed);
        assert_eq!(a.total_ticks, b.total_ticks);
        assert_eq!(a.metrics.store_writes, b.metrics.store_writes);
        assert_eq!(a.metrics.claims, b.metrics.claims);
    }

    #[test]
    fn test_config_for_keeps_scenario_minimums() {
        let runner = ScenarioRunner::new(1, 1).with_duration(1.0);
        let crash = runner.config_for(ScenarioId::OwnerCrash);
        assert_eq!(crash.sessions, 2);
        assert!(crash.duration_secs >= 30.0);
        assert!(runner.config_for(ScenarioId::ContestedClaimCas).conditional_writes);
        assert_eq!(runner.config_for(ScenarioId::SoloClaim).sessions, 1);
    }
}
