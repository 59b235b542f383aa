//! Aquarium Session - drives one viewer's tank, frame by frame.
//!
//! This module is the integration layer between the pure simulation steps
//! (behavior, flocking, integrator) and the environment abstraction
//! (`AquariumContext` + `StateStore`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AquariumSession                         │
//! │                                                             │
//! │  tick(dt):                                                  │
//! │   1. apply staged catalog changes                           │
//! │   2. sample role (once, at the tick boundary)               │
//! │                                                             │
//! │   owner:    behavior → forces → integrate → publish         │
//! │   follower: FollowerMirror::apply (interpolate)             │
//! │                                                             │
//! │  ┌───────────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │  │ CatalogStaging│  │FollowerMirror│  │AuthorityElection│   │
//! │  │   ("fish")    │  │("fish_state")│  │("aquarium_owner")│  │
//! │  └───────────────┘  └──────────────┘  └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Subscriptions only fill staging buffers; everything they deliver takes
//! effect on the next tick.
//!
//! # Usage
//!
//! ```ignore
//! use aquarium_core::{AquariumSession, SessionConfig};
//! use aquarium_env::{SessionId, SledStore, TokioContext};
//!
//! let store = Arc::new(SledStore::open("aquarium.db")?);
//! let mut session = AquariumSession::new(SessionId::new(), TokioContext::shared(), store, SessionConfig::default());
//! session.start();
//! session.spawn_election_loop();
//!
//! loop {
//!     session.tick(1.0 / 60.0).await;
//! }
//! ```

use crate::authority::AuthorityElection;
use crate::behavior;
use crate::catalog::{record_purchase, CatalogChange, CatalogStaging, FishDefinition, PurchaseEvent};
use crate::config::SessionConfig;
use crate::error::AquariumError;
use crate::fish::Fish;
use crate::flocking::FlockingEngine;
use crate::integrator::integrate;
use crate::metrics::SessionMetrics;
use crate::replication::{FollowerMirror, PublishOutcome, SnapshotPublisher};
use crate::rng::Lcg;
use aquarium_env::{AquariumContext, SessionId, StateStore, Subscription, Topic};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which half of the tick a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Owner,
    Follower,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub role: Role,
    /// Role differs from the previous tick's
    pub role_changed: bool,
    /// Seconds actually simulated (after clamping); 0 when skipped
    pub dt: f64,
    /// Owner ticks only
    pub published: Option<PublishOutcome>,
    pub fish: usize,
    /// Follower ticks only: fish that had a snapshot to follow
    pub mirrored: usize,
}

/// One viewer session: a tank, its role, and the channels that feed it.
pub struct AquariumSession<Ctx, S>
where
    Ctx: AquariumContext,
    S: StateStore,
{
    session_id: SessionId,
    context: Arc<Ctx>,
    store: Arc<S>,
    config: SessionConfig,

    election: Arc<AuthorityElection<Ctx, S>>,
    catalog: CatalogStaging,
    mirror: FollowerMirror,
    publisher: SnapshotPublisher,
    subscriptions: Vec<Subscription>,

    fishes: Vec<Fish>,
    rng: Lcg,
    flocking: FlockingEngine,

    role: Role,
    metrics: SessionMetrics,
}

impl<Ctx, S> AquariumSession<Ctx, S>
where
    Ctx: AquariumContext,
    S: StateStore,
{
    pub fn new(session_id: SessionId, context: Arc<Ctx>, store: Arc<S>, config: SessionConfig) -> Self {
        let election = Arc::new(AuthorityElection::new(
            session_id,
            context.clone(),
            store.clone(),
            config.election.clone(),
        ));

        Self {
            session_id,
            election,
            catalog: CatalogStaging::new(),
            mirror: FollowerMirror::new(config.replication.interpolation_rate),
            publisher: SnapshotPublisher::new(
                config.replication.collection.clone(),
                config.replication.publish_interval(),
            ),
            subscriptions: Vec::new(),
            fishes: Vec::new(),
            rng: Lcg::new(config.seed),
            flocking: FlockingEngine::new(config.flocking.clone()),
            role: Role::Follower,
            metrics: SessionMetrics::new(),
            context,
            store,
            config,
        }
    }

    /// Subscribes to the owner record, the catalog and the snapshots.
    pub fn start(&mut self) {
        if !self.subscriptions.is_empty() {
            return;
        }
        self.election.start();

        let session = self.session_id;
        let catalog = self.store.subscribe(
            Topic::collection(self.config.catalog_collection.clone()),
            self.catalog.callback(),
            Arc::new(move |err| warn!(%session, %err, "catalog subscription failed; keeping current school")),
        );
        let snapshots = self.store.subscribe(
            Topic::collection(self.config.replication.collection.clone()),
            self.mirror.callback(),
            Arc::new(move |err| warn!(%session, %err, "snapshot subscription failed; mirroring stale state")),
        );
        self.subscriptions = vec![catalog, snapshots];
        info!(%session, seed = self.config.seed, "session started");
    }

    /// Stops writing and listening. No handoff: another session takes over
    /// once this one's heartbeat goes stale.
    pub fn stop(&mut self) {
        self.election.stop();
        self.subscriptions.clear();
        info!(session = %self.session_id, "session stopped");
    }

    /// Runs the election loop in the background on the session's context.
    pub fn spawn_election_loop(&self) {
        let election = self.election.clone();
        self.context.spawn("authority-election", election.run());
    }

    /// Advances the tank by one rendered frame.
    ///
    /// Store failures are logged and dropped; a tick never fails.
    pub async fn tick(&mut self, dt: f64) -> TickReport {
        let departed = self.apply_catalog_changes();

        let role = if self.election.is_owner() {
            Role::Owner
        } else {
            Role::Follower
        };
        let role_changed = role != self.role;
        if role_changed {
            self.metrics.role_changes += 1;
            info!(session = %self.session_id, from = ?self.role, to = ?role, "role changed at tick boundary");
            if role == Role::Owner {
                self.publisher.reset();
            }
            self.role = role;
        }
        if role == Role::Owner {
            self.retire_snapshots(&departed).await;
        }

        let mut report = TickReport {
            role,
            role_changed,
            dt: 0.0,
            published: None,
            fish: self.fishes.len(),
            mirrored: 0,
        };

        if !(dt.is_finite() && dt > 0.0) {
            self.metrics.skipped_ticks += 1;
            debug!(session = %self.session_id, dt, "unusable frame step; tick skipped");
            return report;
        }
        let dt = dt.min(self.config.max_dt);
        report.dt = dt;
        self.metrics.ticks += 1;

        match role {
            Role::Owner => {
                self.metrics.owner_ticks += 1;
                self.simulate(dt);
                let outcome = self
                    .publisher
                    .maybe_publish(&*self.store, &self.fishes, self.context.now(), self.context.unix_millis())
                    .await;
                match outcome {
                    PublishOutcome::Published(_) => self.metrics.publishes += 1,
                    PublishOutcome::Throttled => self.metrics.throttled += 1,
                    PublishOutcome::Failed { .. } => self.metrics.publish_failures += 1,
                }
                report.published = Some(outcome);
            }
            Role::Follower => {
                self.metrics.follower_ticks += 1;
                report.mirrored = self.mirror.apply(&mut self.fishes, dt);
            }
        }
        report
    }

    /// Owner half of the tick: behavior, then forces from the pre-integration
    /// state, then integration.
    fn simulate(&mut self, dt: f64) {
        for fish in &mut self.fishes {
            fish.behavior = behavior::advance(fish.behavior, &fish.personality, dt, &mut self.rng, &self.config.behavior);
        }

        let forces = self.flocking.compute(&self.fishes, &self.config.bounds, &mut self.rng);
        for (fish, force) in self.fishes.iter_mut().zip(forces) {
            behavior::apply(&fish.behavior, &mut fish.velocity, force, &mut self.rng, &self.config.behavior);
            integrate(fish, dt, &self.config.bounds, &mut self.rng, &self.config.integrator);
        }
    }

    /// Applies staged catalog changes and returns the ids of fish that left.
    fn apply_catalog_changes(&mut self) -> Vec<String> {
        let changes = self.catalog.drain();
        let mut departed = Vec::new();
        if changes.is_empty() {
            return departed;
        }

        for change in changes {
            match change {
                CatalogChange::Upsert(definition) => self.upsert_fish(&definition),
                CatalogChange::Remove(id) => {
                    let before = self.fishes.len();
                    self.fishes.retain(|fish| fish.id != id);
                    if self.fishes.len() < before {
                        self.mirror.forget(&id);
                        self.metrics.fish_removed += 1;
                        debug!(session = %self.session_id, fish = %id, "fish left the tank");
                        departed.push(id);
                    }
                }
            }
        }
        self.fishes.sort_by(|a, b| a.slot.cmp(&b.slot).then_with(|| a.id.cmp(&b.id)));
        departed
    }

    /// Owner-only: deletes the snapshots of fish that left the catalog.
    async fn retire_snapshots(&self, departed: &[String]) {
        let collection = &self.config.replication.collection;
        for id in departed {
            if let Err(err) = self.store.delete(collection, id).await {
                warn!(session = %self.session_id, fish = %id, %err, "snapshot delete failed; dropped");
            }
        }
    }

    fn upsert_fish(&mut self, definition: &FishDefinition) {
        if let Some(fish) = self.fishes.iter_mut().find(|fish| fish.id == definition.id) {
            fish.name.clone_from(&definition.name);
            fish.species.clone_from(&definition.species);
            fish.color.clone_from(&definition.color);
            fish.size = definition.size;
            fish.base_speed = definition.base_speed;
            return;
        }

        self.fishes
            .push(Fish::spawn(definition, self.config.seed, &self.config.bounds));
        self.metrics.fish_added += 1;
        debug!(session = %self.session_id, fish = %definition.id, slot = definition.slot, "fish entered the tank");
    }

    /// Appends one purchased fish to the shared catalog.
    pub async fn purchase(&self, event: &PurchaseEvent) -> Result<FishDefinition, AquariumError> {
        record_purchase(&*self.store, &self.config.catalog_collection, event).await
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Role as of the last tick.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }

    pub fn fishes(&self) -> &[Fish] {
        &self.fishes
    }

    pub fn fish(&self, id: &str) -> Option<&Fish> {
        self.fishes.iter().find(|fish| fish.id == id)
    }

    pub fn election(&self) -> &Arc<AuthorityElection<Ctx, S>> {
        &self.election
    }

    pub fn mirror(&self) -> &FollowerMirror {
        &self.mirror
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }
}
