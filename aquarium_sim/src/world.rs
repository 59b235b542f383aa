//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::store::{SimStore, SimStoreHub};

use aquarium_core::catalog::{record_purchase, seed_catalog, starter_catalog};
use aquarium_core::{AquariumError, AquariumSession, FishDefinition, PurchaseEvent, SessionConfig, TickReport};
use aquarium_env::{AquariumContext, SessionId, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of sessions to spawn
    pub sessions: usize,

    /// Size of the starter catalog
    pub fish: usize,

    /// Render rate in Hz
    pub fps: u32,

    /// Maximum simulation duration in seconds
    pub duration_secs: f64,

    /// Base store notification latency
    pub latency_ms: u64,

    /// Store notification jitter (standard deviation)
    pub jitter_ms: f64,

    /// Chance that any store write fails
    pub write_failure_rate: f64,

    /// Whether the store offers compare-and-swap
    pub conditional_writes: bool,

    /// Per-session configuration (its seed is replaced by `seed`)
    pub session: SessionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            sessions: 3,
            fish: 12,
            fps: 60,
            duration_secs: 30.0,
            latency_ms: 30,
            jitter_ms: 10.0,
            write_failure_rate: 0.0,
            conditional_writes: false,
            session: SessionConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn dt(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }
}

/// Handle to a simulated session.
pub struct SessionHandle {
    /// Session id
    pub id: SessionId,

    /// The session's own store handle
    pub store: Arc<SimStore>,

    pub session: AquariumSession<SimContext, SimStore>,

    /// False once the session was killed
    pub alive: bool,
}

/// One session's part of a frame.
#[derive(Debug, Clone, Copy)]
pub struct SessionTick {
    pub session: SessionId,
    pub report: TickReport,
    /// Snapshot writes this session made during the tick
    pub snapshot_writes: u64,
}

/// Everything that happened in one frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub tick: u64,
    /// Simulation time at the start of the frame (seconds)
    pub time: f64,
    pub sessions: Vec<SessionTick>,
    /// Store notifications delivered during the frame
    pub delivered: usize,
}

impl FrameReport {
    /// Sessions that simulated as owner this frame.
    pub fn owners(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|t| t.report.role == aquarium_core::Role::Owner)
            .map(|t| t.session)
            .collect()
    }
}

/// The SimWorld - N sessions sharing one simulated store and one clock.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// The shared store
    hub: Arc<SimStoreHub>,

    /// Store handle used for catalog administration (seeding, purchases)
    admin: Arc<SimStore>,

    /// Session handles, in spawn order
    sessions: Vec<SessionHandle>,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let store_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let context = SimContext::shared(context_seed);
        let hub = SimStoreHub::new(context.clone(), store_seed, config.conditional_writes);
        hub.controller().set_latency(config.latency_ms);
        hub.controller().set_jitter(config.jitter_ms);
        hub.controller().set_write_failure_rate(config.write_failure_rate);

        let admin = hub.connect(SessionId::from_seed(u64::MAX));

        Self {
            config,
            context,
            hub,
            admin,
            sessions: Vec::new(),
            tick_count: 0,
        }
    }

    /// Writes the starter catalog. Admin writes bypass injected failures by
    /// retrying.
    pub async fn seed_catalog(&self) -> Result<Vec<FishDefinition>, AquariumError> {
        let definitions = starter_catalog(self.config.fish);
        let collection = &self.config.session.catalog_collection;
        for definition in &definitions {
            let mut attempts = 0;
            loop {
                match seed_catalog(&*self.admin, collection, std::slice::from_ref(definition)).await {
                    Ok(()) => break,
                    Err(AquariumError::Store(err)) if err.is_transient() && attempts < 16 => attempts += 1,
                    Err(err) => return Err(err),
                }
            }
        }
        info!(count = definitions.len(), "catalog seeded");
        Ok(definitions)
    }

    /// Spawns the configured number of sessions and returns their IDs.
    pub fn spawn_sessions(&mut self) -> Vec<SessionId> {
        (0..self.config.sessions).map(|_| self.add_session()).collect()
    }

    /// Starts one more session (late joiner).
    pub fn add_session(&mut self) -> SessionId {
        let index = self.sessions.len() as u64;
        let id = SessionId::from_seed(self.config.seed.wrapping_mul(31).wrapping_add(index));
        let store = self.hub.connect(id);

        let config = SessionConfig {
            seed: self.config.seed,
            ..self.config.session.clone()
        };
        let mut session = AquariumSession::new(id, self.context.clone(), store.clone(), config);
        session.start();
        debug!(session = %id, "session joined");

        self.sessions.push(SessionHandle {
            id,
            store,
            session,
            alive: true,
        });
        id
    }

    /// Advances the world by one frame: election pumps, deliveries, ticks,
    /// then the clock.
    pub async fn step(&mut self) -> FrameReport {
        let dt = self.config.dt();
        let time = self.time();
        let snapshots = self.config.session.replication.collection.clone();

        for handle in self.sessions.iter().filter(|h| h.alive) {
            handle.session.election().pump().await;
        }
        let mut delivered = self.hub.deliver_due(self.context.now());

        let mut ticks = Vec::with_capacity(self.sessions.len());
        for handle in self.sessions.iter_mut().filter(|h| h.alive) {
            let before = handle.store.writes_to(&snapshots);
            let report = handle.session.tick(dt).await;
            ticks.push(SessionTick {
                session: handle.id,
                report,
                snapshot_writes: handle.store.writes_to(&snapshots) - before,
            });
        }

        self.context.advance_time(Duration::from_secs_f64(dt));
        delivered += self.hub.deliver_due(self.context.now());
        self.tick_count += 1;

        FrameReport {
            tick: self.tick_count,
            time,
            sessions: ticks,
            delivered,
        }
    }

    /// Stops a session without handoff (crash / tab closed).
    pub fn kill(&mut self, id: SessionId) -> bool {
        match self.sessions.iter_mut().find(|h| h.id == id && h.alive) {
            Some(handle) => {
                handle.session.stop();
                handle.alive = false;
                info!(session = %id, "session killed");
                true
            }
            None => false,
        }
    }

    /// Cuts a session off the store.
    pub fn disconnect(&self, id: SessionId) {
        self.hub.controller().disconnect(id);
        info!(session = %id, "session disconnected");
    }

    /// Reconnects a session and resends it the current state.
    pub fn reconnect(&self, id: SessionId) {
        if self.hub.controller().reconnect(id) {
            self.hub.resync(id);
            info!(session = %id, "session reconnected");
        }
    }

    /// Reports a listener failure to every subscription of a session.
    pub fn fail_subscriptions(&self, id: SessionId) {
        self.hub
            .fail_subscriptions(id, StoreError::unavailable("simulated listener failure"));
    }

    /// Records a purchase through the admin handle.
    pub async fn purchase(&self, species: &str) -> Result<FishDefinition, AquariumError> {
        record_purchase(
            &*self.admin,
            &self.config.session.catalog_collection,
            &PurchaseEvent::new(species),
        )
        .await
    }

    /// Removes a fish from the catalog.
    pub fn remove_fish(&self, id: &str) -> bool {
        self.hub.remove(&self.config.session.catalog_collection, id)
    }

    /// Alive sessions currently acting as owner (as of their last tick).
    pub fn owners(&self) -> Vec<SessionId> {
        self.alive().filter(|h| h.session.is_owner()).map(|h| h.id).collect()
    }

    pub fn alive(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.iter().filter(|h| h.alive)
    }

    pub fn sessions(&self) -> &[SessionHandle] {
        &self.sessions
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionHandle> {
        self.sessions.iter().find(|h| h.id == id)
    }

    pub fn hub(&self) -> &Arc<SimStoreHub> {
        &self.hub
    }

    pub fn admin(&self) -> &Arc<SimStore> {
        &self.admin
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Returns the number of alive sessions.
    pub fn session_count(&self) -> usize {
        self.alive().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> SimConfig {
        SimConfig {
            seed,
            sessions: 3,
            fish: 6,
            ..Default::default()
        }
    }

    #[test]
    fn test_sim_world_creation() {
        let mut world = SimWorld::new(config(42));
        let ids = world.spawn_sessions();

        assert_eq!(ids.len(), 3);
        assert_eq!(world.session_count(), 3);
    }

    #[tokio::test]
    async fn test_sim_world_step() {
        let mut world = SimWorld::new(config(42));
        world.seed_catalog().await.unwrap();
        world.spawn_sessions();

        assert_eq!(world.tick_count(), 0);
        assert_eq!(world.time(), 0.0);

        let frame = world.step().await;

        assert_eq!(world.tick_count(), 1);
        assert_eq!(frame.sessions.len(), 3);
        assert!((world.time() - 1.0 / 60.0).abs() < 0.0001);
    }

    #[tokio::test]
    async fn test_single_owner_emerges() {
        let mut world = SimWorld::new(config(7));
        world.seed_catalog().await.unwrap();
        world.spawn_sessions();

        for _ in 0..(5 * 60) {
            world.step().await;
        }
        assert_eq!(world.owners().len(), 1);
        for handle in world.alive() {
            assert_eq!(handle.session.fishes().len(), 6);
        }
    }

    #[tokio::test]
    async fn test_sim_world_determinism() {
        async fn run(seed: u64) -> Vec<[f64; 3]> {
            let mut world = SimWorld::new(config(seed));
            world.seed_catalog().await.unwrap();
            world.spawn_sessions();
            for _ in 0..120 {
                world.step().await;
            }
            world.sessions()[0]
                .session
                .fishes()
                .iter()
                .map(|f| f.position.into())
                .collect()
        }

        assert_eq!(run(42).await, run(42).await);
    }
}
