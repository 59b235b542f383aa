//! Core environment context trait for aquarium sessions.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the simulation core can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - a manually advanced virtual clock
#[async_trait]
pub trait AquariumContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for throttles and intervals. In simulation, this is the virtual
    /// clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for record timestamps.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;

    /// Wall-clock milliseconds since the UNIX epoch, as stored in records.
    fn unix_millis(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
