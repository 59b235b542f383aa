//! Aquarium Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the aquarium
//! simulation core to run in both **Production** (tokio + a persistent store)
//! and **Simulation** (virtual clock + in-memory store) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For Deterministic Simulation Testing (DST), we intercept all I/O:
//! - Time (`now()`, `system_time()`, `sleep()`)
//! - The shared state store (`put()`, `merge()`, `subscribe()`)
//!
//! Randomness never comes from the environment: the core carries its own
//! seeded generator, so a run is reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use aquarium_env::{AquariumContext, StateStore, Topic};
//!
//! async fn heartbeat_loop<Ctx: AquariumContext, S: StateStore>(ctx: &Ctx, store: &S) {
//!     loop {
//!         let _ = store.merge("aquarium_owner", "owner", serde_json::json!({ "lastHeartbeat": ctx.unix_millis() })).await;
//!         ctx.sleep(Duration::from_secs(5)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod sled_store;
mod store;
mod tokio_impl;
mod types;

pub use context::AquariumContext;
pub use error::StoreError;
pub use sled_store::SledStore;
pub use store::{lock, ChangeCallback, ErrorCallback, StateStore, Subscription, Topic};
pub use tokio_impl::TokioContext;
pub use types::{merge_records, ChangeEvent, Record, SessionId};
