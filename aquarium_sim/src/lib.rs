//! Shared Aquarium Deterministic Simulation Testing (DST) Harness
//!
//! This crate runs several aquarium sessions against one simulated store,
//! on one virtual clock, so authority handoffs and replication can be
//! replayed exactly from a seed.
//!
//! # Core Principle: Everything Is Stepped
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: A virtual clock advanced one render frame at a time
//! - **Store**: Notifications delivered with configurable latency and jitter,
//!   in per-subscriber order, with injectable write failures and partitions
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock)                           │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │ Session │              │ Session │     ...               │
//! │  │   #1    │              │   #2    │                       │
//! │  └────┬────┘              └────┬────┘                       │
//! │       │      SimStoreHub       │                            │
//! │  ┌────▼────────────────────────▼────┐                       │
//! │  │  records + delayed notifications │                       │
//! │  └──────────────────────────────────┘                       │
//! │                    Oracle (invariants)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use aquarium_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).run(ScenarioId::OwnerCrash).await;
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
mod store;
mod world;

pub use context::SimContext;
pub use exporter::{FishPosition, SessionFrame, SimEvent, SimExport, SimFrame};
pub use oracle::{Oracle, Violation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use store::{SimStore, SimStoreController, SimStoreHub, StoreStats};
pub use world::{FrameReport, SessionHandle, SessionTick, SimConfig, SimWorld};
