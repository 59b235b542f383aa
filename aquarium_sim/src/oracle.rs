//! Invariant oracle for simulation.
//!
//! The Oracle watches every frame of a [`SimWorld`] and records anything a
//! viewer must never see:
//! - A fish outside the tank (any session, any role)
//! - An owner fish moving faster than its current speed cap
//! - A follower writing a snapshot
//!
//! It also keeps the authority timeline: how long several sessions believed
//! they owned the tank at once, and who owned it when.

use crate::world::{FrameReport, SimWorld};
use aquarium_core::{Bounds, Role};
use aquarium_env::SessionId;
use thiserror::Error;

/// Tolerance on the speed cap check.
const SPEED_EPSILON: f64 = 1e-9;

/// An invariant violation seen during a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("t={time:.2}s session {session}: fish {fish} outside bounds at {position:?}")]
    Escaped {
        time: f64,
        session: SessionId,
        fish: String,
        position: [f64; 3],
    },

    #[error("t={time:.2}s session {session}: fish {fish} speed {speed:.3} over cap {cap:.3}")]
    OverSpeed {
        time: f64,
        session: SessionId,
        fish: String,
        speed: f64,
        cap: f64,
    },

    #[error("t={time:.2}s session {session}: follower wrote {writes} snapshot(s)")]
    FollowerPublished { time: f64, session: SessionId, writes: u64 },
}

/// The Oracle - checks invariants and tracks the authority timeline.
pub struct Oracle {
    bounds: Bounds,
    violations: Vec<Violation>,
    frames: u64,
    split_frames: u64,
    current_split_run: u64,
    max_split_run: u64,
    ownerless_frames: u64,
    /// Owner changes as (time, new owner)
    timeline: Vec<(f64, Option<SessionId>)>,
}

impl Oracle {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            violations: Vec::new(),
            frames: 0,
            split_frames: 0,
            current_split_run: 0,
            max_split_run: 0,
            ownerless_frames: 0,
            timeline: Vec::new(),
        }
    }

    /// Checks one frame.
    pub fn observe(&mut self, world: &SimWorld, frame: &FrameReport) {
        self.frames += 1;

        for tick in &frame.sessions {
            if tick.report.role == Role::Follower && tick.snapshot_writes > 0 {
                self.violations.push(Violation::FollowerPublished {
                    time: frame.time,
                    session: tick.session,
                    writes: tick.snapshot_writes,
                });
            }
        }

        for handle in world.alive() {
            let owner = handle.session.is_owner();
            for fish in handle.session.fishes() {
                if !self.bounds.contains(&fish.position) {
                    self.violations.push(Violation::Escaped {
                        time: frame.time,
                        session: handle.id,
                        fish: fish.id.clone(),
                        position: fish.position.into(),
                    });
                }
                if owner && fish.speed() > fish.max_speed + SPEED_EPSILON {
                    self.violations.push(Violation::OverSpeed {
                        time: frame.time,
                        session: handle.id,
                        fish: fish.id.clone(),
                        speed: fish.speed(),
                        cap: fish.max_speed,
                    });
                }
            }
        }

        let owners = frame.owners();
        let owner = match owners.len() {
            0 => {
                self.ownerless_frames += 1;
                None
            }
            1 => Some(owners[0]),
            _ => None,
        };

        if owners.len() > 1 {
            self.split_frames += 1;
            self.current_split_run += 1;
            self.max_split_run = self.max_split_run.max(self.current_split_run);
        } else {
            self.current_split_run = 0;
        }

        if owners.len() <= 1 && self.timeline.last().map(|(_, o)| *o) != Some(owner) {
            self.timeline.push((frame.time, owner));
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames in which more than one session simulated as owner.
    pub fn split_frames(&self) -> u64 {
        self.split_frames
    }

    /// Longest run of consecutive split frames.
    pub fn max_split_run(&self) -> u64 {
        self.max_split_run
    }

    pub fn ownerless_frames(&self) -> u64 {
        self.ownerless_frames
    }

    /// Owner changes as (time, owner); `None` is an ownerless stretch.
    pub fn timeline(&self) -> &[(f64, Option<SessionId>)] {
        &self.timeline
    }

    /// Distinct sessions that held authority alone at some point.
    pub fn owners_seen(&self) -> Vec<SessionId> {
        let mut seen: Vec<SessionId> = self.timeline.iter().filter_map(|(_, o)| *o).collect();
        seen.sort();
        seen.dedup();
        seen
    }

    /// First time `session` became the single owner.
    pub fn owned_since(&self, session: SessionId) -> Option<f64> {
        self.timeline
            .iter()
            .find(|(_, o)| *o == Some(session))
            .map(|(t, _)| *t)
    }

    /// First time anyone became the single owner.
    pub fn first_owner_at(&self) -> Option<f64> {
        self.timeline.iter().find(|(_, o)| o.is_some()).map(|(t, _)| *t)
    }
}
