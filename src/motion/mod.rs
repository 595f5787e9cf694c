// src/motion/mod.rs - Planning and execution pipeline
//! Move buffer pool, lookahead velocity planner and the Exec -> Load -> DDA
//! pipeline that turns planned blocks into step pulses.

pub mod buffer;
pub mod controller;
pub mod jerk;
pub mod junction;
pub mod loader;
pub mod planner;
pub mod profile;
pub mod runtime;

pub use buffer::{BlockId, BlockKind, MoveBlock, MoveBufferPool, SyncCommand};
pub use controller::MotionController;
pub use runtime::{RuntimeEvent, Segment};

use thiserror::Error;

/// Number of axes the planner carries (X, Y, Z, A).
pub const AXES: usize = 4;
pub const X_AXIS: usize = 0;
pub const Y_AXIS: usize = 1;
pub const Z_AXIS: usize = 2;
pub const A_AXIS: usize = 3;

/// Configured jerk values are expressed in millions of mm/min³.
pub const JERK_MULTIPLIER: f64 = 1_000_000.0;
pub const MM_PER_INCH: f64 = 25.4;
pub const EPSILON: f64 = 1e-6;

pub type AxisVector = [f64; AXES];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("Move too short: {estimated_us:.1}us is below the {floor_us:.1}us block floor")]
    MoveTooShort { estimated_us: f64, floor_us: f64 },
    #[error("Move time estimate is not finite (zero velocity)")]
    NonFiniteVelocity,
    #[error("No free slot in the move buffer pool")]
    BufferFull,
    #[error("Runtime busy, try again")]
    RuntimeBusy,
}

/// Successful outcomes of submitting a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planned {
    Queued(BlockId),
    /// The target equals the planner position; nothing was queued.
    ZeroLengthMove,
}

pub fn fp_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

pub fn fp_zero(a: f64) -> bool {
    a.abs() < EPSILON
}

pub fn usec_to_minutes(us: f64) -> f64 {
    us / 60_000_000.0
}

pub fn minutes_to_usec(minutes: f64) -> f64 {
    minutes * 60_000_000.0
}
