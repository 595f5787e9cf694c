// src/machine/mod.rs - Canonical machine and its cycles
//! The canonical machine holds the modal g-code state and turns commands
//! into planner calls. Homing and probing are cycles layered on top of it,
//! each an explicit phase machine advanced once per controller pass.

pub mod axis;
pub mod canonical;
pub mod gstate;
pub mod homing;
pub mod probing;

pub use canonical::CanonicalMachine;
pub use gstate::GState;

use thiserror::Error;

use crate::motion::MotionError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MachineError {
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error("Feed rate not specified")]
    FeedrateNotSpecified,
    #[error("Input value out of range: {0}")]
    InputValueOutOfRange(String),
    #[error("Soft limit exceeded on axis {axis}: target {target:.3}")]
    SoftLimitExceeded { axis: usize, target: f64 },
    #[error("Limit switch hit")]
    LimitSwitchHit,
    #[error("Machine is alarmed")]
    MachineAlarmed,
    #[error("Motion stopped by operator")]
    Interrupted,
    #[error("Homing search velocity is zero")]
    HomingSearchVelocityZero,
    #[error("Homing latch velocity is zero")]
    HomingLatchVelocityZero,
    #[error("Homing latch backoff is negative")]
    HomingLatchBackoffNegative,
    #[error("Homing travel is zero (min and max travel identical)")]
    HomingTravelMinMaxIdentical,
    #[error("Homing switches misconfigured on axis {0}")]
    HomingSwitchMisconfiguration(usize),
    #[error("Homing requested with bad or no axis words")]
    HomingBadOrNoAxis,
    #[error("Homing failed on axis {0}: switch not found")]
    HomingFailed(usize),
    #[error("Probing is not allowed in inverse time mode")]
    ProbeInverseTimeMode,
    #[error("Probe move has no X, Y or Z word")]
    ProbeAllAxesOmitted,
    #[error("Probe travel below the minimum distance")]
    ProbeTravelTooSmall,
}

/// Outcome of one pass of a cooperative handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Work was done; later handlers may run.
    Ok,
    /// Not ready yet; end this pass and call again.
    Again,
    /// Nothing to do.
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineState {
    #[default]
    Ready,
    Cycle,
    ProgramStop,
    ProgramEnd,
    Alarm,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Off,
    Machining,
    Homing,
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Stop,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingState {
    #[default]
    NotHomed,
    Homed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeState {
    #[default]
    Failed,
    Succeeded,
    /// Requested, waiting for the queue to drain before starting.
    Waiting,
}
