// src/hardware/mod.rs - Pulse generator and switch interfaces
pub mod dda;
pub mod switches;

pub use dda::SimulatedDda;
pub use switches::{SimSwitches, SwitchEnd, SwitchState, Switches};

use crate::motion::{AXES, MotionError, Segment};

/// Step pulse generator driven by the highest priority timer.
///
/// Implementations must emit each axis' steps monotonically and evenly over
/// the segment's tick count (within one tick), must never start a segment
/// while the previous one is still pulsing, and must report busy/idle
/// unambiguously.
pub trait PulseGenerator: Send {
    /// Start pulsing `segment.steps` over `segment.ticks` ticks.
    fn program_segment(&mut self, segment: &Segment) -> Result<(), MotionError>;

    fn is_busy(&self) -> bool;

    /// Advance one tick. Returns true on the tick that finishes the segment.
    fn tick(&mut self) -> bool;

    /// Stop immediately and return the steps of the current segment that
    /// were never emitted.
    fn halt(&mut self) -> [i64; AXES];

    /// Signed steps emitted per motor since power-up.
    fn encoder_position(&self) -> [i64; AXES];
}
