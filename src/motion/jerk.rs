// src/motion/jerk.rs - Jerk terms used by the planner
use crate::machine::axis::AxisSettings;
use crate::motion::{AXES, AxisVector, EPSILON, JERK_MULTIPLIER};

/// Jerk for a move along `unit`: the tightest per-axis limit projected onto
/// the path, in mm/min³.
pub fn motion_jerk(unit: &AxisVector, axes: &[AxisSettings; AXES]) -> f64 {
    let mut jerk = f64::INFINITY;
    for (component, axis) in unit.iter().zip(axes.iter()) {
        let share = component.abs();
        if share > EPSILON {
            jerk = jerk.min(axis.max_jerk * JERK_MULTIPLIER / share);
        }
    }
    if jerk.is_finite() { jerk } else { 0.0 }
}

/// Velocity change reachable over a segment under bounded jerk.
///
/// `L^(2/3) * J^(1/3)`, taken from the cached cube roots. Exact for a
/// ramp starting at rest and optimistic otherwise; profile generation
/// absorbs the difference.
pub fn delta_vmax(length_sqr_cbrt: f64, jerk_cbrt: f64) -> f64 {
    length_sqr_cbrt * jerk_cbrt
}

/// Distance covered by a constant-jerk S ramp between two velocities.
pub fn ramp_length(v0: f64, v1: f64, jerk: f64) -> f64 {
    if jerk <= 0.0 {
        return 0.0;
    }
    (v0 + v1) * ((v1 - v0).abs() / jerk).sqrt()
}
