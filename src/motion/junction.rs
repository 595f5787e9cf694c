// src/motion/junction.rs - Junction velocity between consecutive moves
use crate::motion::{AXES, AxisVector};

/// Junction velocity used when the two directions are colinear.
pub const JUNCTION_UNCONSTRAINED: f64 = 10_000_000.0;

/// Unit direction vector from `start` to `end`, all zeros for a null move.
pub fn unit_vector(start: &AxisVector, end: &AxisVector) -> (AxisVector, f64) {
    let mut delta = [0.0; AXES];
    for i in 0..AXES {
        delta[i] = end[i] - start[i];
    }
    let length = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
    if length > 0.0 {
        for d in delta.iter_mut() {
            *d /= length;
        }
    }
    (delta, length)
}

/// Maximum corner speed between a move along `a` followed by one along `b`.
///
/// The corner is treated as a circular arc tangent to both lines whose
/// distance from the sharp corner is the junction deviation `delta`.
/// `delta` blends the per-axis deviations weighted by each axis'
/// share of the two directions, so slower axes get tighter corners.
/// The velocity is the one that keeps centripetal acceleration at
/// `junction_acceleration` on that arc.
pub fn junction_vmax(
    a: &AxisVector,
    b: &AxisVector,
    deviation: &AxisVector,
    junction_acceleration: f64,
) -> f64 {
    let costheta: f64 = -(0..AXES).map(|i| a[i] * b[i]).sum::<f64>();

    if costheta < -0.99 {
        return JUNCTION_UNCONSTRAINED;
    }
    if costheta > 0.99 {
        return 0.0;
    }

    let a_delta: f64 = (0..AXES).map(|i| (a[i] * deviation[i]).powi(2)).sum();
    let b_delta: f64 = (0..AXES).map(|i| (b[i] * deviation[i]).powi(2)).sum();
    let delta = (a_delta.sqrt() + b_delta.sqrt()) / 2.0;

    // sin(theta/2) from the half-angle identity; stays in (0, 1) past the guards above
    let sintheta_over2 = ((1.0 - costheta) / 2.0).sqrt();
    let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);
    (radius * junction_acceleration).sqrt()
}
