// src/motion/profile.rs - Head/body/tail split of a planned block
use crate::motion::jerk::ramp_length;
use crate::motion::EPSILON;

const MAX_CRUISE_ITERATIONS: usize = 20;

/// Section lengths and velocities for one block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Profile {
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,
}

/// Fit an accelerate / cruise / decelerate profile into `length`.
///
/// When both ramps do not fit at `cruise`, the cruise velocity is lowered
/// by bisection. If even a direct ramp from entry to exit is longer than
/// the block, the whole block becomes that single ramp; the runtime
/// stretches its timing to the block length.
pub fn plan_profile(length: f64, entry: f64, cruise: f64, exit: f64, jerk: f64) -> Profile {
    let mut profile = Profile {
        entry_velocity: entry,
        cruise_velocity: cruise.max(entry).max(exit),
        exit_velocity: exit,
        ..Profile::default()
    };
    if length < EPSILON {
        return profile;
    }

    let head = ramp_length(entry, profile.cruise_velocity, jerk);
    let tail = ramp_length(profile.cruise_velocity, exit, jerk);
    if head + tail <= length {
        profile.head_length = head;
        profile.tail_length = tail;
        profile.body_length = length - head - tail;
        return profile;
    }

    let floor = entry.max(exit);
    let direct = ramp_length(entry, exit, jerk);
    if direct >= length {
        if exit > entry {
            profile.head_length = length;
            profile.cruise_velocity = exit;
        } else {
            profile.tail_length = length;
            profile.cruise_velocity = entry;
        }
        return profile;
    }

    // head + tail grows with cruise, so bisect between the floor (fits) and cruise (does not)
    let mut low = floor;
    let mut high = profile.cruise_velocity;
    for _ in 0..MAX_CRUISE_ITERATIONS {
        let mid = (low + high) / 2.0;
        if ramp_length(entry, mid, jerk) + ramp_length(mid, exit, jerk) > length {
            high = mid;
        } else {
            low = mid;
        }
    }
    profile.cruise_velocity = low;
    profile.head_length = ramp_length(entry, low, jerk);
    profile.tail_length = ramp_length(low, exit, jerk);
    profile.body_length = (length - profile.head_length - profile.tail_length).max(0.0);
    profile
}
