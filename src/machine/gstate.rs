// src/machine/gstate.rs - Modal g-code state snapshot
use crate::motion::{AxisVector, MM_PER_INCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// G0
    StraightTraverse,
    /// G1
    StraightFeed,
    /// G80
    #[default]
    CancelMotionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedRateMode {
    /// G93: F is the reciprocal of the move time in minutes.
    InverseTime,
    /// G94
    #[default]
    UnitsPerMinute,
    /// G95
    UnitsPerRevolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    Xy,
    Xz,
    Yz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    Inches,
    #[default]
    Millimeters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMode {
    #[default]
    Absolute,
    Incremental,
}

/// Machine coordinates plus the six work coordinate systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordSystem {
    Absolute,
    #[default]
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
}

impl CoordSystem {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        self as usize
    }

    /// Work system selected by a G10 `P` word (1 = G54 .. 6 = G59).
    pub fn from_p_word(p: u32) -> Option<Self> {
        match p {
            1 => Some(CoordSystem::G54),
            2 => Some(CoordSystem::G55),
            3 => Some(CoordSystem::G56),
            4 => Some(CoordSystem::G57),
            5 => Some(CoordSystem::G58),
            6 => Some(CoordSystem::G59),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathControl {
    /// G61
    ExactPath,
    /// G61.1
    ExactStop,
    /// G64
    #[default]
    Continuous,
}

/// Everything the planner needs to know about a move, copied by value into
/// each queued block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GState {
    pub linenum: u32,
    pub target: AxisVector,
    pub work_offset: AxisVector,
    /// mm/min, or minutes per move in inverse time mode.
    pub feedrate: f64,
    pub parameter: f64,
    pub motion_mode: MotionMode,
    pub feedrate_mode: FeedRateMode,
    pub plane: Plane,
    pub units: Units,
    pub distance_mode: DistanceMode,
    pub coord_system: CoordSystem,
    /// G53 for the current block only.
    pub absolute_override: bool,
    pub path_control: PathControl,
}

impl GState {
    pub fn to_millimeters(&self, value: f64) -> f64 {
        match self.units {
            Units::Inches => value * MM_PER_INCH,
            Units::Millimeters => value,
        }
    }

    pub fn from_millimeters(&self, value: f64) -> f64 {
        match self.units {
            Units::Inches => value / MM_PER_INCH,
            Units::Millimeters => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        let mut gm = GState::default();
        assert_eq!(gm.to_millimeters(2.0), 2.0);
        gm.units = Units::Inches;
        assert!((gm.to_millimeters(1.0) - 25.4).abs() < 1e-12);
        assert!((gm.from_millimeters(50.8) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_coord_system_p_word() {
        assert_eq!(CoordSystem::from_p_word(1), Some(CoordSystem::G54));
        assert_eq!(CoordSystem::from_p_word(6), Some(CoordSystem::G59));
        assert_eq!(CoordSystem::from_p_word(0), None);
        assert_eq!(CoordSystem::from_p_word(7), None);
        assert_eq!(CoordSystem::G56.index(), 3);
    }
}
