// src/machine/axis.rs - Live per-axis settings
use crate::config::{AxisConfig, AxesConfig, SwitchMode};
use crate::motion::AXES;

/// Axis limits read by the planner on every call. Unlike [`AxisConfig`] these
/// may change between moves (homing and probing swap in their own jerk).
#[derive(Debug, Clone)]
pub struct AxisSettings {
    pub max_velocity: f64,
    pub max_feedrate: f64,
    pub max_jerk: f64,
    pub homing_jerk: f64,
    pub junction_deviation: f64,
    pub steps_per_unit: f64,
    pub min_travel: f64,
    pub max_travel: f64,
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
    pub zero_backoff: f64,
    pub min_switch: SwitchMode,
    pub max_switch: SwitchMode,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self::from(&AxisConfig::default())
    }
}

impl From<&AxisConfig> for AxisSettings {
    fn from(config: &AxisConfig) -> Self {
        Self {
            max_velocity: config.max_velocity,
            max_feedrate: config.max_feedrate,
            max_jerk: config.max_jerk,
            homing_jerk: config.homing_jerk,
            junction_deviation: config.junction_deviation,
            steps_per_unit: config.steps_per_unit,
            min_travel: config.min_travel,
            max_travel: config.max_travel,
            search_velocity: config.search_velocity,
            latch_velocity: config.latch_velocity,
            latch_backoff: config.latch_backoff,
            zero_backoff: config.zero_backoff,
            min_switch: config.min_switch,
            max_switch: config.max_switch,
        }
    }
}

impl AxisSettings {
    pub fn from_axes(axes: &AxesConfig) -> [AxisSettings; AXES] {
        axes.as_array().map(AxisSettings::from)
    }

    pub fn is_within_travel(&self, position: f64) -> bool {
        position >= self.min_travel && position <= self.max_travel
    }
}

pub fn junction_deviations(axes: &[AxisSettings; AXES]) -> [f64; AXES] {
    std::array::from_fn(|i| axes[i].junction_deviation)
}

pub fn steps_per_unit(axes: &[AxisSettings; AXES]) -> [f64; AXES] {
    std::array::from_fn(|i| axes[i].steps_per_unit)
}
