//! # Machine Configuration
//!
//! Axis limits, planner sizing and runtime timing for the motion controller.
//! Every field has a default, so an empty file describes the reference
//! machine (three linear axes plus a rotary A axis).
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [planner]
//! pool_size = 32
//! junction_acceleration = 25000.0
//!
//! [runtime]
//! nominal_segment_time_us = 4000.0
//!
//! [axes.z]
//! max_feedrate = 1200.0
//! max_jerk = 120.0
//! min_switch = "homing_and_limit"
//! max_switch = "disabled"
//! ```
//!
//! Units follow the g-code conventions of the controller: millimetres,
//! mm/min for velocities, and jerk in millions of mm/min³.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::AXES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level machine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub axes: AxesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Move buffer pool sizing and lookahead limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Number of slots in the move ring.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Free slots the command loop keeps in hand before accepting a command.
    #[serde(default = "default_reserve")]
    pub reserve: usize,
    /// Shortest block the runtime can service, in microseconds.
    #[serde(default = "default_min_block_time_us")]
    pub min_block_time_us: f64,
    /// Centripetal acceleration budget for corners (mm/min²).
    #[serde(default = "default_junction_acceleration")]
    pub junction_acceleration: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            reserve: default_reserve(),
            min_block_time_us: default_min_block_time_us(),
            junction_acceleration: default_junction_acceleration(),
        }
    }
}

/// Exec/Load/DDA timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_nominal_segment_time_us")]
    pub nominal_segment_time_us: f64,
    #[serde(default = "default_dda_frequency_hz")]
    pub dda_frequency_hz: f64,
    /// Pulse-generator ticks the host runs between two command-loop passes.
    #[serde(default = "default_ticks_per_pass")]
    pub ticks_per_pass: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            nominal_segment_time_us: default_nominal_segment_time_us(),
            dda_frequency_hz: default_dda_frequency_hz(),
            ticks_per_pass: default_ticks_per_pass(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwitchMode {
    Disabled,
    Homing,
    Limit,
    HomingAndLimit,
}

impl SwitchMode {
    pub fn is_homing(self) -> bool {
        matches!(self, SwitchMode::Homing | SwitchMode::HomingAndLimit)
    }

    pub fn is_limit(self) -> bool {
        matches!(self, SwitchMode::Limit | SwitchMode::HomingAndLimit)
    }
}

/// Per-axis kinematic limits, homing parameters and switch wiring.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisConfig {
    /// Traverse (G0) velocity limit.
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    /// Feed (G1) velocity limit.
    #[serde(default = "default_max_feedrate")]
    pub max_feedrate: f64,
    #[serde(default = "default_max_jerk")]
    pub max_jerk: f64,
    #[serde(default = "default_homing_jerk")]
    pub homing_jerk: f64,
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
    #[serde(default = "default_steps_per_unit")]
    pub steps_per_unit: f64,
    #[serde(default = "default_min_travel")]
    pub min_travel: f64,
    #[serde(default = "default_max_travel")]
    pub max_travel: f64,
    #[serde(default = "default_search_velocity")]
    pub search_velocity: f64,
    #[serde(default = "default_latch_velocity")]
    pub latch_velocity: f64,
    #[serde(default = "default_latch_backoff")]
    pub latch_backoff: f64,
    #[serde(default = "default_zero_backoff")]
    pub zero_backoff: f64,
    #[serde(default = "default_min_switch")]
    pub min_switch: SwitchMode,
    #[serde(default = "default_max_switch")]
    pub max_switch: SwitchMode,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            max_velocity: default_max_velocity(),
            max_feedrate: default_max_feedrate(),
            max_jerk: default_max_jerk(),
            homing_jerk: default_homing_jerk(),
            junction_deviation: default_junction_deviation(),
            steps_per_unit: default_steps_per_unit(),
            min_travel: default_min_travel(),
            max_travel: default_max_travel(),
            search_velocity: default_search_velocity(),
            latch_velocity: default_latch_velocity(),
            latch_backoff: default_latch_backoff(),
            zero_backoff: default_zero_backoff(),
            min_switch: default_min_switch(),
            max_switch: default_max_switch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxesConfig {
    #[serde(default)]
    pub x: AxisConfig,
    #[serde(default)]
    pub y: AxisConfig,
    #[serde(default)]
    pub z: AxisConfig,
    #[serde(default = "default_rotary_axis")]
    pub a: AxisConfig,
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            x: AxisConfig::default(),
            y: AxisConfig::default(),
            z: AxisConfig::default(),
            a: default_rotary_axis(),
        }
    }
}

impl AxesConfig {
    /// Axis configs in X, Y, Z, A order.
    pub fn as_array(&self) -> [&AxisConfig; AXES] {
        [&self.x, &self.y, &self.z, &self.a]
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Reject targets outside the travel envelope of homed axes.
    #[serde(default = "default_true")]
    pub soft_limits: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { soft_limits: default_true() }
    }
}

/// Physical model used by the simulated switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Physical position of each axis when the controller boots at zero.
    #[serde(default = "default_physical_origin")]
    pub physical_origin: [f64; AXES],
    /// Physical Z height at which the probe closes.
    #[serde(default = "default_probe_surface_z")]
    pub probe_surface_z: f64,
    /// Distance beyond the travel envelope at which the end switches trip.
    #[serde(default = "default_switch_overtravel")]
    pub switch_overtravel: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            physical_origin: default_physical_origin(),
            probe_surface_z: default_probe_surface_z(),
            switch_overtravel: default_switch_overtravel(),
        }
    }
}

impl MachineConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let planner = &self.planner;
        if planner.reserve == 0 {
            return Err(ConfigError::Invalid("planner.reserve must be > 0".to_string()));
        }
        if planner.pool_size < planner.reserve + 2 {
            return Err(ConfigError::Invalid(format!(
                "planner.pool_size ({}) must be at least reserve + 2 ({})",
                planner.pool_size,
                planner.reserve + 2
            )));
        }
        if planner.min_block_time_us <= 0.0 || planner.junction_acceleration <= 0.0 {
            return Err(ConfigError::Invalid(
                "planner timing and junction acceleration must be > 0".to_string(),
            ));
        }
        if self.runtime.dda_frequency_hz <= 0.0 || self.runtime.nominal_segment_time_us <= 0.0 {
            return Err(ConfigError::Invalid(
                "runtime.dda_frequency_hz and runtime.nominal_segment_time_us must be > 0".to_string(),
            ));
        }
        if self.runtime.ticks_per_pass == 0 {
            return Err(ConfigError::Invalid("runtime.ticks_per_pass must be > 0".to_string()));
        }
        for (name, axis) in ["x", "y", "z", "a"].iter().zip(self.axes.as_array()) {
            if axis.max_velocity <= 0.0 || axis.max_feedrate <= 0.0 {
                return Err(ConfigError::Invalid(format!("axis {name}: velocities must be > 0")));
            }
            if axis.max_jerk <= 0.0 || axis.homing_jerk <= 0.0 {
                return Err(ConfigError::Invalid(format!("axis {name}: jerk must be > 0")));
            }
            if axis.steps_per_unit <= 0.0 {
                return Err(ConfigError::Invalid(format!("axis {name}: steps_per_unit must be > 0")));
            }
            // the DDA emits at most one step per axis per tick
            let step_rate = axis.max_velocity.max(axis.max_feedrate) * axis.steps_per_unit / 60.0;
            if step_rate > self.runtime.dda_frequency_hz {
                return Err(ConfigError::Invalid(format!(
                    "axis {name}: step rate {step_rate:.0} Hz exceeds runtime.dda_frequency_hz ({})",
                    self.runtime.dda_frequency_hz
                )));
            }
            if axis.junction_deviation < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "axis {name}: junction_deviation must not be negative"
                )));
            }
            if axis.min_travel > axis.max_travel {
                return Err(ConfigError::Invalid(format!(
                    "axis {name}: min_travel ({}) exceeds max_travel ({})",
                    axis.min_travel, axis.max_travel
                )));
            }
            if axis.min_switch.is_homing() && axis.max_switch.is_homing() {
                return Err(ConfigError::Invalid(format!(
                    "axis {name}: only one switch may be used for homing"
                )));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_pool_size() -> usize { 28 }
fn default_reserve() -> usize { 4 }
fn default_min_block_time_us() -> f64 { 2500.0 }
fn default_junction_acceleration() -> f64 { 20000.0 }
fn default_nominal_segment_time_us() -> f64 { 5000.0 }
fn default_dda_frequency_hz() -> f64 { 50000.0 }
fn default_ticks_per_pass() -> u32 { 50 }
fn default_max_velocity() -> f64 { 8000.0 }
fn default_max_feedrate() -> f64 { 5000.0 }
fn default_max_jerk() -> f64 { 340.0 }
fn default_homing_jerk() -> f64 { 680.0 }
fn default_junction_deviation() -> f64 { 0.05 }
fn default_steps_per_unit() -> f64 { 40.0 }
fn default_min_travel() -> f64 { 0.0 }
fn default_max_travel() -> f64 { 200.0 }
fn default_search_velocity() -> f64 { 1000.0 }
fn default_latch_velocity() -> f64 { 100.0 }
fn default_latch_backoff() -> f64 { 2.0 }
fn default_zero_backoff() -> f64 { 1.0 }
fn default_min_switch() -> SwitchMode { SwitchMode::HomingAndLimit }
fn default_max_switch() -> SwitchMode { SwitchMode::Limit }
fn default_true() -> bool { true }
fn default_physical_origin() -> [f64; AXES] { [100.0, 100.0, 50.0, 0.0] }
fn default_probe_surface_z() -> f64 { 20.0 }
fn default_switch_overtravel() -> f64 { 5.0 }

fn default_rotary_axis() -> AxisConfig {
    AxisConfig {
        min_travel: -360.0,
        max_travel: 360.0,
        min_switch: SwitchMode::Disabled,
        max_switch: SwitchMode::Disabled,
        ..AxisConfig::default()
    }
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<MachineConfig, ConfigError> {
    let config: MachineConfig = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!("Rejected config '{}': {}", path, e);
        return Err(e);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = MachineConfig::default();
        assert_eq!(config.planner.pool_size, 28);
        assert_eq!(config.planner.reserve, 4);
        assert_eq!(config.planner.junction_acceleration, 20000.0);
        assert_eq!(config.axes.x.max_feedrate, 5000.0);
        assert_eq!(config.axes.y.max_velocity, 8000.0);
        assert_eq!(config.axes.z.max_jerk, 340.0);
        assert_eq!(config.axes.x.junction_deviation, 0.05);
        assert_eq!(config.axes.a.min_switch, SwitchMode::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_matches_defaults() {
        let config: MachineConfig = toml::from_str("").unwrap();
        assert_eq!(config.planner.pool_size, MachineConfig::default().planner.pool_size);
        assert_eq!(config.axes.a.max_travel, 360.0);
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("machine.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[planner]\npool_size = 16\n\n[axes.z]\nmax_feedrate = 1200.0\nmax_switch = \"disabled\""
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.planner.pool_size, 16);
        assert_eq!(config.axes.z.max_feedrate, 1200.0);
        assert_eq!(config.axes.z.max_switch, SwitchMode::Disabled);
        // Defaults for missing fields
        assert_eq!(config.planner.reserve, 4);
        assert_eq!(config.axes.z.max_velocity, 8000.0);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_machine.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_load_config_rejects_small_pool() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("small.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[planner]\npool_size = 5\nreserve = 4").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_double_homing_switch() {
        let mut config = MachineConfig::default();
        config.axes.y.max_switch = SwitchMode::Homing;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_travel() {
        let mut config = MachineConfig::default();
        config.axes.x.min_travel = 10.0;
        config.axes.x.max_travel = -10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_step_rate_above_dda() {
        let mut config = MachineConfig::default();
        assert!(config.validate().is_ok());
        // 8000 mm/min at 400 steps/mm is 53.3 kHz against a 50 kHz DDA
        config.axes.z.steps_per_unit = 400.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("axis z"));

        config.axes.z.steps_per_unit = 40.0;
        config.runtime.dda_frequency_hz = 5000.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
