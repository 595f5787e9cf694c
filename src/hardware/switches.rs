// src/hardware/switches.rs - End switches and probe input
use crate::config::{AxisConfig, MachineConfig, SwitchMode};
use crate::motion::{AXES, Z_AXIS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchEnd {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    #[default]
    Open,
    Closed,
}

/// Switch inputs sampled by the controller once per pass.
pub trait Switches: Send + std::fmt::Debug {
    /// Refresh every input from the motor encoder counts.
    fn sample(&mut self, encoder: &[i64; AXES]);

    fn state(&self, axis: usize, end: SwitchEnd) -> SwitchState;

    fn probe(&self) -> SwitchState;

    /// A limit switch closed since the last [`clear_limits`](Self::clear_limits).
    fn limit_thrown(&self) -> Option<(usize, SwitchEnd)>;

    /// Homing runs with limit detection off, since it drives into the switches.
    fn set_limits_enabled(&mut self, enabled: bool);

    fn clear_limits(&mut self);
}

#[derive(Debug, Clone)]
struct SimAxis {
    steps_per_unit: f64,
    origin: f64,
    min_trip: f64,
    max_trip: f64,
    min_mode: SwitchMode,
    max_mode: SwitchMode,
}

impl SimAxis {
    fn new(config: &AxisConfig, origin: f64, overtravel: f64) -> Self {
        Self {
            steps_per_unit: config.steps_per_unit,
            origin,
            min_trip: config.min_travel - overtravel,
            max_trip: config.max_travel + overtravel,
            min_mode: config.min_switch,
            max_mode: config.max_switch,
        }
    }

    fn physical(&self, steps: i64) -> f64 {
        self.origin + steps as f64 / self.steps_per_unit
    }
}

/// Switches derived from a physical model of the machine: the controller
/// boots somewhere inside the envelope, and the switches sit a fixed
/// overtravel past each end of travel.
#[derive(Debug, Clone)]
pub struct SimSwitches {
    axes: Vec<SimAxis>,
    probe_surface_z: f64,
    states: [[SwitchState; 2]; AXES],
    probe: SwitchState,
    limits_enabled: bool,
    thrown: Option<(usize, SwitchEnd)>,
}

impl SimSwitches {
    pub fn new(config: &MachineConfig) -> Self {
        let sim = &config.simulation;
        let axes = config
            .axes
            .as_array()
            .iter()
            .enumerate()
            .map(|(i, axis)| SimAxis::new(axis, sim.physical_origin[i], sim.switch_overtravel))
            .collect();
        Self {
            axes,
            probe_surface_z: sim.probe_surface_z,
            states: [[SwitchState::Open; 2]; AXES],
            probe: SwitchState::Open,
            limits_enabled: true,
            thrown: None,
        }
    }

    /// Physical axis position for an encoder count.
    pub fn physical_position(&self, axis: usize, steps: i64) -> f64 {
        self.axes[axis].physical(steps)
    }
}

impl Switches for SimSwitches {
    fn sample(&mut self, encoder: &[i64; AXES]) {
        for (axis, model) in self.axes.iter().enumerate() {
            let position = model.physical(encoder[axis]);
            let ends = [
                (SwitchEnd::Min, model.min_mode, position <= model.min_trip),
                (SwitchEnd::Max, model.max_mode, position >= model.max_trip),
            ];
            for (slot, (end, mode, tripped)) in ends.into_iter().enumerate() {
                let state = if mode != SwitchMode::Disabled && tripped {
                    SwitchState::Closed
                } else {
                    SwitchState::Open
                };
                let opened_before = self.states[axis][slot] == SwitchState::Open;
                self.states[axis][slot] = state;
                if state == SwitchState::Closed
                    && opened_before
                    && mode.is_limit()
                    && self.limits_enabled
                    && self.thrown.is_none()
                {
                    tracing::warn!("Limit switch thrown: axis {} {:?} at {:.3}", axis, end, position);
                    self.thrown = Some((axis, end));
                }
            }
        }
        self.probe = if self.axes[Z_AXIS].physical(encoder[Z_AXIS]) <= self.probe_surface_z {
            SwitchState::Closed
        } else {
            SwitchState::Open
        };
    }

    fn state(&self, axis: usize, end: SwitchEnd) -> SwitchState {
        match end {
            SwitchEnd::Min => self.states[axis][0],
            SwitchEnd::Max => self.states[axis][1],
        }
    }

    fn probe(&self) -> SwitchState {
        self.probe
    }

    fn limit_thrown(&self) -> Option<(usize, SwitchEnd)> {
        self.thrown
    }

    fn set_limits_enabled(&mut self, enabled: bool) {
        self.limits_enabled = enabled;
    }

    fn clear_limits(&mut self) {
        self.thrown = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps_for(physical: f64, origin: f64) -> i64 {
        ((physical - origin) * 40.0).round() as i64
    }

    #[test]
    fn test_switches_open_at_boot() {
        let config = MachineConfig::default();
        let mut switches = SimSwitches::new(&config);
        switches.sample(&[0; AXES]);
        assert_eq!(switches.state(0, SwitchEnd::Min), SwitchState::Open);
        assert_eq!(switches.probe(), SwitchState::Open);
        assert!(switches.limit_thrown().is_none());
    }

    #[test]
    fn test_min_switch_closes_past_overtravel() {
        let config = MachineConfig::default();
        let mut switches = SimSwitches::new(&config);
        let mut encoder = [0; AXES];
        encoder[0] = steps_for(-5.0, 100.0);
        switches.sample(&encoder);
        assert_eq!(switches.state(0, SwitchEnd::Min), SwitchState::Closed);
        assert_eq!(switches.limit_thrown(), Some((0, SwitchEnd::Min)));
    }

    #[test]
    fn test_disabled_limits_do_not_latch() {
        let config = MachineConfig::default();
        let mut switches = SimSwitches::new(&config);
        switches.set_limits_enabled(false);
        let mut encoder = [0; AXES];
        encoder[1] = steps_for(210.0, 100.0);
        switches.sample(&encoder);
        assert_eq!(switches.state(1, SwitchEnd::Max), SwitchState::Closed);
        assert!(switches.limit_thrown().is_none());
    }

    #[test]
    fn test_probe_closes_at_surface() {
        let config = MachineConfig::default();
        let mut switches = SimSwitches::new(&config);
        let mut encoder = [0; AXES];
        encoder[Z_AXIS] = steps_for(19.9, 50.0);
        switches.sample(&encoder);
        assert_eq!(switches.probe(), SwitchState::Closed);
    }

    #[test]
    fn test_clear_limits_rearms() {
        let config = MachineConfig::default();
        let mut switches = SimSwitches::new(&config);
        let mut encoder = [0; AXES];
        encoder[0] = steps_for(-6.0, 100.0);
        switches.sample(&encoder);
        switches.clear_limits();
        assert!(switches.limit_thrown().is_none());
        switches.sample(&[0; AXES]);
        switches.sample(&encoder);
        assert!(switches.limit_thrown().is_some());
    }
}
