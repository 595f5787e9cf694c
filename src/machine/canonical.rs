// src/machine/canonical.rs - Canonical machine
//! Modal state and command execution between the g-code interpreter and
//! the motion controller.
//!
//! Positions are kept in absolute machine millimetres. Values coming from
//! g-code are converted from the active units and, in absolute distance
//! mode, shifted by the active coordinate and origin offsets.

use crate::config::MachineConfig;
use crate::hardware::{SimSwitches, SimulatedDda, SwitchState, Switches};
use crate::machine::axis::{AxisSettings, steps_per_unit};
use crate::machine::gstate::{
    CoordSystem, DistanceMode, FeedRateMode, GState, MotionMode, PathControl, Plane, Units,
};
use crate::machine::homing::HomingCycle;
use crate::machine::probing::ProbingCycle;
use crate::machine::{
    CycleState, HomingState, MachineError, MachineState, MotionState, ProbeState, Status,
};
use crate::motion::{AXES, AxisVector, MotionController, Planned, RuntimeEvent, SyncCommand};

/// Modal settings a cycle overrides and restores when it ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedModal {
    pub units: Units,
    pub coord_system: CoordSystem,
    pub distance_mode: DistanceMode,
    pub feedrate_mode: FeedRateMode,
    pub feedrate: f64,
}

#[derive(Debug)]
pub struct CanonicalMachine {
    pub(crate) motion: MotionController,
    pub(crate) switches: Box<dyn Switches>,
    pub(crate) axes: [AxisSettings; AXES],
    soft_limits: bool,
    pub(crate) gm: GState,
    /// Model position: where the last accepted move ends.
    position: AxisVector,
    coord_offsets: [AxisVector; CoordSystem::COUNT],
    origin_offsets: AxisVector,
    origin_offset_enable: bool,
    pub(crate) machine_state: MachineState,
    pub(crate) cycle_state: CycleState,
    motion_state: MotionState,
    pub(crate) homing_state: HomingState,
    pub(crate) homed: [bool; AXES],
    pub(crate) probe_state: ProbeState,
    pub(crate) probe_results: AxisVector,
    homing: HomingCycle,
    probing: ProbingCycle,
    completed_line: Option<u32>,
}

impl CanonicalMachine {
    pub fn new(config: &MachineConfig, motion: MotionController, switches: Box<dyn Switches>) -> Self {
        let gm = GState {
            motion_mode: MotionMode::CancelMotionMode,
            coord_system: CoordSystem::G54,
            ..GState::default()
        };
        Self {
            motion,
            switches,
            axes: AxisSettings::from_axes(&config.axes),
            soft_limits: config.limits.soft_limits,
            gm,
            position: [0.0; AXES],
            coord_offsets: [[0.0; AXES]; CoordSystem::COUNT],
            origin_offsets: [0.0; AXES],
            origin_offset_enable: false,
            machine_state: MachineState::Ready,
            cycle_state: CycleState::Off,
            motion_state: MotionState::Stop,
            homing_state: HomingState::NotHomed,
            homed: [false; AXES],
            probe_state: ProbeState::Failed,
            probe_results: [0.0; AXES],
            homing: HomingCycle::default(),
            probing: ProbingCycle::default(),
            completed_line: None,
        }
    }

    /// Machine backed by the simulated DDA and switches.
    pub fn simulated(config: &MachineConfig) -> Self {
        let axes = AxisSettings::from_axes(&config.axes);
        let motion = MotionController::new(config, steps_per_unit(&axes), Box::new(SimulatedDda::new()));
        Self::new(config, motion, Box::new(SimSwitches::new(config)))
    }

    // Accessors

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut MotionController {
        &mut self.motion
    }

    pub fn switches(&self) -> &dyn Switches {
        self.switches.as_ref()
    }

    pub fn gm(&self) -> &GState {
        &self.gm
    }

    pub fn machine_state(&self) -> MachineState {
        self.machine_state
    }

    pub fn cycle_state(&self) -> CycleState {
        self.cycle_state
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion_state
    }

    pub fn homing_state(&self) -> HomingState {
        self.homing_state
    }

    pub fn is_homed(&self, axis: usize) -> bool {
        self.homed[axis]
    }

    pub fn probe_state(&self) -> ProbeState {
        self.probe_state
    }

    pub fn probe_results(&self) -> &AxisVector {
        &self.probe_results
    }

    pub fn is_alarmed(&self) -> bool {
        matches!(self.machine_state, MachineState::Alarm | MachineState::Shutdown)
    }

    /// Line number of the most recently completed block.
    pub fn completed_line(&self) -> Option<u32> {
        self.completed_line
    }

    pub fn get_absolute_position(&self, axis: usize) -> f64 {
        self.position[axis]
    }

    /// Model position of `axis` in the active work coordinates and units.
    pub fn get_work_position(&self, axis: usize) -> f64 {
        self.gm.from_millimeters(self.position[axis] - self.active_coord_offset(axis))
    }

    pub fn get_axis_jerk(&self, axis: usize) -> f64 {
        self.axes[axis].max_jerk
    }

    pub fn set_axis_jerk(&mut self, axis: usize, jerk: f64) {
        self.axes[axis].max_jerk = jerk;
    }

    pub fn axis_settings(&self, axis: usize) -> &AxisSettings {
        &self.axes[axis]
    }

    // Modal state

    pub fn set_model_linenum(&mut self, linenum: u32) {
        self.gm.linenum = linenum;
    }

    pub fn set_feed_rate_mode(&mut self, mode: FeedRateMode) {
        self.gm.feedrate_mode = mode;
    }

    /// In inverse time mode `F` is moves per minute; the model keeps minutes per move.
    pub fn set_feed_rate(&mut self, feed_rate: f64) -> Result<(), MachineError> {
        if feed_rate < 0.0 || !feed_rate.is_finite() {
            return Err(MachineError::InputValueOutOfRange(format!("F{feed_rate}")));
        }
        self.gm.feedrate = match self.gm.feedrate_mode {
            FeedRateMode::InverseTime if feed_rate > 0.0 => 1.0 / feed_rate,
            FeedRateMode::InverseTime => 0.0,
            _ => self.gm.to_millimeters(feed_rate),
        };
        Ok(())
    }

    pub fn select_plane(&mut self, plane: Plane) {
        self.gm.plane = plane;
    }

    pub fn select_units(&mut self, units: Units) {
        self.gm.units = units;
    }

    pub fn select_distance_mode(&mut self, mode: DistanceMode) {
        self.gm.distance_mode = mode;
    }

    pub fn select_path_control(&mut self, path_control: PathControl) {
        self.gm.path_control = path_control;
    }

    pub fn set_motion_mode(&mut self, mode: MotionMode) {
        self.gm.motion_mode = mode;
    }

    pub fn set_coord_system(&mut self, coord_system: CoordSystem) {
        self.gm.coord_system = coord_system;
    }

    /// G53: machine coordinates for the current block only.
    pub fn set_absolute_override(&mut self, enabled: bool) {
        self.gm.absolute_override = enabled;
    }

    pub fn set_parameter(&mut self, value: f64) {
        self.gm.parameter = value;
    }

    /// G10 L2: offsets of a work coordinate system.
    pub fn set_coord_offsets(
        &mut self,
        coord_system: CoordSystem,
        values: &AxisVector,
        flags: &[bool; AXES],
    ) -> Result<(), MachineError> {
        if coord_system == CoordSystem::Absolute {
            return Err(MachineError::InputValueOutOfRange(
                "coordinate system must be G54..G59".to_string(),
            ));
        }
        for axis in 0..AXES {
            if flags[axis] {
                self.coord_offsets[coord_system.index()][axis] = self.gm.to_millimeters(values[axis]);
            }
        }
        tracing::debug!("{:?} offsets now {:?}", coord_system, self.coord_offsets[coord_system.index()]);
        Ok(())
    }

    /// G92: make the current position read as `values`.
    pub fn set_origin_offsets(&mut self, values: &AxisVector, flags: &[bool; AXES]) {
        self.origin_offset_enable = true;
        let cs = self.gm.coord_system.index();
        for axis in 0..AXES {
            if flags[axis] {
                self.origin_offsets[axis] =
                    self.position[axis] - self.coord_offsets[cs][axis] - self.gm.to_millimeters(values[axis]);
            }
        }
    }

    /// G92.1
    pub fn reset_origin_offsets(&mut self) {
        self.origin_offset_enable = false;
        self.origin_offsets = [0.0; AXES];
    }

    /// G92.2
    pub fn suspend_origin_offsets(&mut self) {
        self.origin_offset_enable = false;
    }

    /// G92.3
    pub fn resume_origin_offsets(&mut self) {
        self.origin_offset_enable = true;
    }

    fn active_coord_offset(&self, axis: usize) -> f64 {
        if self.gm.absolute_override {
            return 0.0;
        }
        let offset = self.coord_offsets[self.gm.coord_system.index()][axis];
        if self.origin_offset_enable { offset + self.origin_offsets[axis] } else { offset }
    }

    fn work_offsets(&self) -> AxisVector {
        std::array::from_fn(|axis| self.active_coord_offset(axis))
    }

    /// Resolve g-code axis words into a machine target without touching the model.
    pub fn resolve_target(&self, values: &AxisVector, flags: &[bool; AXES]) -> AxisVector {
        let mut target = self.gm.target;
        for axis in 0..AXES {
            if !flags[axis] {
                continue;
            }
            let value = self.gm.to_millimeters(values[axis]);
            target[axis] = match self.gm.distance_mode {
                DistanceMode::Absolute => self.active_coord_offset(axis) + value,
                DistanceMode::Incremental => self.gm.target[axis] + value,
            };
        }
        target
    }

    pub fn set_model_target(&mut self, values: &AxisVector, flags: &[bool; AXES]) {
        self.gm.target = self.resolve_target(values, flags);
    }

    pub(crate) fn save_modal(&self) -> SavedModal {
        SavedModal {
            units: self.gm.units,
            coord_system: self.gm.coord_system,
            distance_mode: self.gm.distance_mode,
            feedrate_mode: self.gm.feedrate_mode,
            feedrate: self.gm.feedrate,
        }
    }

    pub(crate) fn restore_modal(&mut self, saved: &SavedModal) {
        self.gm.units = saved.units;
        self.gm.coord_system = saved.coord_system;
        self.gm.distance_mode = saved.distance_mode;
        self.gm.feedrate_mode = saved.feedrate_mode;
        self.gm.feedrate = saved.feedrate;
        self.gm.motion_mode = MotionMode::CancelMotionMode;
    }

    // Motion

    fn check_soft_limits(&self, target: &AxisVector) -> Result<(), MachineError> {
        if !self.soft_limits {
            return Ok(());
        }
        for axis in 0..AXES {
            if self.homed[axis] && !self.axes[axis].is_within_travel(target[axis]) {
                tracing::warn!("Soft limit: axis {} target {:.3}", axis, target[axis]);
                return Err(MachineError::SoftLimitExceeded { axis, target: target[axis] });
            }
        }
        Ok(())
    }

    /// Plan a line to `target` (machine mm). The model only advances if the
    /// planner accepted the move.
    fn plan_move(&mut self, mode: MotionMode, target: AxisVector) -> Result<Planned, MachineError> {
        if self.is_alarmed() {
            return Err(MachineError::MachineAlarmed);
        }
        self.check_soft_limits(&target)?;
        self.gm.motion_mode = mode;
        let previous = self.gm.target;
        self.gm.target = target;
        self.gm.work_offset = self.work_offsets();
        self.cycle_start();
        match self.motion.plan_line(self.gm, &self.axes) {
            Ok(planned) => {
                self.finalize_move();
                Ok(planned)
            }
            Err(e) => {
                self.gm.target = previous;
                Err(e.into())
            }
        }
    }

    /// G0
    pub fn straight_traverse(&mut self, values: &AxisVector, flags: &[bool; AXES]) -> Result<Planned, MachineError> {
        let target = self.resolve_target(values, flags);
        self.plan_move(MotionMode::StraightTraverse, target)
    }

    /// G1
    pub fn straight_feed(&mut self, values: &AxisVector, flags: &[bool; AXES]) -> Result<Planned, MachineError> {
        if self.gm.feedrate <= 0.0 {
            return Err(MachineError::FeedrateNotSpecified);
        }
        let target = self.resolve_target(values, flags);
        self.plan_move(MotionMode::StraightFeed, target)
    }

    /// Feed to a machine-coordinate target. Used by the cycles.
    pub(crate) fn feed_to(&mut self, target: AxisVector) -> Result<Planned, MachineError> {
        if self.gm.feedrate <= 0.0 {
            return Err(MachineError::FeedrateNotSpecified);
        }
        self.plan_move(MotionMode::StraightFeed, target)
    }

    /// G4
    pub fn dwell(&mut self, seconds: f64) -> Result<(), MachineError> {
        if self.is_alarmed() {
            return Err(MachineError::MachineAlarmed);
        }
        if seconds < 0.0 || !seconds.is_finite() {
            return Err(MachineError::InputValueOutOfRange(format!("P{seconds}")));
        }
        self.motion.queue_dwell(seconds, self.gm)?;
        Ok(())
    }

    /// M0, M1
    pub fn program_stop(&mut self) -> Result<(), MachineError> {
        self.motion.queue_command(SyncCommand::ProgramStop, self.gm)?;
        Ok(())
    }

    /// M2, M30
    pub fn program_end(&mut self) -> Result<(), MachineError> {
        self.motion.queue_command(SyncCommand::ProgramEnd, self.gm)?;
        Ok(())
    }

    pub fn cycle_start(&mut self) {
        self.machine_state = MachineState::Cycle;
        if self.cycle_state == CycleState::Off {
            self.cycle_state = CycleState::Machining;
        }
    }

    pub fn finalize_move(&mut self) {
        self.position = self.gm.target;
        // inverse time needs an explicit F on every feed
        if self.gm.feedrate_mode == FeedRateMode::InverseTime && self.gm.motion_mode == MotionMode::StraightFeed {
            self.gm.feedrate = 0.0;
        }
    }

    /// Set every position layer of `axis`: model, target, planner and runtime.
    pub fn set_position(&mut self, axis: usize, position: f64) {
        self.position[axis] = position;
        self.gm.target[axis] = position;
        self.motion.set_planner_position(axis, position);
        self.motion.set_runtime_position(axis, position);
    }

    // Alarms

    pub fn soft_alarm(&mut self, cause: &MachineError) {
        tracing::error!("Alarm: {}", cause);
        self.machine_state = MachineState::Alarm;
    }

    /// Stop all motion now and shut down until the alarm is cleared.
    pub fn hard_alarm(&mut self, cause: &MachineError) {
        tracing::error!("Shutdown: {}", cause);
        self.motion.hard_stop();
        self.sync_model_to_runtime();
        self.homing = HomingCycle::default();
        self.probing = ProbingCycle::default();
        self.switches.set_limits_enabled(true);
        self.cycle_state = CycleState::Off;
        self.machine_state = MachineState::Shutdown;
    }

    pub fn clear_alarm(&mut self) {
        if self.is_alarmed() {
            tracing::info!("Alarm cleared");
            self.switches.clear_limits();
            self.machine_state = MachineState::Ready;
        }
    }

    fn sync_model_to_runtime(&mut self) {
        let runtime = *self.motion.runtime_position();
        self.position = runtime;
        self.gm.target = runtime;
    }

    // Runtime side

    /// One pulse-generator tick plus switch sampling. Cycles that watch a
    /// switch get their move stopped on the tick it closes.
    pub fn tick(&mut self) {
        self.motion.tick();
        self.sample_switches();
        if !self.motion.is_runtime_busy() {
            return;
        }
        let homing_hit = self
            .homing
            .watched_switch()
            .is_some_and(|(axis, end)| self.switches.state(axis, end) == SwitchState::Closed);
        let probe_hit = self.probing.is_moving() && self.switches.probe() == SwitchState::Closed;
        if homing_hit || probe_hit {
            self.stop_motion_at_switch();
        } else if self.switches.limit_thrown().is_some() {
            self.motion.hard_stop();
        }
    }

    pub fn sample_switches(&mut self) {
        let encoder = self.motion.encoder_position();
        self.switches.sample(&encoder);
    }

    /// Stop the move a cycle is watching and resync the model to where the
    /// machine actually stopped.
    pub fn stop_motion_at_switch(&mut self) {
        tracing::debug!("Switch closed, stopping at {:?}", self.motion.runtime_position());
        self.motion.hard_stop();
        self.sync_model_to_runtime();
    }

    /// Apply completion events from the runtime and settle cycle state.
    pub fn process_runtime_events(&mut self) {
        for event in self.motion.take_events() {
            match event {
                RuntimeEvent::BlockCompleted { line, sequence, .. } => {
                    tracing::trace!("Block {} (line {}) complete", sequence, line);
                    self.completed_line = Some(line);
                }
                RuntimeEvent::ProgramStop { line } => {
                    tracing::info!("Program stop at line {}", line);
                    self.machine_state = MachineState::ProgramStop;
                    if self.cycle_state == CycleState::Machining {
                        self.cycle_state = CycleState::Off;
                    }
                }
                RuntimeEvent::ProgramEnd { line } => {
                    tracing::info!("Program end at line {}", line);
                    self.program_end_reset();
                }
                RuntimeEvent::Marker(tag) => tracing::debug!("Marker {} reached", tag),
            }
        }
        let busy = self.motion.is_runtime_busy();
        self.motion_state = if busy { MotionState::Run } else { MotionState::Stop };
        if !busy && self.cycle_state == CycleState::Machining {
            self.cycle_state = CycleState::Off;
            if self.machine_state == MachineState::Cycle {
                self.machine_state = MachineState::Ready;
            }
        }
    }

    fn program_end_reset(&mut self) {
        self.origin_offset_enable = false;
        self.gm.coord_system = CoordSystem::G54;
        self.gm.plane = Plane::Xy;
        self.gm.distance_mode = DistanceMode::Absolute;
        self.gm.feedrate_mode = FeedRateMode::UnitsPerMinute;
        self.gm.path_control = PathControl::Continuous;
        self.gm.motion_mode = MotionMode::CancelMotionMode;
        self.machine_state = MachineState::ProgramEnd;
        if self.cycle_state == CycleState::Machining {
            self.cycle_state = CycleState::Off;
        }
    }

    // Cycles

    /// G28.2: home the flagged axes.
    pub fn cycle_homing_start(&mut self, flags: &[bool; AXES]) -> Result<(), MachineError> {
        if self.is_alarmed() {
            return Err(MachineError::MachineAlarmed);
        }
        let cycle = HomingCycle::start(self, *flags);
        self.homing = cycle;
        Ok(())
    }

    /// G38.2: probe toward the target given by the axis words.
    pub fn straight_probe(&mut self, values: &AxisVector, flags: &[bool; AXES]) -> Result<(), MachineError> {
        if self.is_alarmed() {
            return Err(MachineError::MachineAlarmed);
        }
        let cycle = ProbingCycle::request(self, values, flags)?;
        self.probing = cycle;
        Ok(())
    }

    pub fn homing_callback(&mut self) -> Result<Status, MachineError> {
        if self.cycle_state != CycleState::Homing {
            return Ok(Status::Noop);
        }
        if self.motion.is_runtime_busy() {
            return Ok(Status::Again);
        }
        let mut cycle = std::mem::take(&mut self.homing);
        let result = cycle.step(self);
        self.homing = cycle;
        if let Err(e) = &result {
            self.soft_alarm(e);
        }
        result
    }

    pub fn probe_callback(&mut self) -> Result<Status, MachineError> {
        if self.cycle_state != CycleState::Probe && self.probe_state != ProbeState::Waiting {
            return Ok(Status::Noop);
        }
        if self.motion.is_runtime_busy() {
            return Ok(Status::Again);
        }
        let mut cycle = std::mem::take(&mut self.probing);
        let result = cycle.step(self);
        self.probing = cycle;
        if let Err(e) = &result {
            self.soft_alarm(e);
        }
        result
    }

    /// Tick the pipeline until idle or `max_ticks`. True if it drained.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if !self.motion.is_runtime_busy() {
                break;
            }
            self.tick();
        }
        self.process_runtime_events();
        !self.motion.is_runtime_busy()
    }
}
