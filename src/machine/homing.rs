// src/machine/homing.rs - G28.2 homing cycle
//! Homes the requested axes one at a time, in Z, X, Y, A order. Each axis
//! clears any closed switch, searches toward its homing switch at the search
//! velocity, backs off slowly to latch, backs off again to the zero point
//! and sets its position there.
//!
//! Every phase queues at most one move. The canonical machine only calls
//! [`HomingCycle::step`] once the runtime is idle, so each phase sees the
//! result of the move queued by the one before it.

use crate::machine::canonical::{CanonicalMachine, SavedModal};
use crate::machine::gstate::{CoordSystem, DistanceMode, FeedRateMode, Units};
use crate::machine::{CycleState, HomingState, MachineError, MachineState, Status};
use crate::hardware::{SwitchEnd, SwitchState};
use crate::motion::{A_AXIS, AXES, X_AXIS, Y_AXIS, Z_AXIS, fp_zero};

const HOMING_ORDER: [usize; AXES] = [Z_AXIS, X_AXIS, Y_AXIS, A_AXIS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomingPhase {
    #[default]
    Idle,
    AxisStart,
    Clear,
    Search,
    Latch,
    ZeroBackoff,
    SetZero,
    Finalize,
}

#[derive(Debug, Clone, Default)]
pub struct HomingCycle {
    phase: HomingPhase,
    requested: [bool; AXES],
    /// Next position in `HOMING_ORDER` to consider.
    order_index: usize,
    axis: Option<usize>,
    saved: Option<SavedModal>,
    saved_jerk: Option<f64>,
    search_travel: f64,
    search_velocity: f64,
    latch_velocity: f64,
    latch_backoff: f64,
    zero_backoff: f64,
    homing_switch: Option<(usize, SwitchEnd)>,
    limit_switch: Option<(usize, SwitchEnd)>,
    /// The search move is in flight and must stop when the homing switch closes.
    watching: bool,
}

impl HomingCycle {
    /// Save the modal state and switch the model to incremental machine
    /// millimetres for the cycle's moves.
    pub(crate) fn start(cm: &mut CanonicalMachine, requested: [bool; AXES]) -> Self {
        let saved = cm.save_modal();
        cm.select_units(Units::Millimeters);
        cm.select_distance_mode(DistanceMode::Incremental);
        cm.set_coord_system(CoordSystem::Absolute);
        cm.set_feed_rate_mode(FeedRateMode::UnitsPerMinute);
        cm.switches.set_limits_enabled(false);
        cm.cycle_state = CycleState::Homing;
        cm.homing_state = HomingState::NotHomed;
        tracing::info!("Homing cycle started for axes {:?}", requested);
        Self {
            phase: HomingPhase::AxisStart,
            requested,
            saved: Some(saved),
            ..Self::default()
        }
    }

    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    /// Switch that should stop the move currently in flight.
    pub fn watched_switch(&self) -> Option<(usize, SwitchEnd)> {
        if self.watching { self.homing_switch } else { None }
    }

    /// Run the current phase. On error the cycle is finalized before the
    /// error is returned, leaving the axis unhomed.
    pub(crate) fn step(&mut self, cm: &mut CanonicalMachine) -> Result<Status, MachineError> {
        match self.advance(self.phase, cm) {
            Ok((next, status)) => {
                self.phase = next;
                Ok(status)
            }
            Err(e) => {
                tracing::warn!("Homing aborted in {:?}: {}", self.phase, e);
                self.finalize(cm);
                Err(e)
            }
        }
    }

    fn advance(
        &mut self,
        phase: HomingPhase,
        cm: &mut CanonicalMachine,
    ) -> Result<(HomingPhase, Status), MachineError> {
        match phase {
            HomingPhase::Idle => Ok((HomingPhase::Idle, Status::Noop)),
            HomingPhase::AxisStart => self.axis_start(cm),
            HomingPhase::Clear => self.clear(cm),
            HomingPhase::Search => self.search(cm),
            HomingPhase::Latch => self.latch(cm),
            HomingPhase::ZeroBackoff => self.zero_backoff(cm),
            HomingPhase::SetZero => self.set_zero(cm),
            HomingPhase::Finalize => {
                self.finalize(cm);
                Ok((HomingPhase::Idle, Status::Ok))
            }
        }
    }

    fn next_axis(&mut self) -> Option<usize> {
        while self.order_index < AXES {
            let axis = HOMING_ORDER[self.order_index];
            self.order_index += 1;
            if self.requested[axis] {
                return Some(axis);
            }
        }
        None
    }

    fn axis_start(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        if !self.requested.iter().any(|r| *r) {
            return Err(MachineError::HomingBadOrNoAxis);
        }
        let Some(axis) = self.next_axis() else {
            cm.homing_state = HomingState::Homed;
            return Ok((HomingPhase::Finalize, Status::Again));
        };
        cm.homed[axis] = false;
        let settings = cm.axis_settings(axis).clone();
        if fp_zero(settings.search_velocity) {
            return Err(MachineError::HomingSearchVelocityZero);
        }
        if fp_zero(settings.latch_velocity) {
            return Err(MachineError::HomingLatchVelocityZero);
        }
        if settings.latch_backoff < 0.0 {
            return Err(MachineError::HomingLatchBackoffNegative);
        }
        let travel = (settings.max_travel - settings.min_travel).abs() + settings.latch_backoff;
        if fp_zero(travel) {
            return Err(MachineError::HomingTravelMinMaxIdentical);
        }

        match (settings.min_switch.is_homing(), settings.max_switch.is_homing()) {
            (true, true) => return Err(MachineError::HomingSwitchMisconfiguration(axis)),
            (false, false) => {
                tracing::info!("Axis {} has no homing switch, skipped", axis);
                return Ok((HomingPhase::AxisStart, Status::Again));
            }
            (true, false) => {
                self.homing_switch = Some((axis, SwitchEnd::Min));
                self.limit_switch = settings.max_switch.is_limit().then_some((axis, SwitchEnd::Max));
                self.search_travel = -travel;
                self.latch_backoff = settings.latch_backoff;
                self.zero_backoff = settings.zero_backoff;
            }
            (false, true) => {
                self.homing_switch = Some((axis, SwitchEnd::Max));
                self.limit_switch = settings.min_switch.is_limit().then_some((axis, SwitchEnd::Min));
                self.search_travel = travel;
                self.latch_backoff = -settings.latch_backoff;
                self.zero_backoff = -settings.zero_backoff;
            }
        }
        self.search_velocity = settings.search_velocity.abs();
        self.latch_velocity = settings.latch_velocity.abs();
        self.axis = Some(axis);
        self.saved_jerk = Some(cm.get_axis_jerk(axis));
        tracing::info!("Homing axis {}", axis);
        Ok((HomingPhase::Clear, Status::Again))
    }

    fn is_closed(cm: &CanonicalMachine, switch: Option<(usize, SwitchEnd)>) -> bool {
        switch.is_some_and(|(axis, end)| cm.switches.state(axis, end) == SwitchState::Closed)
    }

    /// Move off a switch that is already closed.
    fn clear(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        cm.sample_switches();
        if Self::is_closed(cm, self.homing_switch) {
            self.move_axis(cm, self.latch_backoff, self.search_velocity)?;
        } else if Self::is_closed(cm, self.limit_switch) {
            self.move_axis(cm, -self.latch_backoff, self.search_velocity)?;
        }
        Ok((HomingPhase::Search, Status::Again))
    }

    fn search(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        let axis = self.current_axis()?;
        let homing_jerk = cm.axis_settings(axis).homing_jerk;
        cm.set_axis_jerk(axis, homing_jerk);
        self.move_axis(cm, self.search_travel, self.search_velocity)?;
        self.watching = true;
        Ok((HomingPhase::Latch, Status::Again))
    }

    fn latch(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        self.watching = false;
        let axis = self.current_axis()?;
        cm.sample_switches();
        if !Self::is_closed(cm, self.homing_switch) {
            return Err(MachineError::HomingFailed(axis));
        }
        self.move_axis(cm, self.latch_backoff, self.latch_velocity)?;
        Ok((HomingPhase::ZeroBackoff, Status::Again))
    }

    fn zero_backoff(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        self.move_axis(cm, self.zero_backoff, self.search_velocity)?;
        Ok((HomingPhase::SetZero, Status::Again))
    }

    fn set_zero(&mut self, cm: &mut CanonicalMachine) -> Result<(HomingPhase, Status), MachineError> {
        let axis = self.current_axis()?;
        cm.set_position(axis, 0.0);
        cm.homed[axis] = true;
        self.restore_jerk(cm);
        tracing::info!("Axis {} homed", axis);
        Ok((HomingPhase::AxisStart, Status::Again))
    }

    fn current_axis(&self) -> Result<usize, MachineError> {
        self.axis.ok_or(MachineError::HomingBadOrNoAxis)
    }

    fn move_axis(&self, cm: &mut CanonicalMachine, travel: f64, velocity: f64) -> Result<(), MachineError> {
        let axis = self.current_axis()?;
        cm.motion.flush_queue()?;
        cm.gm.feedrate = velocity;
        let mut target = cm.gm.target;
        target[axis] += travel;
        cm.feed_to(target)?;
        Ok(())
    }

    fn restore_jerk(&mut self, cm: &mut CanonicalMachine) {
        if let (Some(axis), Some(jerk)) = (self.axis, self.saved_jerk.take()) {
            cm.set_axis_jerk(axis, jerk);
        }
    }

    fn finalize(&mut self, cm: &mut CanonicalMachine) {
        self.watching = false;
        if let Err(e) = cm.motion.flush_queue() {
            tracing::warn!("Homing finalize could not flush: {}", e);
        }
        self.restore_jerk(cm);
        if let Some(saved) = self.saved.take() {
            cm.restore_modal(&saved);
        }
        cm.switches.set_limits_enabled(true);
        cm.cycle_state = CycleState::Off;
        if cm.machine_state == MachineState::Cycle {
            cm.machine_state = MachineState::Ready;
        }
        self.phase = HomingPhase::Idle;
        tracing::info!("Homing cycle finished: {:?}", cm.homing_state);
    }
}
