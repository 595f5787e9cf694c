// src/machine/probing.rs - G38.2 straight probe cycle
use crate::hardware::SwitchState;
use crate::machine::canonical::{CanonicalMachine, SavedModal};
use crate::machine::gstate::{CoordSystem, DistanceMode, FeedRateMode};
use crate::machine::{CycleState, MachineError, MachineState, ProbeState, Status};
use crate::motion::{AXES, AxisVector, X_AXIS, Y_AXIS, Z_AXIS, fp_zero};

/// Shortest probe move accepted, in millimetres.
pub const MINIMUM_PROBE_TRAVEL: f64 = 0.254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbingPhase {
    #[default]
    Idle,
    Start,
    Finish,
    Finalize,
}

#[derive(Debug, Clone, Default)]
pub struct ProbingCycle {
    phase: ProbingPhase,
    /// Machine coordinates.
    target: AxisVector,
    saved: Option<SavedModal>,
    saved_jerk: Option<[f64; AXES]>,
    moving: bool,
}

impl ProbingCycle {
    /// Validate a probe request. The cycle itself starts once the queue drains.
    pub(crate) fn request(
        cm: &mut CanonicalMachine,
        values: &AxisVector,
        flags: &[bool; AXES],
    ) -> Result<Self, MachineError> {
        if cm.gm.feedrate_mode == FeedRateMode::InverseTime {
            return Err(MachineError::ProbeInverseTimeMode);
        }
        if fp_zero(cm.gm.feedrate) {
            return Err(MachineError::FeedrateNotSpecified);
        }
        if !(flags[X_AXIS] || flags[Y_AXIS] || flags[Z_AXIS]) {
            return Err(MachineError::ProbeAllAxesOmitted);
        }
        let target = cm.resolve_target(values, flags);
        cm.probe_results = [0.0; AXES];
        cm.probe_state = ProbeState::Waiting;
        tracing::debug!("Probe requested toward {:?}", target);
        Ok(Self { phase: ProbingPhase::Start, target, ..Self::default() })
    }

    pub fn phase(&self) -> ProbingPhase {
        self.phase
    }

    /// The probe move is in flight and must stop when the probe closes.
    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub(crate) fn step(&mut self, cm: &mut CanonicalMachine) -> Result<Status, MachineError> {
        let result = match self.phase {
            ProbingPhase::Idle => Ok((ProbingPhase::Idle, Status::Noop)),
            ProbingPhase::Start => self.start(cm),
            ProbingPhase::Finish => self.finish(cm),
            ProbingPhase::Finalize => {
                self.restore(cm);
                Ok((ProbingPhase::Idle, Status::Ok))
            }
        };
        match result {
            Ok((next, status)) => {
                self.phase = next;
                Ok(status)
            }
            Err(e) => {
                tracing::warn!("Probing aborted: {}", e);
                self.restore(cm);
                Err(e)
            }
        }
    }

    fn start(&mut self, cm: &mut CanonicalMachine) -> Result<(ProbingPhase, Status), MachineError> {
        cm.cycle_state = CycleState::Probe;
        cm.probe_state = ProbeState::Failed;

        let mut saved_jerk = [0.0; AXES];
        for (axis, jerk) in saved_jerk.iter_mut().enumerate() {
            *jerk = cm.get_axis_jerk(axis);
            let homing_jerk = cm.axis_settings(axis).homing_jerk;
            cm.set_axis_jerk(axis, homing_jerk);
        }
        self.saved_jerk = Some(saved_jerk);

        let travel: f64 = (0..AXES)
            .map(|axis| (self.target[axis] - cm.get_absolute_position(axis)).powi(2))
            .sum::<f64>()
            .sqrt();
        if travel < MINIMUM_PROBE_TRAVEL {
            return Err(MachineError::ProbeTravelTooSmall);
        }

        self.saved = Some(cm.save_modal());
        cm.select_distance_mode(DistanceMode::Absolute);
        cm.set_coord_system(CoordSystem::Absolute);

        cm.sample_switches();
        if cm.switches.probe() == SwitchState::Open {
            cm.feed_to(self.target)?;
            self.moving = true;
        }
        tracing::info!("Probing toward {:?}", self.target);
        Ok((ProbingPhase::Finish, Status::Again))
    }

    fn finish(&mut self, cm: &mut CanonicalMachine) -> Result<(ProbingPhase, Status), MachineError> {
        self.moving = false;
        cm.sample_switches();
        cm.probe_state = if cm.switches.probe() == SwitchState::Closed {
            ProbeState::Succeeded
        } else {
            ProbeState::Failed
        };
        let stopped = *cm.motion.runtime_position();
        for (axis, position) in stopped.into_iter().enumerate() {
            cm.set_position(axis, position);
            cm.probe_results[axis] = cm.get_absolute_position(axis);
        }
        tracing::info!("Probe {:?} at {:?}", cm.probe_state, cm.probe_results);
        Ok((ProbingPhase::Finalize, Status::Again))
    }

    fn restore(&mut self, cm: &mut CanonicalMachine) {
        self.moving = false;
        if let Err(e) = cm.motion.flush_queue() {
            tracing::warn!("Probe finalize could not flush: {}", e);
        }
        if let Some(jerks) = self.saved_jerk.take() {
            for (axis, jerk) in jerks.into_iter().enumerate() {
                cm.set_axis_jerk(axis, jerk);
            }
        }
        if let Some(saved) = self.saved.take() {
            cm.restore_modal(&saved);
        }
        if cm.probe_state == ProbeState::Waiting {
            cm.probe_state = ProbeState::Failed;
        }
        cm.cycle_state = CycleState::Off;
        if cm.machine_state == MachineState::Cycle {
            cm.machine_state = MachineState::Ready;
        }
        self.phase = ProbingPhase::Idle;
    }
}
