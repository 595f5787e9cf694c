// src/motion/controller.rs - Motion controller: planner plus Exec/Load/DDA pipeline
//! [`MotionController`] is the whole surface the canonical machine and the
//! cycles see: queue moves, query buffer space and busy state, read and set
//! positions, flush and hard stop.
//!
//! The pipeline side is driven by [`MotionController::tick`], one pulse
//! generator tick per call. Within a tick the armed stages are serviced
//! highest priority first (Pulse, Load, Exec), each running to completion.

use crate::config::MachineConfig;
use crate::hardware::PulseGenerator;
use crate::machine::axis::AxisSettings;
use crate::machine::gstate::GState;
use crate::motion::buffer::{BlockId, MoveBufferPool, SyncCommand};
use crate::motion::loader::{HandoffStats, SlotOwner, StagingSlot};
use crate::motion::planner::Planner;
use crate::motion::runtime::{MoveRuntime, RuntimeEvent};
use crate::motion::{AXES, AxisVector, MotionError, Planned};
use crate::scheduler::{SimClock, Stage, TimerBank};

pub struct MotionController {
    planner: Planner,
    runtime: MoveRuntime,
    slot: StagingSlot,
    pulse: Box<dyn PulseGenerator>,
    timers: TimerBank,
    clock: SimClock,
}

impl std::fmt::Debug for MotionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionController")
            .field("planner", &self.planner)
            .field("runtime", &self.runtime)
            .field("slot", &self.slot)
            .field("timers", &self.timers)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl MotionController {
    pub fn new(config: &MachineConfig, steps_per_unit: [f64; AXES], pulse: Box<dyn PulseGenerator>) -> Self {
        tracing::info!(
            "Motion controller: {} block pool, {} Hz DDA, {} us segments",
            config.planner.pool_size,
            config.runtime.dda_frequency_hz,
            config.runtime.nominal_segment_time_us
        );
        Self {
            planner: Planner::new(&config.planner),
            runtime: MoveRuntime::new(&config.runtime, steps_per_unit),
            slot: StagingSlot::new(),
            pulse,
            timers: TimerBank::new(),
            clock: SimClock::new(config.runtime.dda_frequency_hz),
        }
    }

    // Planning side

    pub fn plan_line(&mut self, gm: GState, axes: &[AxisSettings; AXES]) -> Result<Planned, MotionError> {
        let planned = self.planner.plan_line(gm, axes)?;
        if let Planned::Queued(_) = planned {
            self.request_exec();
        }
        Ok(planned)
    }

    pub fn queue_dwell(&mut self, seconds: f64, gm: GState) -> Result<BlockId, MotionError> {
        let id = self.planner.queue_dwell(seconds, gm)?;
        self.request_exec();
        Ok(id)
    }

    pub fn queue_command(&mut self, command: SyncCommand, gm: GState) -> Result<BlockId, MotionError> {
        let id = self.planner.queue_command(command, gm)?;
        self.request_exec();
        Ok(id)
    }

    pub fn get_available_buffer_count(&self) -> usize {
        self.planner.pool().available_count()
    }

    pub fn pool(&self) -> &MoveBufferPool {
        self.planner.pool()
    }

    /// True while anything is queued, executing, staged or pulsing.
    pub fn is_runtime_busy(&self) -> bool {
        self.is_executing() || self.planner.pool().queued_count() > 0 || self.planner.pool().is_run_active()
    }

    /// True while a block or segment is in flight past the planner.
    pub fn is_executing(&self) -> bool {
        self.pulse.is_busy() || self.runtime.is_running() || self.slot.staged().is_some()
    }

    /// Drop queued moves. Only legal while nothing is in flight.
    pub fn flush_queue(&mut self) -> Result<usize, MotionError> {
        if self.is_executing() {
            return Err(MotionError::RuntimeBusy);
        }
        let dropped = self.planner.pool_mut().flush();
        self.sync_planner_to_runtime();
        if dropped > 0 {
            tracing::debug!("Flushed {} queued blocks", dropped);
        }
        Ok(dropped)
    }

    /// Runtime position of `axis` in the running block's work coordinates and units.
    pub fn get_runtime_position(&self, axis: usize) -> f32 {
        self.runtime.work_position(axis) as f32
    }

    /// Runtime position in absolute machine millimetres.
    pub fn runtime_position(&self) -> &AxisVector {
        self.runtime.position()
    }

    pub fn planner_position(&self) -> &AxisVector {
        self.planner.position()
    }

    pub fn set_planner_position(&mut self, axis: usize, position: f64) {
        self.planner.set_position(axis, position);
    }

    pub fn set_runtime_position(&mut self, axis: usize, position: f64) {
        self.runtime.set_position(axis, position);
    }

    pub fn take_events(&mut self) -> Vec<RuntimeEvent> {
        self.runtime.take_events()
    }

    pub fn encoder_position(&self) -> [i64; AXES] {
        self.pulse.encoder_position()
    }

    pub fn slot_owner(&self) -> SlotOwner {
        self.slot.owner()
    }

    pub fn handoff_stats(&self) -> HandoffStats {
        self.slot.stats()
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Stop everything now. The generator halts first so no further pulses
    /// go out; queued blocks are released without completion events and
    /// positions fall back to what was actually emitted.
    pub fn hard_stop(&mut self) {
        let mut unemitted = self.pulse.halt();
        if let Some(staged) = self.slot.reset() {
            for (axis, steps) in unemitted.iter_mut().enumerate() {
                *steps += staged.steps[axis];
            }
        }
        self.timers.clear();
        self.runtime.abort(&unemitted);
        self.planner.pool_mut().release_all();
        self.sync_planner_to_runtime();
        tracing::debug!("Hard stop at {:?}", self.runtime.position());
    }

    fn sync_planner_to_runtime(&mut self) {
        let position = *self.runtime.position();
        for (axis, value) in position.into_iter().enumerate() {
            self.planner.set_position(axis, value);
        }
    }

    // Pipeline side

    pub fn request_exec(&mut self) {
        self.timers.arm(Stage::Exec);
    }

    pub fn request_load(&mut self) {
        self.timers.arm(Stage::Load);
    }

    /// Advance simulated time by one tick, servicing armed stages in
    /// priority order.
    pub fn tick(&mut self) {
        self.clock.advance();
        for stage in Stage::BY_PRIORITY {
            if !self.timers.acknowledge(stage) {
                continue;
            }
            let result = match stage {
                Stage::Pulse => {
                    self.fire_pulse();
                    Ok(true)
                }
                Stage::Load => self.fire_load(),
                Stage::Exec => self.fire_exec(),
            };
            if let Err(e) = result {
                tracing::trace!("{:?} deferred: {}", stage, e);
            }
        }
    }

    /// Tick until the pipeline drains or `max_ticks` elapse. Returns true if it drained.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if !self.is_runtime_busy() {
                return true;
            }
            self.tick();
        }
        !self.is_runtime_busy()
    }

    /// Exec stage: prepare the next segment into the staging slot.
    /// `Ok(false)` means nothing was pending.
    pub fn fire_exec(&mut self) -> Result<bool, MotionError> {
        if !self.slot.claim_for_exec() {
            return Err(MotionError::RuntimeBusy);
        }
        match self.runtime.exec_move(self.planner.pool_mut()) {
            Some(segment) => {
                self.slot.stage(segment)?;
                self.request_load();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load stage: program the staged segment into an idle generator and
    /// ask Exec for the next one. `Ok(false)` means nothing was staged.
    pub fn fire_load(&mut self) -> Result<bool, MotionError> {
        if self.pulse.is_busy() {
            self.slot.defer_load();
            return Err(MotionError::RuntimeBusy);
        }
        let Some(segment) = self.slot.take() else {
            return Ok(false);
        };
        if let Err(e) = self.pulse.program_segment(&segment) {
            self.slot.restore(segment);
            return Err(e);
        }
        self.timers.arm(Stage::Pulse);
        self.slot.release_to_exec();
        self.request_exec();
        Ok(true)
    }

    /// Pulse stage: one generator tick. Completion requests the next load.
    pub fn fire_pulse(&mut self) {
        let completed = self.pulse.tick();
        if self.pulse.is_busy() {
            self.timers.arm(Stage::Pulse);
        }
        if completed {
            self.request_load();
        }
    }
}
