// src/controller.rs - Cooperative command loop
//! One [`Controller::step`] is one pass over the handler list. Handlers run
//! in priority order and the first one that does anything ends the pass:
//! limit switches, the homing cycle, the probing cycle, planner
//! backpressure, then dispatch of the next g-code line.
//!
//! The motion pipeline is not driven from here. The host ticks it between
//! passes, the way step interrupts would preempt the command loop.

use thiserror::Error;

use crate::config::MachineConfig;
use crate::gcode::interpreter::ProgramFlow;
use crate::gcode::{GCodeError, Interpreter};
use crate::machine::{CanonicalMachine, CycleState, MachineError, MachineState, ProbeState, Status};
use crate::motion::{AXES, MotionError};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Line {line}: {source}")]
    Program {
        line: u32,
        #[source]
        source: GCodeError,
    },
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("Program file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramState {
    #[default]
    Idle,
    Running,
    /// Waiting at an M0/M1 for [`Controller::resume`].
    Held,
    Finished,
    Failed,
    /// Stopped from outside before the program was done.
    Aborted,
}

type Handler = fn(&mut Controller) -> Status;

#[derive(Debug)]
pub struct Controller {
    cm: CanonicalMachine,
    interpreter: Interpreter,
    program: Vec<String>,
    cursor: usize,
    program_state: ProgramState,
    last_error: Option<ControllerError>,
    reserve: usize,
    ticks_per_pass: u32,
}

impl Controller {
    pub fn new(config: &MachineConfig, cm: CanonicalMachine) -> Self {
        Self {
            cm,
            interpreter: Interpreter::new(),
            program: Vec::new(),
            cursor: 0,
            program_state: ProgramState::Idle,
            last_error: None,
            reserve: config.planner.reserve,
            ticks_per_pass: config.runtime.ticks_per_pass,
        }
    }

    /// Controller over the simulated DDA and switches.
    pub fn simulated(config: &MachineConfig) -> Self {
        Self::new(config, CanonicalMachine::simulated(config))
    }

    pub fn machine(&self) -> &CanonicalMachine {
        &self.cm
    }

    pub fn machine_mut(&mut self) -> &mut CanonicalMachine {
        &mut self.cm
    }

    pub fn program_state(&self) -> ProgramState {
        self.program_state
    }

    pub fn last_error(&self) -> Option<&ControllerError> {
        self.last_error.as_ref()
    }

    /// Lines dispatched from the current program.
    pub fn lines_dispatched(&self) -> usize {
        self.cursor
    }

    pub fn ticks_per_pass(&self) -> u32 {
        self.ticks_per_pass
    }

    /// Replace the program and start dispatching it from the first line.
    pub fn load_program(&mut self, text: &str) -> usize {
        self.program = text.lines().map(str::to_string).collect();
        self.cursor = 0;
        self.last_error = None;
        self.program_state = ProgramState::Running;
        tracing::info!("Loaded program: {} lines", self.program.len());
        self.program.len()
    }

    /// Home every axis that has a homing switch.
    pub fn request_homing(&mut self) -> Result<(), ControllerError> {
        self.cm.cycle_homing_start(&[true; AXES])?;
        Ok(())
    }

    /// Continue after an M0/M1.
    pub fn resume(&mut self) {
        if self.program_state == ProgramState::Held {
            tracing::info!("Resuming program at line {}", self.cursor + 1);
            self.program_state = ProgramState::Running;
        }
        if self.cm.machine_state == MachineState::ProgramStop {
            self.cm.machine_state = MachineState::Ready;
        }
    }

    /// Stop all motion now and abandon the program. The machine stays in
    /// shutdown until its alarm is cleared.
    pub fn abort(&mut self) {
        self.cm.hard_alarm(&MachineError::Interrupted);
        tracing::info!("Program aborted after {} lines", self.cursor);
        self.program_state = ProgramState::Aborted;
    }

    /// Held at a program stop that the runtime has reached.
    pub fn is_stopped_at_hold(&self) -> bool {
        self.program_state == ProgramState::Held && !self.cm.motion().is_runtime_busy()
    }

    /// Nothing left to dispatch, no cycle running and the pipeline drained.
    pub fn is_idle(&self) -> bool {
        !matches!(self.program_state, ProgramState::Running | ProgramState::Held)
            && self.cm.cycle_state() == CycleState::Off
            && self.cm.probe_state() != ProbeState::Waiting
            && !self.cm.motion().is_runtime_busy()
    }

    /// Tick the pipeline for one pass worth of time, then run one pass.
    pub fn service(&mut self) -> Status {
        for _ in 0..self.ticks_per_pass {
            self.cm.tick();
        }
        self.step()
    }

    /// One pass over the handlers.
    pub fn step(&mut self) -> Status {
        const HANDLERS: [Handler; 5] = [
            Controller::limit_switch_handler,
            Controller::homing_handler,
            Controller::probe_handler,
            Controller::sync_to_planner,
            Controller::dispatch_command,
        ];
        self.cm.process_runtime_events();
        for handler in HANDLERS {
            let status = handler(self);
            if status != Status::Noop {
                return status;
            }
        }
        Status::Noop
    }

    fn fail(&mut self, error: ControllerError) {
        tracing::error!("Program stopped: {}", error);
        if matches!(self.program_state, ProgramState::Running | ProgramState::Held) {
            self.program_state = ProgramState::Failed;
        }
        self.last_error = Some(error);
    }

    fn limit_switch_handler(&mut self) -> Status {
        if self.cm.is_alarmed() {
            return Status::Noop;
        }
        let Some((axis, end)) = self.cm.switches().limit_thrown() else {
            return Status::Noop;
        };
        tracing::warn!("Limit switch on axis {} ({:?})", axis, end);
        self.cm.hard_alarm(&MachineError::LimitSwitchHit);
        self.fail(ControllerError::Machine(MachineError::LimitSwitchHit));
        Status::Ok
    }

    fn homing_handler(&mut self) -> Status {
        match self.cm.homing_callback() {
            Ok(status) => status,
            Err(e) => {
                self.fail(e.into());
                Status::Ok
            }
        }
    }

    fn probe_handler(&mut self) -> Status {
        match self.cm.probe_callback() {
            Ok(status) => status,
            Err(e) => {
                self.fail(e.into());
                Status::Ok
            }
        }
    }

    /// Hold off command dispatch until the pool has room for a whole command.
    fn sync_to_planner(&mut self) -> Status {
        if self.cm.motion().get_available_buffer_count() < self.reserve {
            return Status::Again;
        }
        Status::Noop
    }

    fn dispatch_command(&mut self) -> Status {
        if self.program_state != ProgramState::Running {
            return Status::Noop;
        }
        if self.cm.is_alarmed() {
            self.fail(ControllerError::Machine(MachineError::MachineAlarmed));
            return Status::Ok;
        }
        let Some(text) = self.program.get(self.cursor) else {
            tracing::info!("Program dispatched: {} lines", self.cursor);
            self.program_state = ProgramState::Finished;
            return Status::Noop;
        };
        let line = self.cursor as u32 + 1;
        match self.interpreter.execute_line(&mut self.cm, text, line) {
            Ok(block) => {
                self.cursor += 1;
                if block.program_flow == Some(ProgramFlow::Stop) {
                    self.program_state = ProgramState::Held;
                }
                Status::Ok
            }
            Err(source) => {
                // the cursor stays on the rejected line
                if let GCodeError::Machine(cause @ MachineError::Motion(MotionError::MoveTooShort { .. })) = &source {
                    self.cm.soft_alarm(cause);
                }
                self.fail(ControllerError::Program { line, source });
                Status::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_idle(controller: &mut Controller, max_passes: usize) -> bool {
        for _ in 0..max_passes {
            controller.service();
            if controller.is_idle() {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_program_runs_to_completion() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        controller.load_program("G21 G90\nG1 X10 Y10 F3000\nG0 X0 Y20\nM2\n");
        assert!(run_to_idle(&mut controller, 100_000));
        assert_eq!(controller.program_state(), ProgramState::Finished);
        assert_eq!(controller.lines_dispatched(), 4);
        let runtime = controller.machine().motion().runtime_position();
        assert!(runtime[0].abs() < 1e-9);
        assert!((runtime[1] - 20.0).abs() < 1e-9);
        assert_eq!(controller.machine().machine_state(), MachineState::ProgramEnd);
    }

    #[test]
    fn test_abort_stops_motion_and_program() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        controller.load_program("G1 X100 F1200\nG0 X0\n");
        for _ in 0..200 {
            controller.service();
        }
        assert!(controller.machine().motion().is_runtime_busy());
        controller.abort();

        assert_eq!(controller.program_state(), ProgramState::Aborted);
        assert!(controller.is_idle());
        let cm = controller.machine();
        assert_eq!(cm.machine_state(), MachineState::Shutdown);
        let stopped = cm.motion().runtime_position()[0];
        assert!(stopped > 0.0 && stopped < 100.0);
        assert_eq!(cm.get_absolute_position(0), stopped);

        // nothing else is dispatched once aborted
        let dispatched = controller.lines_dispatched();
        controller.service();
        assert_eq!(controller.lines_dispatched(), dispatched);
        assert!(controller.last_error().is_none());
    }

    #[test]
    fn test_rejected_line_stops_program() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        controller.load_program("G0 X5\nG2 X1 Y1 I1\nG0 X50\n");
        assert!(run_to_idle(&mut controller, 100_000));
        assert_eq!(controller.program_state(), ProgramState::Failed);
        assert_eq!(controller.lines_dispatched(), 1);
        match controller.last_error() {
            Some(ControllerError::Program { line, source: GCodeError::UnsupportedCommand(_) }) => {
                assert_eq!(*line, 2)
            }
            other => panic!("Expected unsupported command, got {:?}", other),
        }
        assert_eq!(controller.machine().get_absolute_position(0), 5.0);
    }

    #[test]
    fn test_too_short_move_alarms() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        controller.load_program("G1 X20 F4000\nX20.05\n");
        run_to_idle(&mut controller, 100_000);
        assert_eq!(controller.program_state(), ProgramState::Failed);
        assert_eq!(controller.machine().machine_state(), MachineState::Alarm);
        assert_eq!(controller.lines_dispatched(), 1);
    }

    #[test]
    fn test_program_stop_holds_dispatch() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        controller.load_program("G0 X5\nM0\nG0 X10\n");
        for _ in 0..100_000 {
            controller.service();
            if controller.is_stopped_at_hold() {
                break;
            }
        }
        assert!(controller.is_stopped_at_hold());
        assert_eq!(controller.machine().machine_state(), MachineState::ProgramStop);
        assert_eq!(controller.machine().get_absolute_position(0), 5.0);
        controller.resume();
        assert!(run_to_idle(&mut controller, 100_000));
        assert_eq!(controller.machine().get_absolute_position(0), 10.0);
    }

    #[test]
    fn test_backpressure_keeps_reserve() {
        let config = MachineConfig::default();
        let mut controller = Controller::simulated(&config);
        let program: String = (1..=60).map(|i| format!("G1 X{} F2000\n", i * 2)).collect();
        controller.load_program(&program);
        for _ in 0..200 {
            controller.step();
            assert!(controller.machine().motion().get_available_buffer_count() >= 1);
        }
        assert_eq!(controller.step(), Status::Again);
        assert!(controller.lines_dispatched() < 60);
    }

    #[test]
    fn test_limit_switch_shuts_down() {
        let mut config = MachineConfig::default();
        config.limits.soft_limits = false;
        let mut controller = Controller::simulated(&config);
        // physical origin is 100, the min switch trips at -5
        controller.load_program("G1 X-120 F3000\n");
        run_to_idle(&mut controller, 200_000);
        assert_eq!(controller.machine().machine_state(), MachineState::Shutdown);
        assert!(matches!(
            controller.last_error(),
            Some(ControllerError::Machine(MachineError::LimitSwitchHit))
        ));
        let stopped = controller.machine().get_absolute_position(0);
        assert!(stopped > -120.0 && stopped < -100.0);
    }
}
