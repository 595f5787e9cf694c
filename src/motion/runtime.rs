// src/motion/runtime.rs - Exec stage: planned blocks to timed segments
//! The runtime walks the block under the run cursor and cuts each of its
//! sections (head, body, tail) into segments of at most the nominal
//! segment time. Ramps follow a constant-jerk S-curve; the body is linear.
//!
//! Step counts are derived from absolute step targets so rounding never
//! accumulates, and the final segment of a block lands exactly on the
//! block target.

use std::collections::VecDeque;

use crate::config::RuntimeConfig;
use crate::machine::gstate::{GState, Units};
use crate::motion::buffer::{BlockKind, MoveBlock, MoveBufferPool, SyncCommand};
use crate::motion::{AXES, AxisVector, EPSILON, MM_PER_INCH, usec_to_minutes};

/// One execution window handed from Exec to Load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Monotonic across the runtime's lifetime.
    pub seq: u64,
    /// Duration in pulse-generator ticks; sets the step rate.
    pub ticks: u32,
    pub steps: [i64; AXES],
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuntimeEvent {
    /// Velocities are the ones the block was executed with.
    BlockCompleted { line: u32, sequence: u64, entry_velocity: f64, exit_velocity: f64 },
    ProgramStop { line: u32 },
    ProgramEnd { line: u32 },
    Marker(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Off,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SectionKind {
    Ramp { v0: f64, v1: f64 },
    Cruise { velocity: f64 },
    Dwell,
}

#[derive(Debug, Clone, Copy)]
struct Section {
    kind: SectionKind,
    /// Path distance at the start of the section.
    start: f64,
    length: f64,
    time: f64,
    segments: u32,
    index: u32,
}

impl Section {
    fn new(kind: SectionKind, start: f64, length: f64, time: f64, nominal: f64) -> Self {
        let segments = (time / nominal).ceil().max(1.0) as u32;
        Self { kind, start, length, time, segments, index: 0 }
    }

    fn segment_time(&self) -> f64 {
        self.time / self.segments as f64
    }

    /// Distance travelled `t` minutes into the section.
    fn distance_at(&self, t: f64) -> f64 {
        match self.kind {
            SectionKind::Dwell => 0.0,
            SectionKind::Cruise { velocity } => (velocity * t).min(self.length),
            SectionKind::Ramp { v0, v1 } => {
                let total = self.time;
                let jerk = 4.0 * (v1 - v0) / (total * total);
                if t <= total / 2.0 {
                    v0 * t + jerk * t.powi(3) / 6.0
                } else {
                    let tau = total - t;
                    self.length - (v1 * tau - jerk * tau.powi(3) / 6.0)
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct MoveRuntime {
    move_state: MoveState,
    gm: GState,
    block_sequence: u64,
    entry_velocity: f64,
    exit_velocity: f64,
    start: AxisVector,
    unit: AxisVector,
    target: AxisVector,
    sections: VecDeque<Section>,
    position: AxisVector,
    step_position: [i64; AXES],
    steps_per_unit: [f64; AXES],
    nominal_segment_time: f64,
    dda_frequency_hz: f64,
    next_seq: u64,
    events: VecDeque<RuntimeEvent>,
}

impl MoveRuntime {
    pub fn new(config: &RuntimeConfig, steps_per_unit: [f64; AXES]) -> Self {
        Self {
            move_state: MoveState::Off,
            gm: GState::default(),
            block_sequence: 0,
            entry_velocity: 0.0,
            exit_velocity: 0.0,
            start: [0.0; AXES],
            unit: [0.0; AXES],
            target: [0.0; AXES],
            sections: VecDeque::with_capacity(3),
            position: [0.0; AXES],
            step_position: [0; AXES],
            steps_per_unit,
            nominal_segment_time: usec_to_minutes(config.nominal_segment_time_us),
            dda_frequency_hz: config.dda_frequency_hz,
            next_seq: 0,
            events: VecDeque::new(),
        }
    }

    pub fn move_state(&self) -> MoveState {
        self.move_state
    }

    pub fn is_running(&self) -> bool {
        self.move_state == MoveState::Run
    }

    pub fn position(&self) -> &AxisVector {
        &self.position
    }

    pub fn step_position(&self) -> &[i64; AXES] {
        &self.step_position
    }

    pub fn set_position(&mut self, axis: usize, position: f64) {
        self.position[axis] = position;
        self.step_position[axis] = (position * self.steps_per_unit[axis]).round() as i64;
    }

    /// Position in the work coordinates and units of the running block.
    pub fn work_position(&self, axis: usize) -> f64 {
        let position = self.position[axis] - self.gm.work_offset[axis];
        match self.gm.units {
            Units::Inches => position / MM_PER_INCH,
            Units::Millimeters => position,
        }
    }

    pub fn take_events(&mut self) -> Vec<RuntimeEvent> {
        self.events.drain(..).collect()
    }

    /// Abandon the current block after a hard stop. `unemitted` are the steps
    /// prepared but never pulsed; the position falls back by that much.
    pub fn abort(&mut self, unemitted: &[i64; AXES]) {
        self.move_state = MoveState::Off;
        self.sections.clear();
        for axis in 0..AXES {
            self.step_position[axis] -= unemitted[axis];
            self.position[axis] = self.step_position[axis] as f64 / self.steps_per_unit[axis];
        }
    }

    /// Produce the next segment, starting the block under the run cursor
    /// if nothing is running. `None` means there is nothing to execute.
    pub fn exec_move(&mut self, pool: &mut MoveBufferPool) -> Option<Segment> {
        loop {
            if self.move_state == MoveState::Off {
                let id = pool.run_buffer()?;
                let block = pool.get_mut(id);
                block.replanned = false;
                let block = block.clone();
                match block.kind {
                    BlockKind::Command(command) => {
                        self.events.push_back(match command {
                            SyncCommand::ProgramStop => RuntimeEvent::ProgramStop { line: block.gm.linenum },
                            SyncCommand::ProgramEnd => RuntimeEvent::ProgramEnd { line: block.gm.linenum },
                            SyncCommand::Marker(tag) => RuntimeEvent::Marker(tag),
                        });
                        pool.release_run_buffer();
                        continue;
                    }
                    BlockKind::Dwell { minutes } => self.start_dwell(&block, minutes),
                    BlockKind::Line => self.start_line(&block),
                }
                if self.sections.is_empty() {
                    self.finish_block(pool);
                    continue;
                }
                self.move_state = MoveState::Run;
            }
            return Some(self.next_segment(pool));
        }
    }

    fn start_block(&mut self, block: &MoveBlock) {
        self.gm = block.gm;
        self.block_sequence = block.sequence;
        self.entry_velocity = block.entry_velocity;
        self.exit_velocity = block.exit_velocity;
        self.start = self.position;
        self.unit = block.unit;
        self.target = block.gm.target;
        self.sections.clear();
    }

    fn start_dwell(&mut self, block: &MoveBlock, minutes: f64) {
        self.start_block(block);
        self.target = self.position;
        if minutes > 0.0 {
            self.sections.push_back(Section::new(SectionKind::Dwell, 0.0, 0.0, minutes, self.nominal_segment_time));
        }
    }

    fn start_line(&mut self, block: &MoveBlock) {
        self.start_block(block);
        let nominal = self.nominal_segment_time;
        let mut start = 0.0;
        if block.head_length > EPSILON {
            let (v0, v1) = (block.entry_velocity, block.cruise_velocity);
            let time = 2.0 * block.head_length / (v0 + v1).max(EPSILON);
            self.sections.push_back(Section::new(SectionKind::Ramp { v0, v1 }, start, block.head_length, time, nominal));
            start += block.head_length;
        }
        if block.body_length > EPSILON {
            let velocity = block.cruise_velocity.max(EPSILON);
            let time = block.body_length / velocity;
            self.sections.push_back(Section::new(SectionKind::Cruise { velocity }, start, block.body_length, time, nominal));
            start += block.body_length;
        }
        if block.tail_length > EPSILON {
            let (v0, v1) = (block.cruise_velocity, block.exit_velocity);
            let time = 2.0 * block.tail_length / (v0 + v1).max(EPSILON);
            self.sections.push_back(Section::new(SectionKind::Ramp { v0, v1 }, start, block.tail_length, time, nominal));
        }
        tracing::trace!(
            "Exec line {}: {} sections, {:.1} -> {:.1} -> {:.1}",
            block.gm.linenum,
            self.sections.len(),
            block.entry_velocity,
            block.cruise_velocity,
            block.exit_velocity
        );
    }

    fn next_segment(&mut self, pool: &mut MoveBufferPool) -> Segment {
        let (segment_time, distance, last_in_section) = match self.sections.front_mut() {
            Some(section) => {
                section.index += 1;
                let t = section.segment_time() * section.index as f64;
                let last = section.index >= section.segments;
                let distance = if last { section.start + section.length } else { section.start + section.distance_at(t) };
                (section.segment_time(), distance, last)
            }
            None => (0.0, 0.0, true),
        };
        let last_in_block = last_in_section && self.sections.len() <= 1;

        let position: AxisVector = if last_in_block {
            self.target
        } else {
            std::array::from_fn(|i| self.start[i] + self.unit[i] * distance)
        };

        let mut steps = [0i64; AXES];
        for axis in 0..AXES {
            let target_steps = (position[axis] * self.steps_per_unit[axis]).round() as i64;
            steps[axis] = target_steps - self.step_position[axis];
            self.step_position[axis] = target_steps;
        }
        self.position = position;

        let ticks = (segment_time * 60.0 * self.dda_frequency_hz).round().max(1.0) as u32;
        let segment = Segment { seq: self.next_seq, ticks, steps, line: self.gm.linenum };
        self.next_seq += 1;

        if last_in_section {
            self.sections.pop_front();
        }
        if last_in_block {
            self.finish_block(pool);
        }
        segment
    }

    fn finish_block(&mut self, pool: &mut MoveBufferPool) {
        self.sections.clear();
        self.move_state = MoveState::Off;
        pool.release_run_buffer();
        self.events.push_back(RuntimeEvent::BlockCompleted {
            line: self.gm.linenum,
            sequence: self.block_sequence,
            entry_velocity: self.entry_velocity,
            exit_velocity: self.exit_velocity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerConfig;
    use crate::machine::axis::AxisSettings;
    use crate::machine::gstate::MotionMode;
    use crate::motion::planner::Planner;

    fn axes() -> [AxisSettings; AXES] {
        std::array::from_fn(|_| AxisSettings::default())
    }

    fn feed(target: AxisVector, linenum: u32) -> GState {
        GState {
            target,
            feedrate: 1500.0,
            linenum,
            motion_mode: MotionMode::StraightFeed,
            ..GState::default()
        }
    }

    fn drain(runtime: &mut MoveRuntime, pool: &mut MoveBufferPool) -> Vec<Segment> {
        let mut segments = Vec::new();
        while let Some(segment) = runtime.exec_move(pool) {
            segments.push(segment);
        }
        segments
    }

    #[test]
    fn test_idle_runtime_returns_none() {
        let mut pool = MoveBufferPool::new(8);
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        assert!(runtime.exec_move(&mut pool).is_none());
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_line_steps_sum_to_target() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.plan_line(feed([10.0, -5.0, 0.0, 0.0], 1), &axes()).unwrap();
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        let segments = drain(&mut runtime, planner.pool_mut());
        assert!(segments.len() > 1);
        let total: [i64; AXES] = std::array::from_fn(|i| segments.iter().map(|s| s.steps[i]).sum());
        assert_eq!(total, [400, -200, 0, 0]);
        assert_eq!(runtime.position(), &[10.0, -5.0, 0.0, 0.0]);
        assert_eq!(planner.pool().available_count(), planner.pool().capacity());
    }

    #[test]
    fn test_segments_never_exceed_nominal_time() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.plan_line(feed([30.0, 0.0, 0.0, 0.0], 1), &axes()).unwrap();
        let config = RuntimeConfig::default();
        let max_ticks = (config.nominal_segment_time_us * config.dda_frequency_hz / 1e6).round() as u32;
        let mut runtime = MoveRuntime::new(&config, [40.0; AXES]);
        for segment in drain(&mut runtime, planner.pool_mut()) {
            assert!(segment.ticks >= 1 && segment.ticks <= max_ticks, "ticks {}", segment.ticks);
        }
    }

    #[test]
    fn test_steps_are_monotonic_within_a_line() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.plan_line(feed([25.0, 0.0, 0.0, 0.0], 1), &axes()).unwrap();
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        for segment in drain(&mut runtime, planner.pool_mut()) {
            assert!(segment.steps[0] >= 0);
        }
    }

    #[test]
    fn test_blocks_complete_in_submission_order() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.plan_line(feed([5.0, 0.0, 0.0, 0.0], 10), &axes()).unwrap();
        planner.queue_command(SyncCommand::Marker(42), GState::default()).unwrap();
        planner.plan_line(feed([5.0, 5.0, 0.0, 0.0], 20), &axes()).unwrap();
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        drain(&mut runtime, planner.pool_mut());
        let events = runtime.take_events();
        assert_eq!(
            events,
            vec![
                RuntimeEvent::BlockCompleted { line: 10, sequence: 0, entry_velocity: 0.0, exit_velocity: 0.0 },
                RuntimeEvent::Marker(42),
                RuntimeEvent::BlockCompleted { line: 20, sequence: 2, entry_velocity: 0.0, exit_velocity: 0.0 },
            ]
        );
    }

    #[test]
    fn test_dwell_emits_idle_segments() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.queue_dwell(0.1, GState::default()).unwrap();
        let config = RuntimeConfig::default();
        let mut runtime = MoveRuntime::new(&config, [40.0; AXES]);
        let segments = drain(&mut runtime, planner.pool_mut());
        let ticks: u32 = segments.iter().map(|s| s.ticks).sum();
        assert_eq!(ticks, (0.1 * config.dda_frequency_hz) as u32);
        assert!(segments.iter().all(|s| s.steps == [0; AXES]));
    }

    #[test]
    fn test_exec_freezes_running_block() {
        let mut planner = Planner::new(&PlannerConfig::default());
        planner.plan_line(feed([20.0, 0.0, 0.0, 0.0], 1), &axes()).unwrap();
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        runtime.exec_move(planner.pool_mut()).unwrap();
        let running = planner.pool().iter_live().next().unwrap();
        assert!(!running.replanned);
        assert!(runtime.is_running());
    }

    #[test]
    fn test_abort_rewinds_unemitted_steps() {
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        runtime.set_position(0, 10.0);
        runtime.abort(&[40, 0, 0, 0]);
        assert_eq!(runtime.step_position()[0], 360);
        assert!((runtime.position()[0] - 9.0).abs() < 1e-12);
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_work_position_applies_offset_and_units() {
        let mut planner = Planner::new(&PlannerConfig::default());
        let mut gm = feed([25.4, 0.0, 0.0, 0.0], 1);
        gm.work_offset = [12.7, 0.0, 0.0, 0.0];
        gm.units = Units::Inches;
        planner.plan_line(gm, &axes()).unwrap();
        let mut runtime = MoveRuntime::new(&RuntimeConfig::default(), [40.0; AXES]);
        drain(&mut runtime, planner.pool_mut());
        assert!((runtime.work_position(0) - 0.5).abs() < 1e-9);
    }
}
