// src/gcode/interpreter.rs - Block assembly and modal execution
//! Turns one line of g-code into a [`GCodeBlock`] and applies it to the
//! canonical machine in modal-group order: feed mode, feed, units, plane,
//! path control, distance, coordinate system, the G10/G92 family and the
//! cycles, motion, then program flow.

use crate::gcode::GCodeError;
use crate::gcode::parser::parse_words;
use crate::machine::{CanonicalMachine, MachineError};
use crate::machine::gstate::{
    CoordSystem, DistanceMode, FeedRateMode, MotionMode, PathControl, Plane, Units,
};
use crate::motion::{A_AXIS, AXES, AxisVector, X_AXIS, Y_AXIS, Z_AXIS};

/// Non-modal group 0 actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// G4
    Dwell,
    /// G10 L2
    SetCoordData,
    /// G28.2
    Home,
    /// G38.2
    Probe,
    /// G92
    SetOriginOffsets,
    /// G92.1
    ResetOriginOffsets,
    /// G92.2
    SuspendOriginOffsets,
    /// G92.3
    ResumeOriginOffsets,
}

impl NextAction {
    /// Actions that take the block's axis words for themselves.
    fn consumes_axis_words(self) -> bool {
        matches!(
            self,
            NextAction::SetCoordData | NextAction::Home | NextAction::Probe | NextAction::SetOriginOffsets
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFlow {
    /// M0, M1
    Stop,
    /// M2, M30
    End,
}

/// Everything one line asked for, before any of it is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GCodeBlock {
    pub line_number: Option<u32>,
    pub feedrate_mode: Option<FeedRateMode>,
    pub feedrate: Option<f64>,
    pub units: Option<Units>,
    pub plane: Option<Plane>,
    pub path_control: Option<PathControl>,
    pub distance_mode: Option<DistanceMode>,
    pub coord_system: Option<CoordSystem>,
    pub absolute_override: bool,
    pub next_action: Option<NextAction>,
    pub motion_mode: Option<MotionMode>,
    pub program_flow: Option<ProgramFlow>,
    pub values: AxisVector,
    pub flags: [bool; AXES],
    pub p: Option<f64>,
    pub l: Option<f64>,
}

fn set_group<T>(slot: &mut Option<T>, value: T, word: &str, group: &str) -> Result<(), GCodeError> {
    if slot.is_some() {
        return Err(GCodeError::ModalConflict(format!("{word} repeats the {group} group")));
    }
    *slot = Some(value);
    Ok(())
}

fn set_word(slot: &mut Option<f64>, value: f64, letter: char, line: u32) -> Result<(), GCodeError> {
    if slot.is_some() {
        return Err(GCodeError::Parse { line, message: format!("{letter} word repeated") });
    }
    *slot = Some(value);
    Ok(())
}

fn axis_of(letter: char) -> Option<usize> {
    match letter {
        'X' => Some(X_AXIS),
        'Y' => Some(Y_AXIS),
        'Z' => Some(Z_AXIS),
        'A' => Some(A_AXIS),
        _ => None,
    }
}

impl GCodeBlock {
    /// Assemble a block from one source line. `line` is used for error
    /// reports and as the line number when the block has no `N` word.
    pub fn parse(text: &str, line: u32) -> Result<Self, GCodeError> {
        let words = parse_words(text).map_err(|e| GCodeError::Parse {
            line,
            message: format!("{} at column {}", e.message, e.span.range.start + 1),
        })?;
        let mut block = GCodeBlock::default();
        for (letter, value) in words {
            if let Some(axis) = axis_of(letter) {
                if block.flags[axis] {
                    return Err(GCodeError::Parse { line, message: format!("{letter} word repeated") });
                }
                block.values[axis] = value;
                block.flags[axis] = true;
                continue;
            }
            match letter {
                'G' => block.apply_g(value)?,
                'M' => block.apply_m(value)?,
                'N' => {
                    if value < 0.0 || value.fract() != 0.0 {
                        return Err(GCodeError::Parse { line, message: format!("bad line number N{value}") });
                    }
                    block.line_number = Some(value as u32);
                }
                'F' => set_word(&mut block.feedrate, value, letter, line)?,
                'P' => set_word(&mut block.p, value, letter, line)?,
                'L' => set_word(&mut block.l, value, letter, line)?,
                // no spindle or tool changer
                'S' | 'T' => {}
                _ => return Err(GCodeError::UnsupportedCommand(format!("{letter}{value}"))),
            }
        }
        if let (Some(action), Some(motion)) = (block.next_action, block.motion_mode) {
            if action.consumes_axis_words() && motion != MotionMode::CancelMotionMode {
                return Err(GCodeError::ModalConflict(format!(
                    "{action:?} and {motion:?} both use the axis words"
                )));
            }
        }
        Ok(block)
    }

    fn apply_g(&mut self, value: f64) -> Result<(), GCodeError> {
        let word = format!("G{value}");
        let code = (value * 10.0).round() as i64;
        match code {
            0 => set_group(&mut self.motion_mode, MotionMode::StraightTraverse, &word, "motion"),
            10 => set_group(&mut self.motion_mode, MotionMode::StraightFeed, &word, "motion"),
            800 => set_group(&mut self.motion_mode, MotionMode::CancelMotionMode, &word, "motion"),
            40 => set_group(&mut self.next_action, NextAction::Dwell, &word, "non-modal"),
            100 => set_group(&mut self.next_action, NextAction::SetCoordData, &word, "non-modal"),
            282 => set_group(&mut self.next_action, NextAction::Home, &word, "non-modal"),
            382 => set_group(&mut self.next_action, NextAction::Probe, &word, "non-modal"),
            920 => set_group(&mut self.next_action, NextAction::SetOriginOffsets, &word, "non-modal"),
            921 => set_group(&mut self.next_action, NextAction::ResetOriginOffsets, &word, "non-modal"),
            922 => set_group(&mut self.next_action, NextAction::SuspendOriginOffsets, &word, "non-modal"),
            923 => set_group(&mut self.next_action, NextAction::ResumeOriginOffsets, &word, "non-modal"),
            170 => set_group(&mut self.plane, Plane::Xy, &word, "plane"),
            180 => set_group(&mut self.plane, Plane::Xz, &word, "plane"),
            190 => set_group(&mut self.plane, Plane::Yz, &word, "plane"),
            200 => set_group(&mut self.units, Units::Inches, &word, "units"),
            210 => set_group(&mut self.units, Units::Millimeters, &word, "units"),
            530 => {
                self.absolute_override = true;
                Ok(())
            }
            540 => set_group(&mut self.coord_system, CoordSystem::G54, &word, "coordinate system"),
            550 => set_group(&mut self.coord_system, CoordSystem::G55, &word, "coordinate system"),
            560 => set_group(&mut self.coord_system, CoordSystem::G56, &word, "coordinate system"),
            570 => set_group(&mut self.coord_system, CoordSystem::G57, &word, "coordinate system"),
            580 => set_group(&mut self.coord_system, CoordSystem::G58, &word, "coordinate system"),
            590 => set_group(&mut self.coord_system, CoordSystem::G59, &word, "coordinate system"),
            610 => set_group(&mut self.path_control, PathControl::ExactPath, &word, "path control"),
            611 => set_group(&mut self.path_control, PathControl::ExactStop, &word, "path control"),
            640 => set_group(&mut self.path_control, PathControl::Continuous, &word, "path control"),
            900 => set_group(&mut self.distance_mode, DistanceMode::Absolute, &word, "distance"),
            910 => set_group(&mut self.distance_mode, DistanceMode::Incremental, &word, "distance"),
            930 => set_group(&mut self.feedrate_mode, FeedRateMode::InverseTime, &word, "feed rate mode"),
            940 => set_group(&mut self.feedrate_mode, FeedRateMode::UnitsPerMinute, &word, "feed rate mode"),
            _ => Err(GCodeError::UnsupportedCommand(word)),
        }
    }

    fn apply_m(&mut self, value: f64) -> Result<(), GCodeError> {
        let word = format!("M{value}");
        match (value * 10.0).round() as i64 {
            0 | 10 => set_group(&mut self.program_flow, ProgramFlow::Stop, &word, "program flow"),
            20 | 300 => set_group(&mut self.program_flow, ProgramFlow::End, &word, "program flow"),
            // spindle and coolant
            30..=90 => Ok(()),
            _ => Err(GCodeError::UnsupportedCommand(word)),
        }
    }

    fn has_axis_words(&self) -> bool {
        self.flags.iter().any(|f| *f)
    }
}

/// Applies blocks to a canonical machine.
#[derive(Debug, Default)]
pub struct Interpreter {
    blocks_executed: u64,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks_executed(&self) -> u64 {
        self.blocks_executed
    }

    /// Parse and execute one source line.
    pub fn execute_line(
        &mut self,
        cm: &mut CanonicalMachine,
        text: &str,
        line: u32,
    ) -> Result<GCodeBlock, GCodeError> {
        let block = GCodeBlock::parse(text, line)?;
        tracing::trace!("Line {}: {:?}", line, block);
        self.execute_block(cm, &block, line)?;
        Ok(block)
    }

    pub fn execute_block(
        &mut self,
        cm: &mut CanonicalMachine,
        block: &GCodeBlock,
        line: u32,
    ) -> Result<(), GCodeError> {
        cm.set_model_linenum(block.line_number.unwrap_or(line));
        if let Some(mode) = block.feedrate_mode {
            cm.set_feed_rate_mode(mode);
        }
        if let Some(feedrate) = block.feedrate {
            cm.set_feed_rate(feedrate)?;
        }
        if let Some(units) = block.units {
            cm.select_units(units);
        }
        if let Some(plane) = block.plane {
            cm.select_plane(plane);
        }
        if let Some(path_control) = block.path_control {
            cm.select_path_control(path_control);
        }
        if let Some(mode) = block.distance_mode {
            cm.select_distance_mode(mode);
        }
        if let Some(coord_system) = block.coord_system {
            cm.set_coord_system(coord_system);
        }

        // G53 lasts for this block only
        cm.set_absolute_override(block.absolute_override);
        let result = self.execute_actions(cm, block);
        cm.set_absolute_override(false);
        result?;

        match block.program_flow {
            Some(ProgramFlow::Stop) => cm.program_stop()?,
            Some(ProgramFlow::End) => cm.program_end()?,
            None => {}
        }
        self.blocks_executed += 1;
        Ok(())
    }

    fn execute_actions(&mut self, cm: &mut CanonicalMachine, block: &GCodeBlock) -> Result<(), GCodeError> {
        match block.next_action {
            Some(NextAction::Dwell) => {
                let seconds = block.p.ok_or_else(|| GCodeError::Parse {
                    line: cm.gm().linenum,
                    message: "G4 requires a P word".to_string(),
                })?;
                cm.dwell(seconds)?;
            }
            Some(NextAction::SetCoordData) => {
                if block.l != Some(2.0) {
                    let l = block.l.map_or_else(|| "without L".to_string(), |l| format!("L{l}"));
                    return Err(GCodeError::UnsupportedCommand(format!("G10 {l}")));
                }
                let coord_system = block
                    .p
                    .filter(|p| p.fract() == 0.0 && *p >= 0.0)
                    .and_then(|p| CoordSystem::from_p_word(p as u32))
                    .ok_or_else(|| MachineError::InputValueOutOfRange(format!("G10 P{:?}", block.p)))?;
                cm.set_coord_offsets(coord_system, &block.values, &block.flags)?;
            }
            Some(NextAction::Home) => cm.cycle_homing_start(&block.flags)?,
            Some(NextAction::Probe) => cm.straight_probe(&block.values, &block.flags)?,
            Some(NextAction::SetOriginOffsets) => cm.set_origin_offsets(&block.values, &block.flags),
            Some(NextAction::ResetOriginOffsets) => cm.reset_origin_offsets(),
            Some(NextAction::SuspendOriginOffsets) => cm.suspend_origin_offsets(),
            Some(NextAction::ResumeOriginOffsets) => cm.resume_origin_offsets(),
            None => {}
        }

        if let Some(mode) = block.motion_mode {
            cm.set_motion_mode(mode);
        }
        let axis_words_taken = block.next_action.is_some_and(NextAction::consumes_axis_words);
        if !block.has_axis_words() || axis_words_taken {
            return Ok(());
        }
        let planned = match cm.gm().motion_mode {
            MotionMode::StraightTraverse => cm.straight_traverse(&block.values, &block.flags)?,
            MotionMode::StraightFeed => cm.straight_feed(&block.values, &block.flags)?,
            MotionMode::CancelMotionMode => {
                return Err(GCodeError::ModalConflict("axis words with no active motion mode".to_string()));
            }
        };
        tracing::trace!("Motion {:?}", planned);
        Ok(())
    }
}
