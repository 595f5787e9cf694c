// src/gcode/mod.rs
pub mod interpreter;
pub mod parser;

pub use interpreter::{GCodeBlock, Interpreter};
pub use parser::{GCodeCommand, GCodeParser, GCodeParserConfig, GCodeSpan};

use crate::machine::MachineError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GCodeError {
    #[error("Parse error on line {line}: {message}")]
    Parse { line: u32, message: String },
    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),
    #[error("Modal group conflict: {0}")]
    ModalConflict(String),
    #[error(transparent)]
    Machine(#[from] MachineError),
}
