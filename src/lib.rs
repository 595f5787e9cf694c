//! Jerk-limited motion control for a four-axis machine: a lookahead
//! velocity planner over a ring of move buffers, an Exec -> Load -> DDA
//! pipeline, and the canonical machine, cycles and g-code interpreter that
//! feed it.

pub mod config;
pub mod controller;
pub mod gcode;
pub mod hardware;
pub mod host;
pub mod machine;
pub mod motion;
pub mod scheduler;
