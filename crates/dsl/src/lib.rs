//! Command compiler: turns structured or textual automation scripts into a
//! validated, typed command sequence.

pub mod command;
pub mod text;

pub use command::{command_from_parts, commands_to_wire, compile_from_structured, Command};
pub use text::compile_from_text;
