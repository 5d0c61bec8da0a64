//! CLI command handlers
//!
//! Argument parsing structures, the command router and the command
//! implementations of the `parmap` binary.

pub mod args;
pub mod commands;
pub mod router;

pub use args::{Cli, Commands, MapArgs};
pub use router::execute_command;
