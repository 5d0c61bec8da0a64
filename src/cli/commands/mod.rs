//! Command implementations for the CLI

pub mod map;
pub mod options;

pub use map::run_map_command;
pub use options::run_options_command;
