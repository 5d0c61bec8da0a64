//! Command routing and execution

use crate::cli::args::Commands;
use crate::cli::commands::*;
use anyhow::Result;
use std::path::Path;

/// Execute a CLI command based on the parsed arguments
pub async fn execute_command(command: Commands, config_file: Option<&Path>) -> Result<()> {
    match command {
        Commands::Map(args) => run_map_command(args, config_file).await,
        Commands::Options { json } => run_options_command(config_file, json).await,
    }
}
