//! CLI argument structures

use crate::config::Mode;
use crate::dispatch::Simplify;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Map a command over input elements on a parallel backend
#[derive(Parser, Debug)]
#[command(name = "parmap")]
#[command(about = "parmap - map a command over inputs on local, multicore, cluster or queue backends", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to $PARMAP_CONFIG or the per-user file)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command once per input element and print the results as JSON
    Map(MapArgs),

    /// Print the effective mapping configuration
    Options {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct MapArgs {
    /// Backend: local, multicore, socket, mpi, legacy-queue or queue
    #[arg(short, long)]
    pub mode: Option<Mode>,

    /// Number of workers or job slots
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Socket cluster node (repeatable)
    #[arg(long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Parallelization level of this call; registered automatically
    #[arg(long)]
    pub level: Option<String>,

    /// Hand elements to idle workers dynamically
    #[arg(long)]
    pub load_balancing: bool,

    /// Keep one log file per element under the storage directory
    #[arg(long)]
    pub logging: bool,

    /// Directory for logs and queue registries
    #[arg(long, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    /// Value for failed elements instead of aborting; parsed as JSON when possible
    #[arg(long, value_name = "VALUE")]
    pub impute_error: Option<String>,

    /// Result shape: none, best or array
    #[arg(long, default_value = "none")]
    pub simplify: Simplify,

    /// Name results after the input elements
    #[arg(long)]
    pub use_names: bool,

    /// Do not print the informational message before mapping
    #[arg(short, long)]
    pub quiet: bool,

    /// Read elements from a file (one per line) instead of stdin
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Per-element time limit in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Command line to run, as one shell-quoted string
    #[arg(long, conflicts_with = "program")]
    pub command: Option<String>,

    /// Program and arguments; `{}` is replaced by the element, which is
    /// appended when no placeholder is present
    #[arg(last = true, value_name = "PROGRAM")]
    pub program: Vec<String>,
}
