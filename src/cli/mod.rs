//! Command-line interface for crabload.
//!
//! Provides the `master` and `worker` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, MasterArgs, WorkerArgs};
