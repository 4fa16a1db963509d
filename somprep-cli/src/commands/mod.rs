//! Commands module
//!
//! Defines all CLI commands, their handlers, and the mapping from failures
//! to process exit codes.

mod filter;
mod plan;
mod run;

pub use filter::FilterArgs;
pub use run::RunArgs;

use anyhow::Result;
use clap::Subcommand;
use somprep_core::{FailureKind, FilterError, PlanningError};

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Plan and execute the preprocessing pipeline
    Run(RunArgs),
    /// Print the plan for a configuration without executing it
    Plan {
        #[command(flatten)]
        args: RunArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove somatic-origin SNP and cancer-database hits from a call set
    Filter(FilterArgs),
}

/// Handle a CLI command
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run::handle_run(args).await,
        Commands::Plan { args, json } => plan::handle_plan(args, json),
        Commands::Filter(args) => filter::handle_filter(args).await,
    }
}

/// A run that was executed but did not succeed
#[derive(Debug)]
pub struct ExecutionFailed {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for ExecutionFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Run failed ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ExecutionFailed {}

/// Exit code for an error returned by a command handler
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<PlanningError>().is_some() {
        2
    } else if err.downcast_ref::<ExecutionFailed>().is_some() {
        3
    } else if err.downcast_ref::<FilterError>().is_some() {
        4
    } else {
        1
    }
}
