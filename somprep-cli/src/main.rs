//! Somprep CLI
//!
//! Command-line front end for the somatic preprocessing pipeline: plans and
//! executes the alignment refinement stages and filters call sets.
//!
//! Exit codes: 0 success, 2 planning failure, 3 execution failure,
//! 4 filter failure, 1 anything else.

mod commands;

use clap::Parser;
use colored::*;
use commands::{Commands, exit_code, handle_command};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "somprep")]
#[command(about = "Somatic variant-calling preprocessing pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "somprep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match handle_command(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_strategy_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "somprep",
            "run",
            "--input",
            "s.bam",
            "--reference",
            "ref.fa",
            "--recalibrate",
            "--indelqual",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_filter_requires_snp_db() {
        let parsed = Cli::try_parse_from(["somprep", "filter", "--calls", "calls.vcf"]);
        assert!(parsed.is_err());
    }
}
