//! Run command handler
//!
//! Builds the run configuration from the command line, plans it, executes
//! the plan with the process tool runner and reports the outcome. Ctrl-C
//! requests an abort; stages already running get the configured grace
//! period before they are killed.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use somprep_core::{FsProbe, PlanningError, QualityStrategy, RunConfig, RunResult, Toolchain};
use somprep_runner::{Executor, ExecutorConfig, ProcessToolRunner, write_report};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::ExecutionFailed;
use super::plan::{colorize_status, print_plan};

/// Inputs and options of a pipeline run
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Coordinate-sorted input alignment (BAM)
    #[arg(long)]
    pub input: PathBuf,

    /// Reference genome (indexed FASTA)
    #[arg(long)]
    pub reference: PathBuf,

    /// Target regions (BED or interval list)
    #[arg(long)]
    pub targets: Option<PathBuf>,

    /// Known-variant database; enables base-quality recalibration
    #[arg(long)]
    pub known_variants: Option<PathBuf>,

    /// Cancer-mutation database, recorded in the plan and run report for
    /// `somprep filter`
    #[arg(long)]
    pub cancer_db: Option<PathBuf>,

    /// Amplicon data: skip duplicate marking
    #[arg(long)]
    pub amplicon: bool,

    /// Number of stages that may run at once
    #[arg(long, env = "SOMPREP_THREADS", default_value_t = 1)]
    pub threads: usize,

    /// Output directory (defaults to the input's directory)
    #[arg(long, env = "SOMPREP_OUT_DIR")]
    pub out_dir: Option<PathBuf>,

    /// File name prefix of produced files (defaults to the input's stem)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Force base-quality recalibration
    #[arg(long, conflicts_with = "indelqual")]
    pub recalibrate: bool,

    /// Force indel-quality annotation
    #[arg(long)]
    pub indelqual: bool,

    /// Picard executable
    #[arg(long, env = "SOMPREP_PICARD", default_value = "picard")]
    pub picard: String,

    /// GATK executable
    #[arg(long, env = "SOMPREP_GATK", default_value = "gatk")]
    pub gatk: String,

    /// LoFreq executable
    #[arg(long, env = "SOMPREP_LOFREQ", default_value = "lofreq")]
    pub lofreq: String,
}

impl RunArgs {
    fn quality_override(&self) -> Option<QualityStrategy> {
        if self.recalibrate {
            Some(QualityStrategy::UseRecalibration)
        } else if self.indelqual {
            Some(QualityStrategy::UseIndelQualAnnotate)
        } else {
            None
        }
    }

    pub fn to_config(&self) -> Result<RunConfig, PlanningError> {
        let mut builder = RunConfig::builder(&self.input, &self.reference)
            .targets(self.targets.clone())
            .known_variants(self.known_variants.clone())
            .cancer_db(self.cancer_db.clone())
            .amplicon(self.amplicon)
            .parallelism(self.threads)
            .prefix(self.prefix.clone())
            .quality_strategy(self.quality_override())
            .toolchain(Toolchain {
                picard: self.picard.clone(),
                gatk: self.gatk.clone(),
                lofreq: self.lofreq.clone(),
            });

        if let Some(dir) = &self.out_dir {
            builder = builder.out_dir(dir);
        }

        builder.build()
    }
}

pub async fn handle_run(args: RunArgs) -> Result<()> {
    let settings = ExecutorConfig::from_env().context("Invalid executor configuration")?;
    settings.validate()?;

    let config = args.to_config()?;
    let plan = somprep_core::plan(&config, &FsProbe)?;
    print_plan(&plan, false);
    println!();

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            let _ = abort_tx.send(true);
        }
    });

    let executor =
        Executor::new(Arc::new(ProcessToolRunner::new()), settings).with_abort(abort_rx);
    let result = executor.execute(&plan).await;

    match write_report(plan.out_dir(), &result).await {
        Ok(path) => info!("Run report written to {}", path.display()),
        Err(e) => warn!("{:#}", e),
    }

    print_result(&result);

    match result.failure {
        None => Ok(()),
        Some(failure) => Err(ExecutionFailed {
            kind: failure.kind,
            message: failure.message,
        }
        .into()),
    }
}

/// Print per-stage statuses and the run outcome
fn print_result(result: &RunResult) {
    println!("{}", format!("Run {}:", result.run_id).bold());
    for record in &result.stages {
        let duration = match (record.started_at, record.completed_at) {
            (Some(started), Some(completed)) => {
                format!(" {}s", completed.signed_duration_since(started).num_seconds())
            }
            _ => String::new(),
        };
        println!(
            "  {} {:<26} {}{}",
            "▸".cyan(),
            record.stage.name(),
            colorize_status(record.status),
            duration.dimmed()
        );
    }
    println!();

    if let Some(path) = &result.final_alignment {
        println!("{} {}", "✓".green(), path.display().to_string().green());
        if let Some(cancer_db) = &result.cancer_db {
            println!(
                "  Filter calls with: somprep filter --cancer-db {}",
                cancer_db.display()
            );
        }
    }

    if let Some(failure) = &result.failure {
        println!("{} {}", "✗".red(), failure.message.red());
        if !failure.diagnostics.is_empty() {
            println!("\n{}", "Diagnostics:".bold());
            println!("{}", "─".repeat(80).dimmed());
            for line in &failure.diagnostics {
                println!("{}", line);
            }
            println!("{}", "─".repeat(80).dimmed());
        }
    }
}
