//! Plan command handler
//!
//! Plans a run against the current state of the output directory and prints
//! it without invoking any tool.

use anyhow::{Context, Result};
use colored::*;
use somprep_core::{FsProbe, PipelinePlan, StageStatus};

use super::run::RunArgs;

pub fn handle_plan(args: RunArgs, json: bool) -> Result<()> {
    let config = args.to_config()?;
    let plan = somprep_core::plan(&config, &FsProbe)?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
        println!("{}", rendered);
    } else {
        print_plan(&plan, true);
    }

    Ok(())
}

/// Print the plan, optionally with the tool invocations of each stage
pub fn print_plan(plan: &PipelinePlan, with_commands: bool) {
    println!(
        "{}",
        format!(
            "Plan {} ({} stage(s), {} to run)",
            plan.run_id(),
            plan.len(),
            plan.pending()
        )
        .bold()
    );
    println!("  Quality strategy: {}", plan.strategy().to_string().cyan());
    println!("  Parallelism:      {}", plan.parallelism());
    println!("  Output directory: {}", plan.out_dir().display().to_string().dimmed());
    if let Some(cancer_db) = plan.cancer_db() {
        println!(
            "  Cancer database:  {} (used by `somprep filter`)",
            cancer_db.display()
        );
    }
    println!();

    for run in plan.stages() {
        let note = if run.status == StageStatus::Skipped {
            " (up to date)".dimmed()
        } else {
            "".normal()
        };
        println!(
            "  {} {:<26} {}{}",
            "▸".cyan(),
            run.stage.name(),
            colorize_status(run.status),
            note
        );
        if with_commands && run.status != StageStatus::Skipped {
            for command in &run.commands {
                println!("      {}", command.to_string().dimmed());
            }
        }
    }

    println!();
    println!(
        "  Final alignment:  {}",
        plan.final_alignment().display().to_string().green()
    );
}

/// Colorize stage status for display
pub fn colorize_status(status: StageStatus) -> ColoredString {
    let status_str = format!("{:?}", status);
    match status {
        StageStatus::Pending => status_str.yellow(),
        StageStatus::Running => status_str.cyan(),
        StageStatus::Succeeded => status_str.green(),
        StageStatus::Failed => status_str.red(),
        StageStatus::Skipped => status_str.dimmed(),
    }
}
