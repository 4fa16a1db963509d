//! Run report persistence
//!
//! The serialized [`RunResult`] is written next to the stage outputs so a
//! later invocation (or an operator) can see what the last run did.

use anyhow::{Context, Result};
use somprep_core::RunResult;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const REPORT_FILE: &str = "run-report.json";

/// Path of the report inside an output directory
pub fn report_path(out_dir: &Path) -> PathBuf {
    out_dir.join(REPORT_FILE)
}

/// Writes the report as pretty-printed JSON and returns its path
pub async fn write_report(out_dir: &Path, result: &RunResult) -> Result<PathBuf> {
    let path = report_path(out_dir);
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run report")?;

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    debug!("Run report written to {}", path.display());
    Ok(path)
}

/// Loads a previously written report
pub async fn read_report(out_dir: &Path) -> Result<RunResult> {
    let path = report_path(out_dir);
    let json = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed run report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use somprep_core::{FsProbe, RunConfig, RunStatus, StageKind, plan};

    #[tokio::test]
    async fn test_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("s.bam");
        std::fs::write(&input, b"bam").unwrap();
        let reference = dir.path().join("ref.fa");
        std::fs::write(&reference, b">chr1\n").unwrap();

        let config = RunConfig::builder(&input, &reference)
            .cancer_db(Some(dir.path().join("cosmic.vcf")))
            .out_dir(dir.path().join("out"))
            .build()
            .unwrap();
        let plan = plan(&config, &FsProbe).unwrap();
        let mut result = RunResult::start(&plan);
        result.finish_success(plan.final_alignment().to_path_buf());

        let path = write_report(plan.out_dir(), &result).await.unwrap();
        assert!(path.ends_with(REPORT_FILE));

        let loaded = read_report(plan.out_dir()).await.unwrap();
        assert_eq!(loaded.run_id, result.run_id);
        assert_eq!(loaded.status, RunStatus::Succeeded);
        assert_eq!(loaded.stages.len(), plan.len());
        assert!(loaded.stage(StageKind::MateFix).is_some());
        assert_eq!(loaded.cancer_db, Some(dir.path().join("cosmic.vcf")));
    }

    #[tokio::test]
    async fn test_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_report(dir.path()).await.is_err());
    }
}
