//! Run result domain types
//!
//! [`RunResult`] is the accumulator the executor threads through a run and
//! hands back to the caller; it replaces any process-wide progress state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::artifact::Artifact;
use crate::domain::log::{LogEntry, LogLevel};
use crate::domain::stage::{StageKind, StageStatus};
use crate::pipeline::PipelinePlan;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// Machine-distinguishable failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The configuration cannot be satisfied
    Planning,
    /// An external tool failed or produced missing/invalid output
    Stage,
    /// A stage exceeded its wall-clock allowance, or was killed after an abort
    Timeout,
    /// Malformed call-set or annotation record
    Filter,
    /// The operator aborted the run and in-flight stages wound down in time
    Aborted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Planning => write!(f, "planning failure"),
            FailureKind::Stage => write!(f, "stage failure"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Filter => write!(f, "filter failure"),
            FailureKind::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why a run failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    /// Stage that failed first, if the failure belongs to a stage
    pub stage: Option<StageKind>,
    pub message: String,
    /// Tail of the failing tool's diagnostic output
    pub diagnostics: Vec<String>,
}

/// Per-stage record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Exit code of the last tool invocation, when one ran to completion
    pub exit_code: Option<i32>,
    pub outputs: Vec<Artifact>,
}

/// Result of executing a pipeline plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    /// Analysis-ready alignment, set on success
    pub final_alignment: Option<PathBuf>,
    pub failure: Option<RunFailure>,
    pub logs: Vec<LogEntry>,
    /// Cancer-mutation database to hand to the somatic filter
    #[serde(default)]
    pub cancer_db: Option<PathBuf>,
}

impl RunResult {
    /// Opens an accumulator mirroring the plan's initial statuses
    pub fn start(plan: &PipelinePlan) -> Self {
        let stages = plan
            .stages()
            .iter()
            .map(|run| StageRecord {
                stage: run.stage,
                status: run.status,
                started_at: None,
                completed_at: None,
                exit_code: None,
                outputs: run.io.outputs.clone(),
            })
            .collect();

        Self {
            run_id: plan.run_id(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            stages,
            final_alignment: None,
            failure: None,
            logs: Vec::new(),
            cancer_db: plan.cancer_db().map(Path::to_path_buf),
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::now(level, message));
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|record| record.stage == kind)
    }

    /// Stages that never started because the run stopped early
    pub fn not_started(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages
            .iter()
            .filter(|record| record.status == StageStatus::Pending)
            .map(|record| record.stage)
    }

    pub fn finish_success(&mut self, final_alignment: PathBuf) {
        self.status = RunStatus::Succeeded;
        self.final_alignment = Some(final_alignment);
        self.completed_at = Some(Utc::now());
    }

    pub fn finish_failure(&mut self, failure: RunFailure) {
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
        self.completed_at = Some(Utc::now());
    }
}
