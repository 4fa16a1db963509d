//! Stage execution types
//!
//! These types only exist while a plan is executing. They are folded into
//! the [`RunResult`](somprep_core::RunResult) the executor returns.

use somprep_core::domain::log::LogEntry;
use somprep_core::{FailureKind, RunFailure, StageKind, StageStatus};
use std::time::Duration;

/// Outcome of running one stage
#[derive(Debug)]
pub enum StageOutcome {
    Success {
        exit_code: Option<i32>,
        logs: Vec<LogEntry>,
    },
    Failure {
        error: String,
        exit_code: Option<i32>,
        diagnostics: Vec<String>,
        logs: Vec<LogEntry>,
    },
    Timeout {
        limit: Duration,
    },
}

impl StageOutcome {
    /// Status the stage ends in
    pub fn status(&self) -> StageStatus {
        match self {
            StageOutcome::Success { .. } => StageStatus::Succeeded,
            StageOutcome::Failure { .. } | StageOutcome::Timeout { .. } => StageStatus::Failed,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StageOutcome::Success { exit_code, .. } | StageOutcome::Failure { exit_code, .. } => {
                *exit_code
            }
            StageOutcome::Timeout { .. } => None,
        }
    }

    /// Takes the log entries collected while the stage ran
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        match self {
            StageOutcome::Success { logs, .. } | StageOutcome::Failure { logs, .. } => {
                std::mem::take(logs)
            }
            StageOutcome::Timeout { .. } => Vec::new(),
        }
    }

    /// Converts a failed outcome into the run's failure record
    pub fn into_failure(self, stage: StageKind) -> Option<RunFailure> {
        match self {
            StageOutcome::Success { .. } => None,
            StageOutcome::Failure {
                error, diagnostics, ..
            } => Some(RunFailure {
                kind: FailureKind::Stage,
                stage: Some(stage),
                message: format!("Stage '{}' failed: {}", stage, error),
                diagnostics,
            }),
            StageOutcome::Timeout { limit } => Some(RunFailure {
                kind: FailureKind::Timeout,
                stage: Some(stage),
                message: format!("Stage '{}' timed out after {:?}", stage, limit),
                diagnostics: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use somprep_core::domain::log::LogLevel;

    #[test]
    fn test_outcome_success() {
        let mut outcome = StageOutcome::Success {
            exit_code: Some(0),
            logs: vec![LogEntry::now(LogLevel::Info, "done")],
        };

        assert_eq!(outcome.status(), StageStatus::Succeeded);
        assert_eq!(outcome.take_logs().len(), 1);
        assert!(outcome.take_logs().is_empty());
        assert!(outcome.into_failure(StageKind::MateFix).is_none());
    }

    #[test]
    fn test_outcome_failure() {
        let outcome = StageOutcome::Failure {
            error: "picard exited with code 1".to_string(),
            exit_code: Some(1),
            diagnostics: vec!["Exception in thread main".to_string()],
            logs: vec![],
        };

        assert_eq!(outcome.status(), StageStatus::Failed);
        assert_eq!(outcome.exit_code(), Some(1));

        let failure = outcome.into_failure(StageKind::DuplicateMark).unwrap();
        assert_eq!(failure.kind, FailureKind::Stage);
        assert_eq!(failure.stage, Some(StageKind::DuplicateMark));
        assert!(failure.message.contains("duplicate-mark"));
        assert_eq!(failure.diagnostics.len(), 1);
    }

    #[test]
    fn test_outcome_timeout() {
        let outcome = StageOutcome::Timeout {
            limit: Duration::from_secs(60),
        };

        assert_eq!(outcome.exit_code(), None);
        let failure = outcome.into_failure(StageKind::IndelRealign).unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.message.contains("timed out"));
    }
}
