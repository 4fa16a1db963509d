//! Error types for planning, artifact validation and somatic filtering

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::artifact::ArtifactRole;
use crate::domain::stage::StageKind;

/// The configuration cannot be turned into an executable plan
#[derive(Debug, Error)]
pub enum PlanningError {
    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Nothing supplies an input the stage requires
    #[error("Stage '{stage}' requires the {role}, but no input or upstream stage provides it")]
    MissingInput { stage: StageKind, role: ArtifactRole },

    /// A configured input file is absent on disk
    #[error("Stage '{stage}' requires the {role} at {}, which does not exist", path.display())]
    InputNotFound {
        stage: StageKind,
        role: ArtifactRole,
        path: PathBuf,
    },

    /// A stage's command builder asked for an output it does not declare
    #[error("Stage '{stage}' does not declare a {role} output")]
    MissingOutput { stage: StageKind, role: ArtifactRole },

    /// Stage declarations form a cycle
    #[error("Stage dependency cycle among: {}", join_stages(.0))]
    Cycle(Vec<StageKind>),

    /// Two catalog entries share a name
    #[error("Stage '{0}' is registered twice")]
    DuplicateStage(StageKind),

    /// Two catalog entries produce the same artifact role
    #[error("The {0} is produced by more than one stage")]
    DuplicateProducer(ArtifactRole),

    /// No selected stage produces an alignment
    #[error("Plan contains no alignment-producing stage")]
    NoFinalAlignment,
}

fn join_stages(stages: &[StageKind]) -> String {
    stages
        .iter()
        .map(StageKind::name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A produced output failed validation
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Output {} was not produced", .0.display())]
    Missing(PathBuf),

    #[error("Output {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("Output {} is truncated (missing BGZF end-of-file block)", .0.display())]
    Truncated(PathBuf),

    #[error("Failed to inspect {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for filter operations
pub type FilterResult<T> = std::result::Result<T, FilterError>;

/// Malformed call-set or annotation input
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be parsed
    #[error("{origin}:{line}: {reason}")]
    Malformed {
        origin: String,
        line: usize,
        reason: String,
    },
}

impl FilterError {
    pub fn malformed(origin: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            origin: origin.to_string(),
            line,
            reason: reason.into(),
        }
    }
}
