//! somprep core
//!
//! Core types and logic for the somprep preprocessing pipeline.
//!
//! This crate contains:
//! - Domain types: run configuration, artifacts, stages, run results
//! - Pipeline: the stage registry and the run planner
//! - Variant: call-set I/O and the somatic filter
//!
//! Nothing here spawns processes; execution lives in `somprep-runner`.

pub mod domain;
pub mod error;
pub mod pipeline;
pub mod variant;

pub use domain::artifact::{Artifact, ArtifactProbe, ArtifactRole, FsProbe};
pub use domain::config::{QualityStrategy, RunConfig, Toolchain};
pub use domain::run::{FailureKind, RunFailure, RunResult, RunStatus};
pub use domain::stage::{StageKind, StageStatus, ToolCommand};
pub use error::{FilterError, PlanningError};
pub use pipeline::{PipelinePlan, StageRun, plan};
