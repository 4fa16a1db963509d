//! Stage descriptors
//!
//! A [`StageDef`] is a stateless description of one unit of pipeline work:
//! which artifacts it reads, which it writes, and how to turn resolved paths
//! into external tool invocations. The catalog lives in
//! [`crate::pipeline::registry`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::artifact::{Artifact, ArtifactProbe, ArtifactRole};
use crate::domain::config::{QualityStrategy, RunConfig};
use crate::error::PlanningError;

/// Unique key of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    MateFix,
    DuplicateMark,
    IndelRealign,
    BaseQualityRecalibrate,
    IndelQualityAnnotate,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::MateFix => "mate-fix",
            StageKind::DuplicateMark => "duplicate-mark",
            StageKind::IndelRealign => "indel-realign",
            StageKind::BaseQualityRecalibrate => "base-quality-recalibrate",
            StageKind::IndelQualityAnnotate => "indel-quality-annotate",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Status of a stage within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Whether downstream stages may consume this stage's outputs
    pub fn is_complete(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

/// One declared input of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRequirement {
    /// Must be available
    Required(ArtifactRole),
    /// The first available role, in order of preference
    FirstOf(&'static [ArtifactRole]),
    /// Used when available
    Optional(ArtifactRole),
}

impl InputRequirement {
    /// Roles able to satisfy this requirement, in order of preference
    pub fn candidates(&self) -> &[ArtifactRole] {
        match self {
            InputRequirement::Required(role) | InputRequirement::Optional(role) => {
                std::slice::from_ref(role)
            }
            InputRequirement::FirstOf(roles) => roles,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, InputRequirement::Optional(_))
    }
}

/// One declared output of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDecl {
    pub role: ArtifactRole,
    /// File name suffix appended to the run prefix
    pub suffix: &'static str,
}

/// When a stage takes part in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    Always,
    /// Omitted for amplicon data
    UnlessAmplicon,
    /// Only under the given quality strategy
    WithStrategy(QualityStrategy),
}

impl Inclusion {
    pub fn admits(&self, config: &RunConfig, strategy: QualityStrategy) -> bool {
        match self {
            Inclusion::Always => true,
            Inclusion::UnlessAmplicon => !config.amplicon,
            Inclusion::WithStrategy(required) => *required == strategy,
        }
    }
}

/// A single external program invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a `KEY=path` argument, the convention picard uses
    pub fn assign(self, key: &str, path: &Path) -> Self {
        self.arg(format!("{}={}", key, path.display()))
    }

    /// Appends a flag followed by a path
    pub fn flag_path(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path.display().to_string())
    }
}

impl std::fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Concrete input and output artifacts of a planned stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageIo {
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
}

impl StageIo {
    pub fn input(&self, role: ArtifactRole) -> Option<&Path> {
        self.inputs
            .iter()
            .find(|artifact| artifact.role == role)
            .map(|artifact| artifact.path.as_path())
    }

    /// The alignment this stage reads, whichever role it resolved to
    pub fn alignment(&self) -> Option<&Path> {
        self.inputs
            .iter()
            .find(|artifact| artifact.role.is_alignment())
            .map(|artifact| artifact.path.as_path())
    }

    pub fn output(&self, role: ArtifactRole) -> Option<&Path> {
        self.outputs
            .iter()
            .find(|artifact| artifact.role == role)
            .map(|artifact| artifact.path.as_path())
    }
}

/// Builds the tool invocations of a stage from its resolved artifacts
pub type CommandBuilder =
    fn(stage: StageKind, io: &StageIo, config: &RunConfig) -> Result<Vec<ToolCommand>, PlanningError>;

/// Stateless stage descriptor
#[derive(Debug, Clone)]
pub struct StageDef {
    pub kind: StageKind,
    pub inclusion: Inclusion,
    pub inputs: Vec<InputRequirement>,
    pub outputs: Vec<OutputDecl>,
    pub build: CommandBuilder,
}

impl StageDef {
    pub fn produces(&self, role: ArtifactRole) -> bool {
        self.outputs.iter().any(|output| output.role == role)
    }

    /// Whether the stage's outputs already reflect its inputs.
    ///
    /// True when every output exists and is non-empty and none is older than
    /// any input.
    pub fn is_satisfied(&self, io: &StageIo, probe: &dyn ArtifactProbe) -> bool {
        if io.outputs.is_empty() {
            return false;
        }

        let mut newest_input = None;
        for input in &io.inputs {
            match probe.probe(&input.path) {
                Some(state) => {
                    newest_input = newest_input.max(Some(state.modified));
                }
                None => return false,
            }
        }

        io.outputs.iter().all(|output| match probe.probe(&output.path) {
            Some(state) => {
                state.size > 0 && newest_input.is_none_or(|newest| state.modified >= newest)
            }
            None => false,
        })
    }

    /// Builds the tool invocations for resolved artifacts
    pub fn commands(&self, io: &StageIo, config: &RunConfig) -> Result<Vec<ToolCommand>, PlanningError> {
        (self.build)(self.kind, io, config)
    }
}

/// Looks up a resolved input, failing planning if it is absent
pub fn require_input(stage: StageKind, io: &StageIo, role: ArtifactRole) -> Result<&Path, PlanningError> {
    io.input(role)
        .ok_or(PlanningError::MissingInput { stage, role })
}

/// Looks up a resolved output, failing planning if it is absent
pub fn require_output(stage: StageKind, io: &StageIo, role: ArtifactRole) -> Result<&Path, PlanningError> {
    io.output(role)
        .ok_or(PlanningError::MissingOutput { stage, role })
}
