//! Run configuration
//!
//! A [`RunConfig`] is assembled once per invocation through
//! [`RunConfig::builder`] and is never mutated afterwards. Everything the
//! planner needs to decide which stages run, and with which files, lives here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::artifact::ArtifactRole;
use crate::error::PlanningError;

/// Largest accepted worker pool size
pub const MAX_PARALLELISM: usize = 1024;

/// How the alignment acquires the base and indel qualities the somatic caller
/// relies on.
///
/// Recalibration already injects indel qualities, so the two strategies are
/// alternatives and exactly one of them is planned per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityStrategy {
    /// GATK base-quality recalibration against a known-variant database
    UseRecalibration,
    /// LoFreq Dindel indel-quality annotation
    UseIndelQualAnnotate,
}

impl std::fmt::Display for QualityStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityStrategy::UseRecalibration => write!(f, "recalibration"),
            QualityStrategy::UseIndelQualAnnotate => write!(f, "indel-quality annotation"),
        }
    }
}

/// Binary names (or paths) of the external tools the stages shell out to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub picard: String,
    pub gatk: String,
    pub lofreq: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            picard: "picard".to_string(),
            gatk: "gatk".to_string(),
            lofreq: "lofreq".to_string(),
        }
    }
}

/// Immutable configuration of a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Coordinate-sorted input alignment
    pub input: PathBuf,

    /// Reference genome (indexed FASTA)
    pub reference: PathBuf,

    /// Target regions (BED or interval list), passed to the GATK tools
    pub targets: Option<PathBuf>,

    /// Known-variant database (e.g. dbSNP). Enables recalibration.
    pub known_variants: Option<PathBuf>,

    /// Cancer-mutation database (e.g. COSMIC), used by the somatic filter
    pub cancer_db: Option<PathBuf>,

    /// Amplicon data: duplicate marking is skipped
    pub amplicon: bool,

    /// Worker pool size, between 1 and [`MAX_PARALLELISM`]
    pub parallelism: usize,

    /// Directory receiving every produced artifact
    pub out_dir: PathBuf,

    /// File name prefix of produced artifacts
    pub prefix: String,

    /// Forces a quality strategy instead of deriving it from the inputs
    pub quality_override: Option<QualityStrategy>,

    pub toolchain: Toolchain,
}

impl RunConfig {
    /// Starts a builder for the two mandatory inputs
    pub fn builder(input: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> RunConfigBuilder {
        RunConfigBuilder::new(input.into(), reference.into())
    }

    /// The quality strategy this run plans for.
    ///
    /// Without an explicit override, recalibration is chosen exactly when a
    /// known-variant database is supplied.
    pub fn quality_strategy(&self) -> QualityStrategy {
        match self.quality_override {
            Some(strategy) => strategy,
            None if self.known_variants.is_some() => QualityStrategy::UseRecalibration,
            None => QualityStrategy::UseIndelQualAnnotate,
        }
    }

    /// Path of a user-supplied input artifact, if the role is one
    pub fn external_input(&self, role: ArtifactRole) -> Option<&Path> {
        match role {
            ArtifactRole::InputAlignment => Some(&self.input),
            ArtifactRole::Reference => Some(&self.reference),
            ArtifactRole::TargetRegions => self.targets.as_deref(),
            ArtifactRole::KnownVariants => self.known_variants.as_deref(),
            _ => None,
        }
    }

    /// Location of a produced artifact with the given file suffix
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.out_dir.join(format!("{}.{}", self.prefix, suffix))
    }
}

/// Builder for [`RunConfig`]
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    input: PathBuf,
    reference: PathBuf,
    targets: Option<PathBuf>,
    known_variants: Option<PathBuf>,
    cancer_db: Option<PathBuf>,
    amplicon: bool,
    parallelism: usize,
    out_dir: Option<PathBuf>,
    prefix: Option<String>,
    quality_override: Option<QualityStrategy>,
    toolchain: Toolchain,
}

impl RunConfigBuilder {
    fn new(input: PathBuf, reference: PathBuf) -> Self {
        Self {
            input,
            reference,
            targets: None,
            known_variants: None,
            cancer_db: None,
            amplicon: false,
            parallelism: 1,
            out_dir: None,
            prefix: None,
            quality_override: None,
            toolchain: Toolchain::default(),
        }
    }

    pub fn targets(mut self, path: Option<PathBuf>) -> Self {
        self.targets = path;
        self
    }

    pub fn known_variants(mut self, path: Option<PathBuf>) -> Self {
        self.known_variants = path;
        self
    }

    pub fn cancer_db(mut self, path: Option<PathBuf>) -> Self {
        self.cancer_db = path;
        self
    }

    pub fn amplicon(mut self, amplicon: bool) -> Self {
        self.amplicon = amplicon;
        self
    }

    pub fn parallelism(mut self, degree: usize) -> Self {
        self.parallelism = degree;
        self
    }

    pub fn out_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    pub fn prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix;
        self
    }

    pub fn quality_strategy(mut self, strategy: Option<QualityStrategy>) -> Self {
        self.quality_override = strategy;
        self
    }

    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Validates and freezes the configuration
    ///
    /// Defaults: the output directory is the input's parent directory and the
    /// prefix is the input file name without its extension.
    pub fn build(self) -> Result<RunConfig, PlanningError> {
        if self.parallelism == 0 {
            return Err(PlanningError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.parallelism > MAX_PARALLELISM {
            return Err(PlanningError::InvalidConfig(format!(
                "parallelism {} exceeds the maximum of {}",
                self.parallelism, MAX_PARALLELISM
            )));
        }

        let prefix = match self.prefix {
            Some(prefix) => prefix,
            None => self
                .input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if prefix.is_empty() || prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(PlanningError::InvalidConfig(format!(
                "cannot derive a valid output prefix from '{}'",
                self.input.display()
            )));
        }

        let out_dir = match self.out_dir {
            Some(dir) => dir,
            None => self
                .input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        for (name, binary) in [
            ("picard", &self.toolchain.picard),
            ("gatk", &self.toolchain.gatk),
            ("lofreq", &self.toolchain.lofreq),
        ] {
            if binary.trim().is_empty() {
                return Err(PlanningError::InvalidConfig(format!(
                    "{} binary cannot be empty",
                    name
                )));
            }
        }

        Ok(RunConfig {
            input: self.input,
            reference: self.reference,
            targets: self.targets,
            known_variants: self.known_variants,
            cancer_db: self.cancer_db,
            amplicon: self.amplicon,
            parallelism: self.parallelism,
            out_dir,
            prefix,
            quality_override: self.quality_override,
            toolchain: self.toolchain,
        })
    }
}
