//! Stage registry
//!
//! The ordered catalog of stages. Declaration order is significant: it breaks
//! ties when two stages have no dependency between them, which keeps plans
//! reproducible.

use std::collections::HashSet;

use crate::domain::artifact::ArtifactRole;
use crate::domain::config::{QualityStrategy, RunConfig};
use crate::domain::stage::{
    Inclusion, InputRequirement, OutputDecl, StageDef, StageIo, StageKind, ToolCommand,
    require_input, require_output,
};
use crate::error::PlanningError;

/// Alignment consumed by realignment: duplicate-marked if that stage ran,
/// otherwise the mate-fixed one
const REALIGN_SOURCES: &[ArtifactRole] = &[ArtifactRole::Deduplicated, ArtifactRole::MateFixed];

/// Ordered catalog of stages
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDef>,
}

impl StageRegistry {
    /// Creates a registry from stage definitions in declaration order
    ///
    /// Fails if a stage is registered twice or two stages produce the same
    /// role.
    pub fn new(stages: Vec<StageDef>) -> Result<Self, PlanningError> {
        let mut kinds = HashSet::new();
        let mut produced = HashSet::new();

        for stage in &stages {
            if !kinds.insert(stage.kind) {
                return Err(PlanningError::DuplicateStage(stage.kind));
            }
            for output in &stage.outputs {
                if !produced.insert(output.role) {
                    return Err(PlanningError::DuplicateProducer(output.role));
                }
            }
        }

        Ok(Self { stages })
    }

    /// The preprocessing catalog:
    /// mate-fix, duplicate-mark, indel-realign, base-quality-recalibrate,
    /// indel-quality-annotate
    pub fn standard() -> Self {
        Self {
            stages: vec![
                StageDef {
                    kind: StageKind::MateFix,
                    inclusion: Inclusion::Always,
                    inputs: vec![InputRequirement::Required(ArtifactRole::InputAlignment)],
                    outputs: vec![OutputDecl {
                        role: ArtifactRole::MateFixed,
                        suffix: "matefix.bam",
                    }],
                    build: mate_fix,
                },
                StageDef {
                    kind: StageKind::DuplicateMark,
                    inclusion: Inclusion::UnlessAmplicon,
                    inputs: vec![InputRequirement::Required(ArtifactRole::MateFixed)],
                    outputs: vec![
                        OutputDecl {
                            role: ArtifactRole::Deduplicated,
                            suffix: "dedup.bam",
                        },
                        OutputDecl {
                            role: ArtifactRole::DuplicateMetrics,
                            suffix: "dedup.metrics.txt",
                        },
                    ],
                    build: duplicate_mark,
                },
                StageDef {
                    kind: StageKind::IndelRealign,
                    inclusion: Inclusion::Always,
                    inputs: vec![
                        InputRequirement::FirstOf(REALIGN_SOURCES),
                        InputRequirement::Required(ArtifactRole::Reference),
                    ],
                    outputs: vec![
                        OutputDecl {
                            role: ArtifactRole::Realigned,
                            suffix: "realn.bam",
                        },
                        OutputDecl {
                            role: ArtifactRole::RealignedUnsorted,
                            suffix: "realn.unsorted.bam",
                        },
                    ],
                    build: indel_realign,
                },
                StageDef {
                    kind: StageKind::BaseQualityRecalibrate,
                    inclusion: Inclusion::WithStrategy(QualityStrategy::UseRecalibration),
                    inputs: vec![
                        InputRequirement::Required(ArtifactRole::Realigned),
                        InputRequirement::Required(ArtifactRole::Reference),
                        InputRequirement::Required(ArtifactRole::KnownVariants),
                        InputRequirement::Optional(ArtifactRole::TargetRegions),
                    ],
                    outputs: vec![
                        OutputDecl {
                            role: ArtifactRole::RecalibrationTable,
                            suffix: "recal.table",
                        },
                        OutputDecl {
                            role: ArtifactRole::Recalibrated,
                            suffix: "recal.bam",
                        },
                    ],
                    build: base_quality_recalibrate,
                },
                StageDef {
                    kind: StageKind::IndelQualityAnnotate,
                    inclusion: Inclusion::WithStrategy(QualityStrategy::UseIndelQualAnnotate),
                    inputs: vec![
                        InputRequirement::Required(ArtifactRole::Realigned),
                        InputRequirement::Required(ArtifactRole::Reference),
                    ],
                    outputs: vec![OutputDecl {
                        role: ArtifactRole::IndelQualAnnotated,
                        suffix: "iq.bam",
                    }],
                    build: indel_quality_annotate,
                },
            ],
        }
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn get(&self, kind: StageKind) -> Option<&StageDef> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }

    /// Stages taking part in a run, in declaration order
    pub fn selected(&self, config: &RunConfig, strategy: QualityStrategy) -> Vec<&StageDef> {
        self.stages
            .iter()
            .filter(|stage| stage.inclusion.admits(config, strategy))
            .collect()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn mate_fix(
    stage: StageKind,
    io: &StageIo,
    config: &RunConfig,
) -> Result<Vec<ToolCommand>, PlanningError> {
    let input = require_input(stage, io, ArtifactRole::InputAlignment)?;
    let output = require_output(stage, io, ArtifactRole::MateFixed)?;

    Ok(vec![
        ToolCommand::new(&config.toolchain.picard)
            .arg("FixMateInformation")
            .assign("I", input)
            .assign("O", output)
            .arg("SORT_ORDER=coordinate")
            .arg("VALIDATION_STRINGENCY=LENIENT"),
    ])
}

fn duplicate_mark(
    stage: StageKind,
    io: &StageIo,
    config: &RunConfig,
) -> Result<Vec<ToolCommand>, PlanningError> {
    let input = require_input(stage, io, ArtifactRole::MateFixed)?;
    let output = require_output(stage, io, ArtifactRole::Deduplicated)?;
    let metrics = require_output(stage, io, ArtifactRole::DuplicateMetrics)?;

    Ok(vec![
        ToolCommand::new(&config.toolchain.picard)
            .arg("MarkDuplicates")
            .assign("I", input)
            .assign("O", output)
            .assign("M", metrics)
            .arg("VALIDATION_STRINGENCY=LENIENT"),
    ])
}

fn indel_realign(
    stage: StageKind,
    io: &StageIo,
    config: &RunConfig,
) -> Result<Vec<ToolCommand>, PlanningError> {
    let input = io.alignment().ok_or(PlanningError::MissingInput {
        stage,
        role: REALIGN_SOURCES[0],
    })?;
    let reference = require_input(stage, io, ArtifactRole::Reference)?;
    let unsorted = require_output(stage, io, ArtifactRole::RealignedUnsorted)?;
    let output = require_output(stage, io, ArtifactRole::Realigned)?;

    // viterbi does not preserve coordinate order
    Ok(vec![
        ToolCommand::new(&config.toolchain.lofreq)
            .arg("viterbi")
            .flag_path("-f", reference)
            .flag_path("-o", unsorted)
            .arg(input.display().to_string()),
        ToolCommand::new(&config.toolchain.picard)
            .arg("SortSam")
            .assign("I", unsorted)
            .assign("O", output)
            .arg("SORT_ORDER=coordinate")
            .arg("VALIDATION_STRINGENCY=LENIENT"),
    ])
}

fn base_quality_recalibrate(
    stage: StageKind,
    io: &StageIo,
    config: &RunConfig,
) -> Result<Vec<ToolCommand>, PlanningError> {
    let input = require_input(stage, io, ArtifactRole::Realigned)?;
    let reference = require_input(stage, io, ArtifactRole::Reference)?;
    let known = require_input(stage, io, ArtifactRole::KnownVariants)?;
    let table = require_output(stage, io, ArtifactRole::RecalibrationTable)?;
    let output = require_output(stage, io, ArtifactRole::Recalibrated)?;

    let mut model = ToolCommand::new(&config.toolchain.gatk)
        .arg("BaseRecalibrator")
        .flag_path("-R", reference)
        .flag_path("-I", input)
        .flag_path("--known-sites", known)
        .flag_path("-O", table);
    let mut apply = ToolCommand::new(&config.toolchain.gatk)
        .arg("ApplyBQSR")
        .flag_path("-R", reference)
        .flag_path("-I", input)
        .flag_path("--bqsr-recal-file", table)
        .flag_path("-O", output);

    if let Some(targets) = io.input(ArtifactRole::TargetRegions) {
        model = model.flag_path("-L", targets);
        apply = apply.flag_path("-L", targets);
    }

    Ok(vec![model, apply])
}

fn indel_quality_annotate(
    stage: StageKind,
    io: &StageIo,
    config: &RunConfig,
) -> Result<Vec<ToolCommand>, PlanningError> {
    let input = require_input(stage, io, ArtifactRole::Realigned)?;
    let reference = require_input(stage, io, ArtifactRole::Reference)?;
    let output = require_output(stage, io, ArtifactRole::IndelQualAnnotated)?;

    Ok(vec![
        ToolCommand::new(&config.toolchain.lofreq)
            .arg("indelqual")
            .arg("--dindel")
            .flag_path("-f", reference)
            .flag_path("-o", output)
            .arg(input.display().to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::Artifact;

    #[test]
    fn test_standard_catalog_order() {
        let registry = StageRegistry::standard();
        let kinds: Vec<_> = registry.stages().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StageKind::MateFix,
                StageKind::DuplicateMark,
                StageKind::IndelRealign,
                StageKind::BaseQualityRecalibrate,
                StageKind::IndelQualityAnnotate,
            ]
        );
        // The standard catalog passes its own validation
        assert!(StageRegistry::new(registry.stages().to_vec()).is_ok());
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mate_fix = StageRegistry::standard()
            .get(StageKind::MateFix)
            .cloned()
            .unwrap();
        let result = StageRegistry::new(vec![mate_fix.clone(), mate_fix]);
        assert!(matches!(
            result,
            Err(PlanningError::DuplicateStage(StageKind::MateFix))
        ));
    }

    #[test]
    fn test_realignment_is_sorted() {
        let config = RunConfig::builder("in.bam", "ref.fa").build().unwrap();
        let io = StageIo {
            inputs: vec![
                Artifact::new(ArtifactRole::Deduplicated, "s.dedup.bam"),
                Artifact::new(ArtifactRole::Reference, "ref.fa"),
            ],
            outputs: vec![
                Artifact::new(ArtifactRole::Realigned, "s.realn.bam"),
                Artifact::new(ArtifactRole::RealignedUnsorted, "s.realn.unsorted.bam"),
            ],
        };

        let commands = indel_realign(StageKind::IndelRealign, &io, &config).unwrap();
        assert_eq!(
            commands.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "lofreq viterbi -f ref.fa -o s.realn.unsorted.bam s.dedup.bam",
                "picard SortSam I=s.realn.unsorted.bam O=s.realn.bam SORT_ORDER=coordinate VALIDATION_STRINGENCY=LENIENT",
            ]
        );
    }

    #[test]
    fn test_recalibration_commands_carry_targets() {
        let config = RunConfig::builder("in.bam", "ref.fa").build().unwrap();
        let io = StageIo {
            inputs: vec![
                Artifact::new(ArtifactRole::Realigned, "s.realn.bam"),
                Artifact::new(ArtifactRole::Reference, "ref.fa"),
                Artifact::new(ArtifactRole::KnownVariants, "dbsnp.vcf.gz"),
                Artifact::new(ArtifactRole::TargetRegions, "targets.bed"),
            ],
            outputs: vec![
                Artifact::new(ArtifactRole::RecalibrationTable, "s.recal.table"),
                Artifact::new(ArtifactRole::Recalibrated, "s.recal.bam"),
            ],
        };

        let commands =
            base_quality_recalibrate(StageKind::BaseQualityRecalibrate, &io, &config).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0].to_string(),
            "gatk BaseRecalibrator -R ref.fa -I s.realn.bam --known-sites dbsnp.vcf.gz -O s.recal.table -L targets.bed"
        );
        assert_eq!(
            commands[1].to_string(),
            "gatk ApplyBQSR -R ref.fa -I s.realn.bam --bqsr-recal-file s.recal.table -O s.recal.bam -L targets.bed"
        );
    }

    #[test]
    fn test_recalibration_without_known_sites_fails() {
        let config = RunConfig::builder("in.bam", "ref.fa").build().unwrap();
        let io = StageIo {
            inputs: vec![
                Artifact::new(ArtifactRole::Realigned, "s.realn.bam"),
                Artifact::new(ArtifactRole::Reference, "ref.fa"),
            ],
            outputs: vec![],
        };

        let result = base_quality_recalibrate(StageKind::BaseQualityRecalibrate, &io, &config);
        assert!(matches!(
            result,
            Err(PlanningError::MissingInput {
                role: ArtifactRole::KnownVariants,
                ..
            })
        ));
    }

    #[test]
    fn test_picard_argument_style() {
        let config = RunConfig::builder("in.bam", "ref.fa").build().unwrap();
        let io = StageIo {
            inputs: vec![Artifact::new(ArtifactRole::InputAlignment, "in.bam")],
            outputs: vec![Artifact::new(ArtifactRole::MateFixed, "in.matefix.bam")],
        };

        let commands = mate_fix(StageKind::MateFix, &io, &config).unwrap();
        assert_eq!(
            commands[0].to_string(),
            "picard FixMateInformation I=in.bam O=in.matefix.bam SORT_ORDER=coordinate VALIDATION_STRINGENCY=LENIENT"
        );
    }
}
