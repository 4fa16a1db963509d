//! Run planner
//!
//! Turns a [`RunConfig`] and the artifacts present on disk into an immutable
//! [`PipelinePlan`]:
//!
//! 1. select stages (amplicon exclusion, quality strategy)
//! 2. derive dependency edges from declared artifact roles
//! 3. order topologically, ties broken by catalog order
//! 4. resolve every input against pre-existing files and earlier outputs
//! 5. mark stages whose outputs are already up to date as skipped

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::artifact::{Artifact, ArtifactProbe, ArtifactRole};
use crate::domain::config::{QualityStrategy, RunConfig};
use crate::domain::stage::{InputRequirement, StageDef, StageIo, StageKind, StageStatus, ToolCommand};
use crate::error::PlanningError;
use crate::pipeline::registry::StageRegistry;

/// One stage instantiated for a run
#[derive(Debug, Clone, Serialize)]
pub struct StageRun {
    pub stage: StageKind,
    pub io: StageIo,
    pub commands: Vec<ToolCommand>,
    /// Indices of the plan entries producing this stage's inputs
    pub depends_on: Vec<usize>,
    /// Pending, or Skipped when outputs are already up to date
    pub status: StageStatus,
}

/// Ordered, immutable list of stage runs for one configuration
#[derive(Debug, Clone, Serialize)]
pub struct PipelinePlan {
    run_id: Uuid,
    strategy: QualityStrategy,
    parallelism: usize,
    out_dir: PathBuf,
    stages: Vec<StageRun>,
    final_alignment: PathBuf,
    /// Carried through for the downstream somatic filter; no stage reads it
    cancer_db: Option<PathBuf>,
}

impl PipelinePlan {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn strategy(&self) -> QualityStrategy {
        self.strategy
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn stages(&self) -> &[StageRun] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|run| run.stage == kind)
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|run| run.stage).collect()
    }

    /// Number of stages that will actually be invoked
    pub fn pending(&self) -> usize {
        self.stages
            .iter()
            .filter(|run| run.status == StageStatus::Pending)
            .count()
    }

    /// Analysis-ready alignment produced by the last alignment stage
    pub fn final_alignment(&self) -> &Path {
        &self.final_alignment
    }

    pub fn cancer_db(&self) -> Option<&Path> {
        self.cancer_db.as_deref()
    }
}

/// Plans a run against the standard stage catalog
pub fn plan(config: &RunConfig, probe: &dyn ArtifactProbe) -> Result<PipelinePlan, PlanningError> {
    plan_with(&StageRegistry::standard(), config, probe)
}

/// Plans a run against an explicit stage catalog
pub fn plan_with(
    registry: &StageRegistry,
    config: &RunConfig,
    probe: &dyn ArtifactProbe,
) -> Result<PipelinePlan, PlanningError> {
    let strategy = config.quality_strategy();
    let selected = registry.selected(config, strategy);
    debug!(
        "Selected {} of {} stages (strategy: {}, amplicon: {})",
        selected.len(),
        registry.stages().len(),
        strategy,
        config.amplicon
    );

    let order = topological_order(&selected)?;

    // role -> index in plan of the producing stage
    let mut produced: HashMap<ArtifactRole, usize> = HashMap::new();
    let mut stages: Vec<StageRun> = Vec::with_capacity(order.len());

    for def in order.into_iter().map(|idx| selected[idx]) {
        let mut io = StageIo::default();
        let mut depends_on = BTreeSet::new();

        for requirement in &def.inputs {
            match resolve(def.kind, requirement, config, &produced, &stages, probe)? {
                Some((artifact, producer)) => {
                    if let Some(producer) = producer {
                        depends_on.insert(producer);
                    }
                    io.inputs.push(artifact);
                }
                None => debug!(
                    "Stage '{}' runs without optional {:?}",
                    def.kind,
                    requirement.candidates()
                ),
            }
        }

        for output in &def.outputs {
            io.outputs
                .push(Artifact::new(output.role, config.output_path(output.suffix)));
        }

        let commands = def.commands(&io, config)?;

        let upstream_skipped = depends_on
            .iter()
            .all(|&dep| stages[dep].status == StageStatus::Skipped);
        let status = if upstream_skipped && def.is_satisfied(&io, probe) {
            info!("Stage '{}' is up to date, skipping", def.kind);
            StageStatus::Skipped
        } else {
            StageStatus::Pending
        };

        let index = stages.len();
        for output in &def.outputs {
            produced.insert(output.role, index);
        }

        stages.push(StageRun {
            stage: def.kind,
            io,
            commands,
            depends_on: depends_on.into_iter().collect(),
            status,
        });
    }

    let final_alignment = stages
        .iter()
        .rev()
        .flat_map(|run| run.io.outputs.iter())
        .find(|artifact| artifact.role.is_alignment())
        .map(|artifact| artifact.path.clone())
        .ok_or(PlanningError::NoFinalAlignment)?;

    let plan = PipelinePlan {
        run_id: Uuid::new_v4(),
        strategy,
        parallelism: config.parallelism,
        out_dir: config.out_dir.clone(),
        stages,
        final_alignment,
        cancer_db: config.cancer_db.clone(),
    };

    info!(
        "Planned {} stage(s), {} to run, final alignment {}",
        plan.len(),
        plan.pending(),
        plan.final_alignment().display()
    );

    Ok(plan)
}

/// Resolves one input requirement.
///
/// Returns the artifact plus the plan index of its producer (`None` for
/// user-supplied inputs), or `None` when an optional input is not available.
fn resolve(
    stage: StageKind,
    requirement: &InputRequirement,
    config: &RunConfig,
    produced: &HashMap<ArtifactRole, usize>,
    stages: &[StageRun],
    probe: &dyn ArtifactProbe,
) -> Result<Option<(Artifact, Option<usize>)>, PlanningError> {
    for &role in requirement.candidates() {
        if let Some(&producer) = produced.get(&role) {
            let path = stages[producer]
                .io
                .output(role)
                .ok_or(PlanningError::MissingOutput {
                    stage: stages[producer].stage,
                    role,
                })?;
            return Ok(Some((Artifact::new(role, path), Some(producer))));
        }

        if let Some(path) = config.external_input(role) {
            if probe.probe(path).is_none() {
                return Err(PlanningError::InputNotFound {
                    stage,
                    role,
                    path: path.to_path_buf(),
                });
            }
            return Ok(Some((Artifact::new(role, path), None)));
        }
    }

    if requirement.is_optional() {
        return Ok(None);
    }

    Err(PlanningError::MissingInput {
        stage,
        role: requirement.candidates()[0],
    })
}

/// Kahn's algorithm over role-derived edges; among ready stages the earliest
/// declared one goes first.
fn topological_order(selected: &[&StageDef]) -> Result<Vec<usize>, PlanningError> {
    let n = selected.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];

    for (consumer, def) in selected.iter().enumerate() {
        let mut producers = BTreeSet::new();
        for requirement in &def.inputs {
            for &role in requirement.candidates() {
                for (producer, other) in selected.iter().enumerate() {
                    if producer != consumer && other.produces(role) {
                        producers.insert(producer);
                    }
                }
            }
        }
        for producer in producers {
            successors[producer].push(consumer);
            indegree[consumer] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &succ in &successors[next] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() != n {
        let stuck = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| selected[i].kind)
            .collect();
        return Err(PlanningError::Cycle(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::ArtifactState;
    use crate::domain::stage::{Inclusion, OutputDecl};
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    /// Whether `ancestor` must complete before `index` can start
    fn is_ancestor(plan: &PipelinePlan, ancestor: usize, index: usize) -> bool {
        let mut stack = vec![index];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            let Some(run) = plan.stages().get(current) else {
                return false;
            };
            for &dep in &run.depends_on {
                if dep == ancestor {
                    return true;
                }
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// In-memory filesystem view
    #[derive(Default)]
    struct FakeFs(Mutex<HashMap<PathBuf, ArtifactState>>);

    impl FakeFs {
        fn with(paths: &[&str]) -> Self {
            let fs = Self::default();
            for path in paths {
                fs.touch(path, 1);
            }
            fs
        }

        fn touch(&self, path: impl AsRef<Path>, secs: u64) {
            self.0.lock().unwrap().insert(
                path.as_ref().to_path_buf(),
                ArtifactState {
                    size: 1024,
                    modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
                },
            );
        }
    }

    impl ArtifactProbe for FakeFs {
        fn probe(&self, path: &Path) -> Option<ArtifactState> {
            self.0.lock().unwrap().get(path).copied()
        }
    }

    fn config() -> crate::domain::config::RunConfigBuilder {
        RunConfig::builder("/data/s.bam", "/ref/hg38.fa").out_dir("/out")
    }

    #[test]
    fn test_plan_without_known_variants_uses_indelqual() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa"]);
        let plan = plan(&config().build().unwrap(), &fs).unwrap();

        assert_eq!(
            plan.kinds(),
            vec![
                StageKind::MateFix,
                StageKind::DuplicateMark,
                StageKind::IndelRealign,
                StageKind::IndelQualityAnnotate,
            ]
        );
        assert!(!plan.contains(StageKind::BaseQualityRecalibrate));
        assert_eq!(plan.strategy(), QualityStrategy::UseIndelQualAnnotate);
        assert_eq!(plan.final_alignment(), Path::new("/out/s.iq.bam"));
        assert_eq!(plan.pending(), 4);
    }

    #[test]
    fn test_known_variants_flip_strategy() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa", "/ref/dbsnp.vcf.gz"]);
        let config = config()
            .known_variants(Some(PathBuf::from("/ref/dbsnp.vcf.gz")))
            .build()
            .unwrap();
        let plan = plan(&config, &fs).unwrap();

        assert_eq!(plan.len(), 4);
        assert!(plan.contains(StageKind::BaseQualityRecalibrate));
        assert!(!plan.contains(StageKind::IndelQualityAnnotate));
        assert_eq!(plan.final_alignment(), Path::new("/out/s.recal.bam"));
    }

    #[test]
    fn test_amplicon_never_plans_duplicate_marking() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa", "/ref/dbsnp.vcf.gz"]);
        for known in [None, Some(PathBuf::from("/ref/dbsnp.vcf.gz"))] {
            let config = config()
                .amplicon(true)
                .known_variants(known)
                .build()
                .unwrap();
            let plan = plan(&config, &fs).unwrap();

            assert!(!plan.contains(StageKind::DuplicateMark));
            // Realignment falls back to the mate-fixed alignment
            let realign = &plan.stages()[1];
            assert_eq!(realign.stage, StageKind::IndelRealign);
            assert_eq!(realign.io.alignment(), Some(Path::new("/out/s.matefix.bam")));
            assert_eq!(realign.depends_on, vec![0]);
        }
    }

    #[test]
    fn test_plan_is_topological() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa", "/ref/dbsnp.vcf.gz"]);
        let config = config()
            .known_variants(Some(PathBuf::from("/ref/dbsnp.vcf.gz")))
            .build()
            .unwrap();
        let plan = plan(&config, &fs).unwrap();

        for (index, run) in plan.stages().iter().enumerate() {
            for input in &run.io.inputs {
                let external = config.external_input(input.role).is_some();
                let earlier = plan.stages()[..index]
                    .iter()
                    .any(|prior| prior.io.outputs.contains(input));
                assert!(external || earlier, "{} input {:?}", run.stage, input);
            }
            assert!(run.depends_on.iter().all(|&dep| dep < index));
        }
        assert!(is_ancestor(&plan, 0, 3));
        assert!(!is_ancestor(&plan, 3, 0));
        assert!(!is_ancestor(&plan, 0, plan.len()));
    }

    #[test]
    fn test_cancer_database_is_recorded_but_not_staged() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa"]);
        let without = plan(&config().build().unwrap(), &fs).unwrap();
        assert!(without.cancer_db().is_none());

        let config = config()
            .cancer_db(Some(PathBuf::from("/ref/cosmic.vcf.gz")))
            .build()
            .unwrap();
        let plan = plan(&config, &fs).unwrap();

        assert_eq!(plan.cancer_db(), Some(Path::new("/ref/cosmic.vcf.gz")));
        assert_eq!(plan.kinds(), without.kinds());
        assert!(plan.stages().iter().all(|run| run
            .io
            .inputs
            .iter()
            .all(|input| input.path.as_path() != Path::new("/ref/cosmic.vcf.gz"))));
    }

    #[test]
    fn test_forced_recalibration_without_database_fails() {
        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa"]);
        let config = config()
            .quality_strategy(Some(QualityStrategy::UseRecalibration))
            .build()
            .unwrap();

        let result = plan(&config, &fs);
        assert!(matches!(
            result,
            Err(PlanningError::MissingInput {
                stage: StageKind::BaseQualityRecalibrate,
                role: ArtifactRole::KnownVariants,
            })
        ));
    }

    #[test]
    fn test_missing_input_file_fails_planning() {
        let fs = FakeFs::with(&["/ref/hg38.fa"]);
        let result = plan(&config().build().unwrap(), &fs);
        assert!(matches!(
            result,
            Err(PlanningError::InputNotFound {
                stage: StageKind::MateFix,
                role: ArtifactRole::InputAlignment,
                ..
            })
        ));
    }

    #[test]
    fn test_replanning_after_success_skips_everything() {
        let fs = FakeFs::default();
        fs.touch("/data/s.bam", 1);
        fs.touch("/ref/hg38.fa", 1);
        let config = config().build().unwrap();

        let first = plan(&config, &fs).unwrap();
        for (offset, run) in first.stages().iter().enumerate() {
            for output in &run.io.outputs {
                fs.touch(&output.path, 10 + offset as u64);
            }
        }

        let second = plan(&config, &fs).unwrap();
        assert!(second
            .stages()
            .iter()
            .all(|run| run.status == StageStatus::Skipped));
        assert_eq!(second.pending(), 0);
    }

    #[test]
    fn test_rerun_upstream_invalidates_downstream() {
        let fs = FakeFs::default();
        fs.touch("/data/s.bam", 1);
        fs.touch("/ref/hg38.fa", 1);
        let config = config().build().unwrap();

        // Only the downstream outputs exist: mate-fix must run again, so every
        // stage after it is stale even though its files look fresh.
        fs.touch("/out/s.dedup.bam", 20);
        fs.touch("/out/s.dedup.metrics.txt", 20);
        fs.touch("/out/s.realn.bam", 20);
        fs.touch("/out/s.iq.bam", 20);

        let plan = plan(&config, &fs).unwrap();
        assert!(plan
            .stages()
            .iter()
            .all(|run| run.status == StageStatus::Pending));
    }

    #[test]
    fn test_partial_resume() {
        let fs = FakeFs::default();
        fs.touch("/data/s.bam", 1);
        fs.touch("/ref/hg38.fa", 1);
        fs.touch("/out/s.matefix.bam", 5);
        let config = config().build().unwrap();

        let plan = plan(&config, &fs).unwrap();
        let statuses: Vec<_> = plan.stages().iter().map(|run| run.status).collect();
        assert_eq!(
            statuses,
            vec![
                StageStatus::Skipped,
                StageStatus::Pending,
                StageStatus::Pending,
                StageStatus::Pending,
            ]
        );
    }

    #[test]
    fn test_targets_reach_recalibration() {
        let fs = FakeFs::with(&[
            "/data/s.bam",
            "/ref/hg38.fa",
            "/ref/dbsnp.vcf.gz",
            "/ref/panel.bed",
        ]);
        let config = config()
            .known_variants(Some(PathBuf::from("/ref/dbsnp.vcf.gz")))
            .targets(Some(PathBuf::from("/ref/panel.bed")))
            .build()
            .unwrap();
        let plan = plan(&config, &fs).unwrap();

        let recal = plan
            .stages()
            .iter()
            .find(|run| run.stage == StageKind::BaseQualityRecalibrate)
            .unwrap();
        assert_eq!(
            recal.io.input(ArtifactRole::TargetRegions),
            Some(Path::new("/ref/panel.bed"))
        );
        assert!(recal.commands.iter().all(|cmd| cmd.args.contains(&"-L".to_string())));
    }

    fn no_commands(
        _: StageKind,
        _: &StageIo,
        _: &RunConfig,
    ) -> Result<Vec<ToolCommand>, PlanningError> {
        Ok(Vec::new())
    }

    #[test]
    fn test_cycle_detected() {
        let registry = StageRegistry::new(vec![
            StageDef {
                kind: StageKind::MateFix,
                inclusion: Inclusion::Always,
                inputs: vec![InputRequirement::Required(ArtifactRole::Realigned)],
                outputs: vec![OutputDecl {
                    role: ArtifactRole::MateFixed,
                    suffix: "a.bam",
                }],
                build: no_commands,
            },
            StageDef {
                kind: StageKind::IndelRealign,
                inclusion: Inclusion::Always,
                inputs: vec![InputRequirement::Required(ArtifactRole::MateFixed)],
                outputs: vec![OutputDecl {
                    role: ArtifactRole::Realigned,
                    suffix: "b.bam",
                }],
                build: no_commands,
            },
        ])
        .unwrap();

        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa"]);
        let result = plan_with(&registry, &config().build().unwrap(), &fs);
        assert!(matches!(result, Err(PlanningError::Cycle(stages)) if stages.len() == 2));
    }

    #[test]
    fn test_independent_stages_keep_catalog_order() {
        // Declared dependent-first to check ordering is by dependency, and
        // independent stages follow declaration order.
        let registry = StageRegistry::new(vec![
            StageDef {
                kind: StageKind::DuplicateMark,
                inclusion: Inclusion::Always,
                inputs: vec![InputRequirement::Required(ArtifactRole::MateFixed)],
                outputs: vec![OutputDecl {
                    role: ArtifactRole::Deduplicated,
                    suffix: "dedup.bam",
                }],
                build: no_commands,
            },
            StageDef {
                kind: StageKind::IndelQualityAnnotate,
                inclusion: Inclusion::Always,
                inputs: vec![InputRequirement::Required(ArtifactRole::InputAlignment)],
                outputs: vec![OutputDecl {
                    role: ArtifactRole::IndelQualAnnotated,
                    suffix: "iq.bam",
                }],
                build: no_commands,
            },
            StageDef {
                kind: StageKind::MateFix,
                inclusion: Inclusion::Always,
                inputs: vec![InputRequirement::Required(ArtifactRole::InputAlignment)],
                outputs: vec![OutputDecl {
                    role: ArtifactRole::MateFixed,
                    suffix: "matefix.bam",
                }],
                build: no_commands,
            },
        ])
        .unwrap();

        let fs = FakeFs::with(&["/data/s.bam", "/ref/hg38.fa"]);
        let plan = plan_with(&registry, &config().build().unwrap(), &fs).unwrap();
        assert_eq!(
            plan.kinds(),
            vec![
                StageKind::IndelQualityAnnotate,
                StageKind::MateFix,
                StageKind::DuplicateMark,
            ]
        );
    }
}
