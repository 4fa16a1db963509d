//! Plan executor
//!
//! Drives a [`PipelinePlan`] to completion. A single orchestrating task
//! schedules ready stages onto worker tasks; a semaphore sized to the plan's
//! parallelism bounds how many tools run at once. A stage is ready when every
//! stage producing its inputs has succeeded or was skipped.
//!
//! Failure handling is fail-fast: after the first failed stage nothing new is
//! scheduled, stages already running are allowed to finish, and the partial
//! outputs of the failed stage are removed. Outputs of succeeded stages stay
//! on disk so the next plan can skip them.

use chrono::Utc;
use somprep_core::domain::artifact::validate_output;
use somprep_core::domain::log::{LogEntry, LogLevel};
use somprep_core::{
    FailureKind, PipelinePlan, RunFailure, RunResult, StageKind, StageRun, StageStatus, ToolCommand,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::execution::StageOutcome;
use crate::tool::{ToolOutput, ToolRunner};

type Joined = Result<(Id, (usize, StageOutcome)), JoinError>;

/// Mutable state of one execution, owned by the orchestrating task
struct RunState {
    result: RunResult,
    statuses: Vec<StageStatus>,
    running: HashMap<Id, usize>,
    failure: Option<RunFailure>,
}

/// Executes pipeline plans
pub struct Executor {
    runner: Arc<dyn ToolRunner>,
    config: ExecutorConfig,
    abort: Option<watch::Receiver<bool>>,
}

impl Executor {
    /// Creates an executor invoking tools through `runner`
    pub fn new(runner: Arc<dyn ToolRunner>, config: ExecutorConfig) -> Self {
        Self {
            runner,
            config,
            abort: None,
        }
    }

    /// Stops scheduling once `true` is sent on the channel
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Runs the plan and returns the accumulated result
    pub async fn execute(&self, plan: &PipelinePlan) -> RunResult {
        let mut state = RunState {
            result: RunResult::start(plan),
            statuses: plan.stages().iter().map(|run| run.status).collect(),
            running: HashMap::new(),
            failure: None,
        };
        let semaphore = Arc::new(Semaphore::new(plan.parallelism()));
        let mut tasks: JoinSet<(usize, StageOutcome)> = JoinSet::new();
        let mut abort = self.abort.clone();
        let mut aborted = false;

        info!(
            "Executing run {}: {} stage(s), {} to run, parallelism {}",
            plan.run_id(),
            plan.len(),
            plan.pending(),
            plan.parallelism()
        );
        state.result.log(
            LogLevel::Info,
            format!("Starting run {} ({} quality strategy)", plan.run_id(), plan.strategy()),
        );
        for run in plan.stages() {
            if run.status == StageStatus::Skipped {
                state
                    .result
                    .log(LogLevel::Info, format!("Stage '{}' is up to date, skipped", run.stage));
            }
        }

        loop {
            if !aborted && abort_set(&abort) {
                aborted = true;
                self.note_abort(&mut state);
            }
            if aborted {
                break;
            }

            if state.failure.is_none() {
                self.schedule(plan, &semaphore, &mut tasks, &mut state);
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    if let Some(joined) = joined {
                        self.complete(plan, joined, &mut state).await;
                    }
                }
                _ = abort_requested(&mut abort) => {
                    aborted = true;
                    self.note_abort(&mut state);
                }
            }
        }

        if aborted && !tasks.is_empty() {
            self.wind_down(plan, &mut tasks, &mut state).await;
        }

        self.finish(plan, state, aborted)
    }

    /// Starts every ready stage a worker slot is available for
    fn schedule(
        &self,
        plan: &PipelinePlan,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<(usize, StageOutcome)>,
        state: &mut RunState,
    ) {
        for (index, run) in plan.stages().iter().enumerate() {
            if state.statuses[index] != StageStatus::Pending {
                continue;
            }
            if !run
                .depends_on
                .iter()
                .all(|&dep| state.statuses[dep].is_complete())
            {
                continue;
            }
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                debug!("All workers busy, '{}' waits", run.stage);
                break;
            };

            info!("Starting stage '{}'", run.stage);
            state.statuses[index] = StageStatus::Running;
            let record = &mut state.result.stages[index];
            record.status = StageStatus::Running;
            record.started_at = Some(Utc::now());
            state
                .result
                .log(LogLevel::Info, format!("Starting stage: {}", run.stage));

            let log_dir = self
                .config
                .write_stage_logs
                .then(|| plan.out_dir().join("logs"));
            let handle = tasks.spawn(run_stage(
                index,
                run.clone(),
                Arc::clone(&self.runner),
                self.config.clone(),
                log_dir,
                permit,
            ));
            state.running.insert(handle.id(), index);
        }
    }

    /// Records the outcome of a finished worker task
    async fn complete(&self, plan: &PipelinePlan, joined: Joined, state: &mut RunState) {
        let (index, mut outcome) = match joined {
            Ok((id, (index, outcome))) => {
                state.running.remove(&id);
                (index, outcome)
            }
            Err(err) => {
                let Some(index) = state.running.remove(&err.id()) else {
                    error!("Unknown stage task ended: {}", err);
                    return;
                };
                let outcome = if err.is_cancelled() {
                    // Only the abort path cancels tasks
                    StageOutcome::Timeout {
                        limit: self.config.abort_grace,
                    }
                } else {
                    StageOutcome::Failure {
                        error: format!("stage task panicked: {}", err),
                        exit_code: None,
                        diagnostics: Vec::new(),
                        logs: Vec::new(),
                    }
                };
                (index, outcome)
            }
        };

        let run = &plan.stages()[index];
        state.result.logs.extend(outcome.take_logs());

        let status = outcome.status();
        state.statuses[index] = status;
        let record = &mut state.result.stages[index];
        record.status = status;
        record.completed_at = Some(Utc::now());
        record.exit_code = outcome.exit_code();

        match outcome.into_failure(run.stage) {
            None => {
                info!("Stage '{}' succeeded", run.stage);
                state
                    .result
                    .log(LogLevel::Info, format!("Stage '{}' completed", run.stage));
            }
            Some(stage_failure) => {
                error!("{}", stage_failure.message);
                state
                    .result
                    .log(LogLevel::Error, stage_failure.message.clone());
                remove_partial_outputs(run).await;

                if state.failure.is_none() {
                    state.result.log(
                        LogLevel::Warning,
                        "Fail-fast: no further stages will be started",
                    );
                    state.failure = Some(stage_failure);
                }
            }
        }
    }

    fn note_abort(&self, state: &mut RunState) {
        warn!(
            "Abort requested, waiting up to {:?} for {} running stage(s)",
            self.config.abort_grace,
            state.running.len()
        );
        state.result.log(
            LogLevel::Warning,
            "Abort requested, no further stages will be started",
        );
    }

    /// Lets in-flight stages finish within the grace period, then kills them
    async fn wind_down(
        &self,
        plan: &PipelinePlan,
        tasks: &mut JoinSet<(usize, StageOutcome)>,
        state: &mut RunState,
    ) {
        let drained = tokio::time::timeout(self.config.abort_grace, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                self.complete(plan, joined, state).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Grace period elapsed, terminating {} running stage(s)",
                tasks.len()
            );
            tasks.abort_all();
            while let Some(joined) = tasks.join_next_with_id().await {
                self.complete(plan, joined, state).await;
            }
        }
    }

    fn finish(&self, plan: &PipelinePlan, mut state: RunState, aborted: bool) -> RunResult {
        let not_started: Vec<StageKind> = state.result.not_started().collect();
        if !not_started.is_empty() {
            let names: Vec<&str> = not_started.iter().map(StageKind::name).collect();
            state.result.log(
                LogLevel::Warning,
                format!("Stage(s) never started: {}", names.join(", ")),
            );
        }

        let mut result = state.result;
        if let Some(failure) = state.failure {
            result.finish_failure(failure);
        } else if aborted {
            result.finish_failure(RunFailure {
                kind: FailureKind::Aborted,
                stage: None,
                message: "Run aborted before completion".to_string(),
                diagnostics: Vec::new(),
            });
        } else if state.statuses.iter().all(StageStatus::is_complete) {
            let final_alignment = plan.final_alignment().to_path_buf();
            info!("Run {} succeeded: {}", plan.run_id(), final_alignment.display());
            result.log(
                LogLevel::Info,
                format!("Pipeline completed: {}", final_alignment.display()),
            );
            result.finish_success(final_alignment);
        } else {
            result.finish_failure(RunFailure {
                kind: FailureKind::Stage,
                stage: None,
                message: "Some stages could not be scheduled".to_string(),
                diagnostics: Vec::new(),
            });
        }

        result
    }
}

fn abort_set(abort: &Option<watch::Receiver<bool>>) -> bool {
    abort.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once an abort is requested; never resolves without a channel
async fn abort_requested(abort: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = abort {
        if rx.wait_for(|requested| *requested).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Worker task body: runs one stage, bounded by the stage timeout
async fn run_stage(
    index: usize,
    run: StageRun,
    runner: Arc<dyn ToolRunner>,
    config: ExecutorConfig,
    log_dir: Option<PathBuf>,
    _permit: OwnedSemaphorePermit,
) -> (usize, StageOutcome) {
    let invocation = invoke_stage(&run, runner.as_ref(), &config, log_dir.as_deref());

    let outcome = match config.stage_timeout {
        Some(limit) => match tokio::time::timeout(limit, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Stage '{}' exceeded {:?}, terminated", run.stage, limit);
                StageOutcome::Timeout { limit }
            }
        },
        None => invocation.await,
    };

    (index, outcome)
}

/// Runs a stage's commands in order and validates its outputs
async fn invoke_stage(
    run: &StageRun,
    runner: &dyn ToolRunner,
    config: &ExecutorConfig,
    log_dir: Option<&Path>,
) -> StageOutcome {
    let stage = run.stage;
    let mut logs = Vec::new();

    for output in &run.io.outputs {
        let Some(parent) = output.path.parent() else {
            continue;
        };
        if parent.as_os_str().is_empty() {
            continue;
        }
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return StageOutcome::Failure {
                error: format!("failed to create {}: {}", parent.display(), e),
                exit_code: None,
                diagnostics: Vec::new(),
                logs,
            };
        }
    }

    let mut last_exit = None;
    for command in &run.commands {
        logs.push(LogEntry::now(LogLevel::Info, format!("[{}] {}", stage, command)));

        let output = match runner.run(command).await {
            Ok(output) => output,
            Err(e) => {
                logs.push(LogEntry::now(LogLevel::Error, format!("[{}] {}", stage, e)));
                return StageOutcome::Failure {
                    error: e.to_string(),
                    exit_code: None,
                    diagnostics: Vec::new(),
                    logs,
                };
            }
        };

        if let Some(dir) = log_dir {
            if let Err(e) = append_stage_log(dir, stage, command, &output).await {
                warn!("Failed to write log of stage '{}': {}", stage, e);
            }
        }

        last_exit = output.exit_code;
        if !output.success() {
            let error = match output.exit_code {
                Some(code) => format!("{} exited with code {}", command.program, code),
                None => format!("{} was terminated by a signal", command.program),
            };
            logs.push(LogEntry::now(LogLevel::Error, format!("[{}] {}", stage, error)));
            return StageOutcome::Failure {
                error,
                exit_code: output.exit_code,
                diagnostics: output.stderr_tail(config.diagnostic_lines),
                logs,
            };
        }
    }

    for output in &run.io.outputs {
        if let Err(e) = validate_output(&output.path, output.role.format()) {
            logs.push(LogEntry::now(LogLevel::Error, format!("[{}] {}", stage, e)));
            return StageOutcome::Failure {
                error: e.to_string(),
                exit_code: last_exit,
                diagnostics: Vec::new(),
                logs,
            };
        }
    }

    StageOutcome::Success {
        exit_code: last_exit,
        logs,
    }
}

/// Appends one invocation's output to `<dir>/<stage>.log`
async fn append_stage_log(
    dir: &Path,
    stage: StageKind,
    command: &ToolCommand,
    output: &ToolOutput,
) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.log", stage.name())))
        .await?;

    let mut text = format!("== {} $ {}\n", Utc::now().to_rfc3339(), command);
    text.push_str(&output.stdout);
    text.push_str(&output.stderr);
    text.push_str(&format!("== exit code: {:?}\n", output.exit_code));

    file.write_all(text.as_bytes()).await?;
    file.flush().await
}

/// Deletes whatever a failed stage left behind
async fn remove_partial_outputs(run: &StageRun) {
    for output in &run.io.outputs {
        match tokio::fs::remove_file(&output.path).await {
            Ok(()) => debug!("Removed partial output {}", output.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial output {}: {}",
                output.path.display(),
                e
            ),
        }
    }
}
