//! External tool invocation
//!
//! Stages shell out through the [`ToolRunner`] trait. The process-backed
//! implementation spawns the program directly (no shell), captures stdout and
//! stderr, and kills the child if the invocation future is dropped, which is
//! how stage timeouts and aborts terminate running tools.

use async_trait::async_trait;
use somprep_core::ToolCommand;
use std::process::Stdio;
use thiserror::Error;
use tracing::debug;

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The last `lines` non-empty lines of stderr
    pub fn stderr_tail(&self, lines: usize) -> Vec<String> {
        let all: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();
        let start = all.len().saturating_sub(lines);
        all[start..].iter().map(|line| line.to_string()).collect()
    }
}

/// The tool could not be run at all
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs external tools on behalf of stages
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs the command to completion
    ///
    /// A non-zero exit is not an error here; callers classify the output.
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessToolRunner;

impl ProcessToolRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolError> {
        debug!("Executing: {}", command);

        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.success() {
            debug!(
                "Command completed successfully: stdout_len={}, stderr_len={}",
                result.stdout.len(),
                result.stderr.len()
            );
        } else {
            debug!(
                "Command failed: program={} exit_code={:?} stderr='{}'",
                command.program,
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail() {
        let output = ToolOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "one\n\ntwo\nthree\n".to_string(),
        };
        assert_eq!(output.stderr_tail(2), vec!["two", "three"]);
        assert_eq!(output.stderr_tail(10).len(), 3);
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let command = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");

        let output = ProcessToolRunner::new().run(&command).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let command = ToolCommand::new("somprep-definitely-not-installed");
        let result = ProcessToolRunner::new().run(&command).await;
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }
}
