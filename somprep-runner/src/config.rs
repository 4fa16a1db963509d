//! Executor configuration
//!
//! Defines the tunable parameters of plan execution: per-stage timeout,
//! abort grace period, how much tool output is kept as diagnostics, and
//! whether per-stage log files are written.

use std::time::Duration;

/// Executor configuration
///
/// Timeouts are configurable to allow tuning for different data sizes
/// (a targeted panel finishes in minutes, a whole genome in hours).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum wall-clock time of one stage, `None` for unlimited
    pub stage_timeout: Option<Duration>,

    /// How long in-flight stages may keep running after an abort request
    pub abort_grace: Duration,

    /// Number of trailing stderr lines kept as failure diagnostics
    pub diagnostic_lines: usize,

    /// Write tool stdout/stderr to `<out_dir>/logs/<stage>.log`
    pub write_stage_logs: bool,
}

impl ExecutorConfig {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            stage_timeout: None,
            abort_grace: Duration::from_secs(30),
            diagnostic_lines: 20,
            write_stage_logs: true,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - SOMPREP_STAGE_TIMEOUT (seconds, 0 = unlimited, default: unlimited)
    /// - SOMPREP_ABORT_GRACE (seconds, default: 30)
    /// - SOMPREP_DIAGNOSTIC_LINES (default: 20)
    /// - SOMPREP_STAGE_LOGS (true/false, default: true)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::new();

        let stage_timeout = match lookup("SOMPREP_STAGE_TIMEOUT") {
            Some(value) => match parse_number::<u64>("SOMPREP_STAGE_TIMEOUT", &value)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => defaults.stage_timeout,
        };

        let abort_grace = lookup("SOMPREP_ABORT_GRACE")
            .map(|value| parse_number::<u64>("SOMPREP_ABORT_GRACE", &value))
            .transpose()?
            .map(Duration::from_secs)
            .unwrap_or(defaults.abort_grace);

        let diagnostic_lines = lookup("SOMPREP_DIAGNOSTIC_LINES")
            .map(|value| parse_number::<usize>("SOMPREP_DIAGNOSTIC_LINES", &value))
            .transpose()?
            .unwrap_or(defaults.diagnostic_lines);

        let write_stage_logs = match lookup("SOMPREP_STAGE_LOGS") {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => anyhow::bail!("SOMPREP_STAGE_LOGS must be true or false, got '{}'", other),
            },
            None => defaults.write_stage_logs,
        };

        Ok(Self {
            stage_timeout,
            abort_grace,
            diagnostic_lines,
            write_stage_logs,
        })
    }

    /// Sets the per-stage timeout
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Sets the abort grace period
    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace = grace;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stage_timeout.is_some_and(|timeout| timeout.is_zero()) {
            anyhow::bail!("stage_timeout must be greater than 0");
        }

        if self.diagnostic_lines == 0 {
            anyhow::bail!("diagnostic_lines must be greater than 0");
        }

        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got '{}'", key, value))
}
