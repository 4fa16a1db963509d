//! Somprep Runner
//!
//! Executes pipeline plans produced by `somprep-core`:
//! - Tool: invocation of external programs behind the `ToolRunner` trait
//! - Executor: dependency-ordered, bounded-parallel, fail-fast scheduling
//! - Report: persistence of the run result
//!
//! Configuration is loaded from environment variables or defaults.

pub mod config;
pub mod execution;
pub mod executor;
pub mod report;
pub mod tool;

pub use config::ExecutorConfig;
pub use execution::StageOutcome;
pub use executor::Executor;
pub use report::{read_report, write_report};
pub use tool::{ProcessToolRunner, ToolError, ToolOutput, ToolRunner};
