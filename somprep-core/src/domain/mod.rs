//! Core domain types
//!
//! Run configuration, artifacts, stage descriptors, run results and log
//! entries. Planning lives in [`crate::pipeline`], execution in the runner
//! crate.

pub mod artifact;
pub mod config;
pub mod log;
pub mod run;
pub mod stage;
