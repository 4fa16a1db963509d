//! Stage catalog and run planning

pub mod planner;
pub mod registry;

pub use planner::{PipelinePlan, StageRun, plan, plan_with};
pub use registry::StageRegistry;
