//! Phase-ordered hook pipeline.
//!
//! This crate implements the Keel pipeline runner: six fixed lifecycle phases,
//! fail-fast or continue-on-error policy per phase, per-hook deadlines, and a
//! `finalize` phase that runs exactly once per run.

pub mod callable;
pub mod events;
pub mod phase;
pub mod plan;
pub mod runner;

pub use callable::{CallableRegistry, HookBody, HookFuture};
pub use events::{EventEmitter, RunnerEvent};
pub use phase::Phase;
pub use plan::{ExecutionPlan, Hook, PhasePlan, PlanBuilder};
pub use runner::{HookError, PipelineResult, PipelineRunner, RunnerConfig, FRAMEWORK_HOOK_ID};
