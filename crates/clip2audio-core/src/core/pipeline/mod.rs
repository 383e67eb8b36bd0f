//! Task Pipeline Module
//!
//! Every supported file becomes one [`PipelineRun`]: an explicit chain of
//! [`Task`] records (Stage, then Transform for video, then Finalize) built
//! before anything executes. The [`Scheduler`] runs chains concurrently and
//! reports each terminal [`RunOutcome`] once.

mod run;
mod scheduler;
mod task;

pub use run::{PipelineRun, RunOutcome, RunState, RUN_EVENT_TARGET};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{Task, TaskKind, TaskState};
