//! Per-request orchestration: container job, tasks, expansion, factory

mod expand;
mod task;

pub mod factory;
pub mod job;

pub use factory::JobFactory;
pub use job::{ContainerJob, ContainerState, JobHandle, JobOutcome, JobSummary};
