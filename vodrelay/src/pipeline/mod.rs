//! The background job pipeline: queue, worker pool, admission checks,
//! artifact naming and per-job orchestration.

pub mod artifact;
pub mod guard;
pub mod job;
pub mod queue;
pub mod run;
pub mod worker;
