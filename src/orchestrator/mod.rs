//! Application-level orchestration.
//!
//! This module owns the job lifecycle (submit, reconcile, stop, results) and the
//! post-job processing that renders and saves what a finished job produced. CLI layers
//! call into this module to keep responsibilities separated.

mod controller;
mod poller;
mod post_process;

pub use controller::{ControllerSettings, LifecycleController};
pub(crate) use post_process::process_job_completion;
