//! Client for launching security-analysis jobs (network scans, vulnerability scans,
//! traffic captures, forensic inspections) on a remote backend and following them to
//! completion.
//!
//! [`orchestrator::LifecycleController`] drives jobs through a [`gateway::Gateway`]
//! and keeps their state in a [`registry::JobRegistry`].

pub mod cli;
pub mod error;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod payload;
pub mod registry;
pub mod reports;
pub mod storage;
mod text_summary;
pub mod view;

pub use error::ClientError;
