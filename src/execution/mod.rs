//! Execution
//!
//! - [`command`]: running external programs, with a dry-run mode
//! - [`engine`]: running a pipeline over every experiment of a workspace

pub mod command;
pub mod engine;

pub use command::{CommandRunner, ErrorStream};
pub use engine::{Engine, ExperimentOutcome, RunSummary};
