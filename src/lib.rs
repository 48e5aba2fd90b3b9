//! HPCRunner - Parametrized Experiment Runner
//!
//! Describes benchmark experiments as applications, workloads and
//! variables, then drives them through the setup, execute, analyze and
//! archive pipelines, optionally through a batch scheduler.
//!
//! # Architecture
//!
//! - [`variables`]: scoped variable store and `{name}` expansion
//! - [`phases`]: phase registry, ordering and per-experiment execution
//! - [`workflow_manager`]: scheduler adapters (none, Slurm)
//! - [`experiment`]: application definitions, experiments and their state
//! - [`workspace`]: workspace files and directory layout
//! - [`execution`]: external commands and the pipeline engine
//! - [`monitoring`]: execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use hpcrunner::{Engine, Pipeline, Workspace};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let workspace = Workspace::load("workspace.yaml")?.with_dry_run(true);
//!
//!     let mut engine = Engine::new(&workspace);
//!     engine.set_max_parallel(4);
//!
//!     engine.run(Pipeline::Setup)?.into_result()?;
//!     engine.run(Pipeline::Execute)?.into_result()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod experiment;
pub mod monitoring;
pub mod phases;
pub mod variables;
pub mod workflow_manager;
pub mod workspace;

// Re-export commonly used types
pub use error::{Error, ProcessError, Result};
pub use execution::engine::{Engine, RunSummary};
pub use experiment::{ApplicationDefinition, Experiment};
pub use phases::Pipeline;
pub use variables::{Expander, Scope, VariableStore};
pub use workflow_manager::{ExperimentStatus, WorkflowManager};
pub use workspace::Workspace;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "HPCRunner";
