//! Experiments
//!
//! - [`definition`]: application definitions and their builder
//! - [`builtin`]: the generic executable application and catalog
//! - [`instance`]: one concrete experiment with its variables and state
//! - [`set`]: generating experiments from a workspace
//! - [`state`]: persisted per-experiment progress

pub mod builtin;
pub mod definition;
pub mod instance;
pub mod set;
pub mod state;

pub use definition::{
    ApplicationDefinition, Executable, ExperimentPhases, FigureOfMerit, SuccessCriterion, Workload,
};
pub use instance::Experiment;
pub use set::DefinitionCatalog;
pub use state::{ExperimentState, FomValue};
