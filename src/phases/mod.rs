//! Phase Module
//!
//! Named, dependency-ordered units of work grouped into pipelines.
//!
//! - [`registry`]: Pipelines, phase declarations and ordering
//! - [`graph`]: Body binding and pipeline execution
//! - [`conditional`]: Expansion helpers that tolerate missing variables

pub mod conditional;
pub mod graph;
pub mod registry;

pub use conditional::{conditional_expand, optional};
pub use graph::{
    PhaseFn, PhaseGraph, PhaseOutcome, PhaseRecord, PhaseState, PhaseTarget, PipelineReport,
};
pub use registry::{Phase, PhaseRegistry, Pipeline};
