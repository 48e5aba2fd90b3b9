//! Error Types
//!
//! A single error enum shared by the expander, the phase graph, the
//! workflow managers and the workspace loader.

use std::any::Any;
use std::path::PathBuf;

use thiserror::Error;

use crate::phases::{PhaseRecord, Pipeline};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-zero exit (or spawn failure) of an external command.
#[derive(Debug, Clone, Error)]
#[error("command '{command}' failed{}: {message}", .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
pub struct ProcessError {
    /// Rendered command line
    pub command: String,
    /// Exit code, if the process ran at all
    pub code: Option<i32>,
    /// Captured stderr or spawn error
    pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
    /// No scope defines the variable and passthrough is disabled.
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    /// A variable references itself, directly or through a chain.
    #[error("cyclic variable expansion: {}", .chain.join(" -> "))]
    CyclicExpansion { chain: Vec<String> },

    /// A typed cast of an expanded value failed.
    #[error("variable '{name}' expanded to '{value}', which is not a valid {expected}")]
    InvalidValue {
        name: String,
        value: String,
        expected: &'static str,
    },

    /// The run_before/run_after constraints of a pipeline form a loop.
    #[error("phase ordering cycle in pipeline '{pipeline}' between: {}", .phases.join(", "))]
    PhaseCycle {
        pipeline: Pipeline,
        phases: Vec<String>,
    },

    /// A phase body returned a fatal error.
    #[error("phase '{phase}' of pipeline '{pipeline}' failed for experiment '{experiment}': {source}")]
    PhaseFailed {
        phase: String,
        pipeline: Pipeline,
        experiment: String,
        #[source]
        source: Box<Error>,
        /// Every phase reached before the pipeline stopped, the failed one last
        phases: Vec<PhaseRecord>,
    },

    /// A phase body or hook panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// Some experiments of a pipeline run failed; the rest were still attempted.
    #[error("pipeline '{pipeline}' failed for {failed} of {total} experiment(s)")]
    ExperimentsFailed {
        pipeline: Pipeline,
        failed: usize,
        total: usize,
    },

    #[error(transparent)]
    ExternalCommand(#[from] ProcessError),

    /// Operation not available in this context (e.g. cancel without a scheduler).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("unknown workflow manager '{0}'")]
    UnknownWorkflowManager(String),

    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    #[error("unknown pipeline '{0}' (expected one of: setup, execute, analyze, archive)")]
    UnknownPipeline(String),

    /// Workspace description problems.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps the payload of a caught panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Phases a failed pipeline got through; empty for other errors.
    pub fn phase_records(&self) -> &[PhaseRecord] {
        match self {
            Self::PhaseFailed { phases, .. } => phases,
            _ => &[],
        }
    }

    /// True for errors that callers may treat as "not yet available".
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::UndefinedVariable { .. })
    }
}
