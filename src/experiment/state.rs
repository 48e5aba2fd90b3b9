//! Experiment State Persistence
//!
//! Progress of an experiment across pipeline runs, saved as JSON to
//! `.hpcrunner_state` inside its run directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::phases::Pipeline;
use crate::workflow_manager::ExperimentStatus;

/// File name of the persisted state.
pub const STATE_FILE: &str = ".hpcrunner_state";

/// One extracted figure of merit.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FomValue {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
}

/// Persistent state of one experiment.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExperimentState {
    pub namespace: String,

    /// Phases that reached DONE, per pipeline
    #[serde(default)]
    pub completed_phases: BTreeMap<Pipeline, BTreeSet<String>>,

    /// Pipeline and phase of the last failure
    #[serde(default)]
    pub failed_phase: Option<(Pipeline, String)>,

    #[serde(default)]
    pub status: ExperimentStatus,

    #[serde(default)]
    pub figures_of_merit: Vec<FomValue>,

    /// Outcome of the success criteria, once analyzed
    #[serde(default)]
    pub success: Option<bool>,

    pub timestamp: DateTime<Utc>,
}

impl ExperimentState {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            completed_phases: BTreeMap::new(),
            failed_phase: None,
            status: ExperimentStatus::Unknown,
            figures_of_merit: Vec::new(),
            success: None,
            timestamp: Utc::now(),
        }
    }

    pub fn state_file(run_dir: &Path) -> PathBuf {
        run_dir.join(STATE_FILE)
    }

    /// Loads the state saved in `run_dir`.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = Self::state_file(run_dir);
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let state = serde_json::from_str(&content)?;
        debug!("Loaded experiment state from {}", path.display());
        Ok(state)
    }

    /// Loads the saved state, or starts a fresh one if none can be read.
    pub fn load_or_new(run_dir: &Path, namespace: &str) -> Self {
        match Self::load(run_dir) {
            Ok(state) if state.namespace == namespace => state,
            Ok(_) | Err(_) => Self::new(namespace),
        }
    }

    /// Writes the state into `run_dir`; a missing run directory means the
    /// experiment was never set up and nothing is written.
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        if !run_dir.is_dir() {
            debug!(
                "Run directory {} does not exist, state of '{}' not saved",
                run_dir.display(),
                self.namespace
            );
            return Ok(());
        }
        let path = Self::state_file(run_dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        debug!("Saved experiment state to {}", path.display());
        Ok(())
    }

    /// Forgets the progress of one pipeline before it runs again.
    pub fn reset(&mut self, pipeline: Pipeline) {
        self.completed_phases.remove(&pipeline);
        if matches!(&self.failed_phase, Some((p, _)) if *p == pipeline) {
            self.failed_phase = None;
        }
        self.timestamp = Utc::now();
    }

    pub fn mark_completed(&mut self, pipeline: Pipeline, phase: &str) {
        self.completed_phases
            .entry(pipeline)
            .or_default()
            .insert(phase.to_string());
        self.timestamp = Utc::now();
    }

    pub fn mark_failed(&mut self, pipeline: Pipeline, phase: &str) {
        self.failed_phase = Some((pipeline, phase.to_string()));
        self.timestamp = Utc::now();
    }

    pub fn is_completed(&self, pipeline: Pipeline, phase: &str) -> bool {
        self.completed_phases
            .get(&pipeline)
            .is_some_and(|phases| phases.contains(phase))
    }

    pub fn has_failed(&self) -> bool {
        self.failed_phase.is_some()
    }
}
