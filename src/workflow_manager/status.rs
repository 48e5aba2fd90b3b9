//! Normalized experiment status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scheduler-independent status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExperimentStatus {
    Setup,
    Running,
    Complete,
    Cancelled,
    #[default]
    Unknown,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Setup => "SETUP",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Complete => "COMPLETE",
            ExperimentStatus::Cancelled => "CANCELLED",
            ExperimentStatus::Unknown => "UNKNOWN",
        }
    }

    /// True once the scheduler will not touch the experiment again.
    pub fn is_finished(&self) -> bool {
        matches!(self, ExperimentStatus::Complete | ExperimentStatus::Cancelled)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SETUP" => Ok(ExperimentStatus::Setup),
            "RUNNING" => Ok(ExperimentStatus::Running),
            "COMPLETE" => Ok(ExperimentStatus::Complete),
            "CANCELLED" => Ok(ExperimentStatus::Cancelled),
            "UNKNOWN" => Ok(ExperimentStatus::Unknown),
            other => Err(format!("unknown experiment status '{}'", other)),
        }
    }
}
