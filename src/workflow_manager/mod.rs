//! Workflow Manager Module
//!
//! Adapters between experiments and batch schedulers. A manager contributes
//! default variables and templates to the experiment it is bound to, and
//! turns scheduler state into an [`ExperimentStatus`].
//!
//! Supported managers form a closed set, see [`WorkflowManagerKind`].

pub mod slurm;
pub mod status;
pub mod template;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::execution::command::CommandRunner;
use crate::phases::conditional_expand;
use crate::variables::{Expander, Variable};

pub use status::ExperimentStatus;
pub use template::TemplateSpec;

static NO_STATUS: Lazy<HashMap<&'static str, ExperimentStatus>> = Lazy::new(HashMap::new);

/// Default variable contributed by a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerVariable {
    pub name: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

impl ManagerVariable {
    pub fn to_variable(&self) -> Variable {
        Variable::new(self.name, self.default).with_description(self.description)
    }
}

/// Settings handed to a manager at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Interpreter for rendered scripts
    pub shell: String,
    pub squeue: String,
    pub sacct: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
        }
    }
}

/// Supported schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowManagerKind {
    /// Experiments run directly, without a scheduler
    None,
    Slurm,
}

impl WorkflowManagerKind {
    /// Selects a kind by (case-insensitive) name; `None` and the empty
    /// string select no scheduler.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(WorkflowManagerKind::None),
            "slurm" => Ok(WorkflowManagerKind::Slurm),
            _ => Err(Error::UnknownWorkflowManager(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowManagerKind::None => "None",
            WorkflowManagerKind::Slurm => "slurm",
        }
    }
}

impl fmt::Display for WorkflowManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A manager instance bound to at most one experiment.
#[derive(Debug, Clone)]
pub struct WorkflowManager {
    kind: WorkflowManagerKind,
    config: ManagerConfig,
    application: Option<String>,
}

impl WorkflowManager {
    pub fn new(kind: WorkflowManagerKind, config: ManagerConfig) -> Self {
        Self {
            kind,
            config,
            application: None,
        }
    }

    pub fn from_name(name: &str, config: ManagerConfig) -> Result<Self> {
        Ok(Self::new(WorkflowManagerKind::from_name(name)?, config))
    }

    pub fn kind(&self) -> WorkflowManagerKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// True when a real scheduler is behind this manager.
    pub fn is_scheduler(&self) -> bool {
        self.kind != WorkflowManagerKind::None
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Binds the manager to an experiment, identified by namespace.
    pub fn set_application(&mut self, namespace: impl Into<String>) {
        self.application = Some(namespace.into());
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    /// Unbound instance of the same manager.
    pub fn copy(&self) -> Self {
        Self::new(self.kind, self.config.clone())
    }

    pub fn variables(&self) -> Vec<Variable> {
        let defaults: &[ManagerVariable] = match self.kind {
            WorkflowManagerKind::None => &[],
            WorkflowManagerKind::Slurm => slurm::VARIABLES,
        };
        defaults.iter().map(ManagerVariable::to_variable).collect()
    }

    pub fn templates(&self) -> Vec<TemplateSpec> {
        match self.kind {
            WorkflowManagerKind::None => Vec::new(),
            WorkflowManagerKind::Slurm => slurm::templates(),
        }
    }

    pub fn status_map(&self) -> &'static HashMap<&'static str, ExperimentStatus> {
        match self.kind {
            WorkflowManagerKind::None => &NO_STATUS,
            WorkflowManagerKind::Slurm => &slurm::STATUS_MAP,
        }
    }

    /// Expands each template, dropping those with undefined variables.
    pub fn conditional_expand(
        &self,
        expander: &mut Expander,
        templates: &[String],
    ) -> Result<Vec<String>> {
        conditional_expand(expander, templates)
    }

    /// Current status of the bound experiment.
    ///
    /// Query failures are not errors: they are logged and reported as
    /// [`ExperimentStatus::Unknown`].
    pub fn get_status(&self, expander: &mut Expander, dry_run: bool) -> Result<ExperimentStatus> {
        let namespace = self.bound()?;
        match self.kind {
            WorkflowManagerKind::None => Ok(ExperimentStatus::Unknown),
            WorkflowManagerKind::Slurm => {
                let run_dir = expander.expand_var_name("experiment_run_dir")?;
                let status = slurm::get_status(Path::new(&run_dir), &self.config, dry_run);
                debug!("Status of '{}': {}", namespace, status);
                Ok(status)
            }
        }
    }

    /// Cancels the bound experiment's job through the rendered
    /// `batch_cancel` script.
    pub fn cancel(&self, expander: &mut Expander, dry_run: bool) -> Result<()> {
        let namespace = self.bound()?;
        match self.kind {
            WorkflowManagerKind::None => Err(Error::UnsupportedOperation(format!(
                "cannot cancel '{}': no workflow manager",
                namespace
            ))),
            WorkflowManagerKind::Slurm => {
                let script = expander.expand_var_name("batch_cancel")?;
                let shell = CommandRunner::new("batch_cancel", &self.config.shell).with_dry_run(dry_run);
                shell.run_script(Path::new(&script))?;
                info!("Cancelled job of '{}'", namespace);
                Ok(())
            }
        }
    }

    fn bound(&self) -> Result<&str> {
        self.application.as_deref().ok_or_else(|| {
            Error::UnsupportedOperation(format!(
                "workflow manager '{}' is not bound to an experiment",
                self.name()
            ))
        })
    }
}

impl fmt::Display for WorkflowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{Scope, VariableStore};

    #[test]
    fn test_kind_from_name() {
        assert_eq!(WorkflowManagerKind::from_name("None").unwrap(), WorkflowManagerKind::None);
        assert_eq!(WorkflowManagerKind::from_name("").unwrap(), WorkflowManagerKind::None);
        assert_eq!(WorkflowManagerKind::from_name("Slurm").unwrap(), WorkflowManagerKind::Slurm);
        assert!(matches!(
            WorkflowManagerKind::from_name("pbs"),
            Err(Error::UnknownWorkflowManager(_))
        ));
    }

    #[test]
    fn test_slurm_contributes_variables_and_templates() {
        let manager = WorkflowManager::from_name("slurm", ManagerConfig::default()).unwrap();
        let names: Vec<String> = manager.variables().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["job_name", "extra_sbatch_headers", "hostlist"]);
        assert_eq!(manager.templates().len(), 4);
        assert_eq!(manager.status_map().get("R"), Some(&ExperimentStatus::Running));
    }

    #[test]
    fn test_unmanaged_has_nothing_to_contribute() {
        let manager = WorkflowManager::from_name("None", ManagerConfig::default()).unwrap();
        assert!(manager.variables().is_empty());
        assert!(manager.templates().is_empty());
        assert!(manager.status_map().is_empty());
        assert!(!manager.is_scheduler());
    }

    #[test]
    fn test_operations_require_binding() {
        let manager = WorkflowManager::new(WorkflowManagerKind::Slurm, ManagerConfig::default());
        let mut expander = Expander::default();
        assert!(matches!(
            manager.get_status(&mut expander, false),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_unmanaged_status_and_cancel() {
        let mut manager = WorkflowManager::new(WorkflowManagerKind::None, ManagerConfig::default());
        manager.set_application("app.wl.exp");
        let mut expander = Expander::default();
        assert_eq!(
            manager.get_status(&mut expander, false).unwrap(),
            ExperimentStatus::Unknown
        );
        assert!(matches!(
            manager.cancel(&mut expander, false),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_copy_is_unbound() {
        let mut manager = WorkflowManager::new(WorkflowManagerKind::Slurm, ManagerConfig::default());
        manager.set_application("app.wl.exp");
        let copy = manager.copy();
        assert_eq!(copy.kind(), WorkflowManagerKind::Slurm);
        assert_eq!(copy.application(), None);
        assert_eq!(manager.application(), Some("app.wl.exp"));
    }

    #[test]
    fn test_cancel_dry_run_expands_script_path() {
        let mut manager = WorkflowManager::new(WorkflowManagerKind::Slurm, ManagerConfig::default());
        manager.set_application("app.wl.exp");
        let mut store = VariableStore::new();
        store.define(Scope::Experiment, "experiment_run_dir", "/runs/exp");
        let mut expander = Expander::new(store);
        template::define_template_paths(&mut expander, manager.templates().iter());

        manager.cancel(&mut expander, true).unwrap();
        assert!(expander.used_variables().contains("batch_cancel"));
    }
}
