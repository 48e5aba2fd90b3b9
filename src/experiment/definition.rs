//! Application Definitions
//!
//! An application definition bundles default variables, executables,
//! workloads, templates, analysis rules and phases. Definitions are built
//! with chained calls and specialized by deriving from a base:
//!
//! ```
//! use hpcrunner::experiment::definition::ApplicationDefinition;
//!
//! let base = ApplicationDefinition::new("base")
//!     .executable("run", ["./bench"], true)
//!     .workload("small", ["run"])
//!     .workload_variable("small", "size", "16", "Problem size");
//!
//! let tuned = base
//!     .derive("tuned")
//!     .workload_variable("small", "size", "32", "Problem size");
//!
//! assert_eq!(tuned.workload_defaults("small")[0].value, "32".into());
//! assert_eq!(base.workload_defaults("small")[0].value, "16".into());
//! ```

use regex::Regex;

use crate::error::{Error, Result};
use crate::phases::{PhaseGraph, PhaseOutcome, Pipeline};
use crate::variables::{Variable, VariableValue};
use crate::workflow_manager::template::{ExtraVarsFn, TemplateSpec};
use crate::workspace::Workspace;

use super::instance::Experiment;

/// Phase graph of experiments.
pub type ExperimentPhases = PhaseGraph<Workspace, Experiment>;

/// Default redirect of executable output.
pub const DEFAULT_LOG_FILE: &str = "{log_file}";

/// A named list of command lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    pub name: String,
    pub commands: Vec<String>,
    /// Prefix each command with `{mpi_command}`
    pub use_mpi: bool,
    /// Append output to this file; `None` leaves output alone
    pub redirect: Option<String>,
}

impl Executable {
    /// Command lines with the MPI prefix and output redirection applied.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|command| {
                let mut line = if self.use_mpi {
                    format!("{{mpi_command}} {}", command)
                } else {
                    command.clone()
                };
                if let Some(redirect) = &self.redirect {
                    line.push_str(&format!(" >> {} 2>&1", redirect));
                }
                line
            })
            .collect()
    }
}

/// Named selection of executables with its own defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub name: String,
    pub executables: Vec<String>,
    pub variables: Vec<Variable>,
}

/// Value extracted from a log file by a named regex group.
#[derive(Debug, Clone)]
pub struct FigureOfMerit {
    pub name: String,
    pub regex: Regex,
    pub group: String,
    /// Path template, relative paths resolve against the run directory
    pub log_file: String,
    pub units: String,
}

/// Pattern that must appear in a file for an experiment to succeed.
#[derive(Debug, Clone)]
pub struct SuccessCriterion {
    pub name: String,
    pub pattern: Regex,
    pub file: String,
}

/// Everything needed to instantiate experiments of one application.
#[derive(Debug, Clone)]
pub struct ApplicationDefinition {
    pub name: String,
    pub variables: Vec<Variable>,
    pub executables: Vec<Executable>,
    pub workloads: Vec<Workload>,
    pub templates: Vec<TemplateSpec>,
    pub figures_of_merit: Vec<FigureOfMerit>,
    pub success_criteria: Vec<SuccessCriterion>,
    pub phases: ExperimentPhases,
}

impl ApplicationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            executables: Vec::new(),
            workloads: Vec::new(),
            templates: Vec::new(),
            figures_of_merit: Vec::new(),
            success_criteria: Vec::new(),
            phases: ExperimentPhases::new(),
        }
    }

    /// Copy of this definition under a new name; later calls override
    /// entries by name.
    pub fn derive(&self, name: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.name = name.into();
        derived.phases = self.phases.derive();
        derived
    }

    /// Application-wide default.
    pub fn variable(
        mut self,
        name: &str,
        default: impl Into<VariableValue>,
        description: &str,
    ) -> Self {
        upsert_variable(
            &mut self.variables,
            Variable::new(name, default).with_description(description),
        );
        self
    }

    /// Adds a fully described default (e.g. with suggested values).
    pub fn variable_def(mut self, variable: Variable) -> Self {
        upsert_variable(&mut self.variables, variable);
        self
    }

    pub fn executable<I, S>(mut self, name: &str, commands: I, use_mpi: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executable = Executable {
            name: name.to_string(),
            commands: commands.into_iter().map(Into::into).collect(),
            use_mpi,
            redirect: Some(DEFAULT_LOG_FILE.to_string()),
        };
        upsert_by_name(&mut self.executables, executable, |e| &e.name);
        self
    }

    /// Changes where an executable's output goes.
    pub fn redirect(mut self, executable: &str, redirect: Option<&str>) -> Self {
        if let Some(exe) = self.executables.iter_mut().find(|e| e.name == executable) {
            exe.redirect = redirect.map(str::to_string);
        }
        self
    }

    pub fn workload<I, S>(mut self, name: &str, executables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let executables: Vec<String> = executables.into_iter().map(Into::into).collect();
        match self.workloads.iter_mut().find(|w| w.name == name) {
            Some(existing) => existing.executables = executables,
            None => self.workloads.push(Workload {
                name: name.to_string(),
                executables,
                variables: Vec::new(),
            }),
        }
        self
    }

    /// Default scoped to one workload; creates the workload if needed.
    pub fn workload_variable(
        mut self,
        workload: &str,
        name: &str,
        default: impl Into<VariableValue>,
        description: &str,
    ) -> Self {
        if !self.workloads.iter().any(|w| w.name == workload) {
            self = self.workload(workload, Vec::<String>::new());
        }
        if let Some(w) = self.workloads.iter_mut().find(|w| w.name == workload) {
            upsert_variable(
                &mut w.variables,
                Variable::new(name, default).with_description(description),
            );
        }
        self
    }

    /// Fully described workload default; creates the workload if needed.
    pub fn workload_variable_def(mut self, workload: &str, variable: Variable) -> Self {
        if !self.workloads.iter().any(|w| w.name == workload) {
            self = self.workload(workload, Vec::<String>::new());
        }
        if let Some(w) = self.workloads.iter_mut().find(|w| w.name == workload) {
            upsert_variable(&mut w.variables, variable);
        }
        self
    }

    pub fn template(mut self, name: &str, dest: &str, source: impl Into<String>) -> Self {
        upsert_by_name(&mut self.templates, TemplateSpec::new(name, dest, source), |t| &t.name);
        self
    }

    pub fn template_with_vars(
        mut self,
        name: &str,
        dest: &str,
        source: impl Into<String>,
        extra_vars: ExtraVarsFn,
    ) -> Self {
        let spec = TemplateSpec::new(name, dest, source).with_extra_vars(extra_vars);
        upsert_by_name(&mut self.templates, spec, |t| &t.name);
        self
    }

    /// Registers a figure of merit. `group` defaults to `name`, `log_file`
    /// to `{log_file}`.
    pub fn figure_of_merit(
        mut self,
        name: &str,
        regex: &str,
        group: Option<&str>,
        log_file: Option<&str>,
        units: &str,
    ) -> Result<Self> {
        let regex = Regex::new(regex)?;
        let group = group.unwrap_or(name).to_string();
        if !regex.capture_names().flatten().any(|g| g == group) {
            return Err(Error::Config(format!(
                "figure of merit '{}' regex has no group named '{}'",
                name, group
            )));
        }
        let fom = FigureOfMerit {
            name: name.to_string(),
            regex,
            group,
            log_file: log_file.unwrap_or(DEFAULT_LOG_FILE).to_string(),
            units: units.to_string(),
        };
        upsert_by_name(&mut self.figures_of_merit, fom, |f| &f.name);
        Ok(self)
    }

    pub fn success_criteria(
        mut self,
        name: &str,
        pattern: &str,
        file: Option<&str>,
    ) -> Result<Self> {
        let criterion = SuccessCriterion {
            name: name.to_string(),
            pattern: Regex::new(pattern)?,
            file: file.unwrap_or(DEFAULT_LOG_FILE).to_string(),
        };
        upsert_by_name(&mut self.success_criteria, criterion, |c| &c.name);
        Ok(self)
    }

    /// Declares a phase and binds its body.
    pub fn phase<F>(
        mut self,
        name: &str,
        pipeline: Pipeline,
        run_before: &[&str],
        run_after: &[&str],
        body: F,
    ) -> Self
    where
        F: Fn(&Workspace, &mut Experiment) -> Result<PhaseOutcome> + Send + Sync + 'static,
    {
        self.phases
            .register(name, pipeline, run_before.iter().copied(), run_after.iter().copied());
        self.phases.bind(name, body);
        self
    }

    pub fn has_workload(&self, name: &str) -> bool {
        self.workloads.iter().any(|w| w.name == name)
    }

    pub fn workload_def(&self, name: &str) -> Result<&Workload> {
        self.workloads.iter().find(|w| w.name == name).ok_or_else(|| {
            Error::Config(format!(
                "application '{}' has no workload '{}'",
                self.name, name
            ))
        })
    }

    pub fn workload_defaults(&self, name: &str) -> &[Variable] {
        self.workloads
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.variables.as_slice())
            .unwrap_or(&[])
    }

    /// Raw `command` value of a workload: its executables' lines, one per line.
    pub fn command_template(&self, workload: &str) -> Result<String> {
        let workload = self.workload_def(workload)?;
        let mut lines = Vec::new();
        for exe_name in &workload.executables {
            let exe = self
                .executables
                .iter()
                .find(|e| &e.name == exe_name)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "workload '{}' of '{}' uses unknown executable '{}'",
                        workload.name, self.name, exe_name
                    ))
                })?;
            lines.extend(exe.command_lines());
        }
        Ok(lines.join("\n"))
    }
}

fn upsert_variable(variables: &mut Vec<Variable>, variable: Variable) {
    upsert_by_name(variables, variable, |v| &v.name);
}

fn upsert_by_name<T, F>(items: &mut Vec<T>, item: T, name: F)
where
    F: Fn(&T) -> &String,
{
    match items.iter().position(|existing| name(existing) == name(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}
