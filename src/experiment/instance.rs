//! Experiment Instances
//!
//! An [`Experiment`] is one concrete run of an application workload: its
//! own variable store and expander, its bound workflow manager, its run
//! directory and its persisted state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::Result;
use crate::phases::{PhaseState, PhaseTarget, Pipeline};
use crate::variables::{ExpandOptions, Expander, Scope, VariableStore, VariableValue};
use crate::workflow_manager::template::define_template_paths;
use crate::workflow_manager::{ExperimentStatus, TemplateSpec, WorkflowManager};
use crate::workspace::Workspace;

use super::definition::ApplicationDefinition;
use super::state::ExperimentState;

/// Separator of the `application.workload.experiment` namespace.
pub const NAMESPACE_SEPARATOR: char = '.';

pub struct Experiment {
    application: String,
    workload: String,
    name: String,
    namespace: String,
    definition: Arc<ApplicationDefinition>,
    expander: Expander,
    workflow_manager: WorkflowManager,
    run_dir: PathBuf,
    state: ExperimentState,
}

impl Experiment {
    /// Builds an experiment from the variables collected for it.
    ///
    /// `store` holds the workspace, application, workload and experiment
    /// scopes; definition and manager defaults plus runtime built-ins are
    /// added here.
    pub fn new(
        definition: Arc<ApplicationDefinition>,
        workload: &str,
        name: &str,
        mut store: VariableStore,
        mut workflow_manager: WorkflowManager,
        run_dir: PathBuf,
    ) -> Result<Self> {
        let command = definition.command_template(workload)?;
        let namespace = [definition.name.as_str(), workload, name].join(".");

        for variable in &definition.variables {
            store.insert(Scope::Default, variable.clone());
        }
        for variable in definition.workload_defaults(workload) {
            store.insert(Scope::Default, variable.clone());
        }
        for variable in workflow_manager.variables() {
            store.insert(Scope::Default, variable);
        }

        let run_dir_str = run_dir.display().to_string();
        define_builtins(
            &mut store,
            &namespace,
            &[
                ("application_name", definition.name.as_str()),
                ("workload_name", workload),
                ("experiment_name", name),
                ("experiment_namespace", namespace.as_str()),
                ("experiment_run_dir", run_dir_str.as_str()),
                ("workflow_manager", workflow_manager.name()),
                ("command", command.as_str()),
            ],
        );

        let mut expander = Expander::new(store);
        define_template_paths(&mut expander, definition.templates.iter());
        define_template_paths(&mut expander, workflow_manager.templates().iter());

        workflow_manager.set_application(namespace.clone());
        let state = ExperimentState::load_or_new(&run_dir, &namespace);

        debug!(
            "Created experiment '{}' (workflow manager: {})",
            namespace, workflow_manager
        );

        Ok(Self {
            application: definition.name.clone(),
            workload: workload.to_string(),
            name: name.to_string(),
            namespace,
            definition,
            expander,
            workflow_manager,
            run_dir,
            state,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `application.workload.experiment`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn definition(&self) -> &Arc<ApplicationDefinition> {
        &self.definition
    }

    pub fn expander(&self) -> &Expander {
        &self.expander
    }

    pub fn expander_mut(&mut self) -> &mut Expander {
        &mut self.expander
    }

    pub fn workflow_manager(&self) -> &WorkflowManager {
        &self.workflow_manager
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ExperimentState {
        &mut self.state
    }

    /// Defines a runtime variable visible to every later expansion.
    pub fn define_variable(&mut self, name: &str, value: impl Into<String>) {
        self.expander.define_variable(name, value.into());
    }

    /// Templates rendered for this experiment: the application's, then
    /// the workflow manager's.
    pub fn templates(&self) -> Vec<TemplateSpec> {
        let mut templates = self.definition.templates.clone();
        templates.extend(self.workflow_manager.templates());
        templates
    }

    /// Renders every template into the run directory.
    pub fn render_templates(&mut self) -> Result<usize> {
        let templates = self.templates();
        for template in &templates {
            template.materialize(&mut self.expander, &self.run_dir)?;
        }
        Ok(templates.len())
    }

    /// Asks the workflow manager for the current status.
    pub fn get_status(&mut self, workspace: &Workspace) -> Result<ExperimentStatus> {
        self.workflow_manager
            .get_status(&mut self.expander, workspace.dry_run())
    }

    /// Cancels the submitted job, if the workflow manager supports it.
    pub fn cancel(&mut self, workspace: &Workspace) -> Result<()> {
        self.workflow_manager
            .cancel(&mut self.expander, workspace.dry_run())
    }

    /// Resolves a path template; relative results are taken inside the
    /// run directory.
    pub fn resolve_path(&mut self, template: &str) -> Result<PathBuf> {
        let expanded = self.expander.expand_var_with(template, ExpandOptions::strict())?;
        let path = PathBuf::from(expanded.trim());
        Ok(if path.is_absolute() {
            path
        } else {
            self.run_dir.join(path)
        })
    }

    /// Prepares the persisted state for a new run of `pipeline`.
    pub fn start_pipeline(&mut self, pipeline: Pipeline) {
        self.state.reset(pipeline);
    }

    pub fn save_state(&self) -> Result<()> {
        self.state.save(&self.run_dir)
    }
}

impl PhaseTarget for Experiment {
    fn target_name(&self) -> String {
        self.namespace.clone()
    }

    fn begin_phase(&mut self, _pipeline: Pipeline, phase: &str) {
        debug!("Starting expansion stage for '{}'", phase);
        self.expander.flush_used_variable_stage();
    }

    fn end_phase(&mut self, pipeline: Pipeline, phase: &str, state: &PhaseState) {
        match state {
            PhaseState::Done => self.state.mark_completed(pipeline, phase),
            PhaseState::Failed(_) => self.state.mark_failed(pipeline, phase),
            _ => {}
        }
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("namespace", &self.namespace)
            .field("workflow_manager", &self.workflow_manager.name())
            .field("run_dir", &self.run_dir)
            .finish()
    }
}

/// Defines the runtime built-ins at experiment scope and returns the names
/// whose user-supplied experiment value they replaced.
fn define_builtins(
    store: &mut VariableStore,
    namespace: &str,
    builtins: &[(&str, &str)],
) -> Vec<String> {
    let mut shadowed = Vec::new();
    for (name, value) in builtins {
        if let Some(existing) = store.get_in(Scope::Experiment, name) {
            if existing.value != VariableValue::from(*value) {
                warn!(
                    "Experiment '{}' defines built-in variable '{}'; it is replaced by '{}'",
                    namespace, name, value
                );
                shadowed.push(name.to_string());
            }
        }
        store.define(Scope::Experiment, *name, *value);
    }
    shadowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_manager::{ManagerConfig, WorkflowManagerKind};

    fn definition() -> Arc<ApplicationDefinition> {
        Arc::new(
            ApplicationDefinition::new("bench")
                .variable("n_threads", "1", "Threads")
                .variable("batch_submit", "{execute_experiment}", "Submission script")
                .executable("run", ["./bench -t {n_threads}"], false)
                .workload("small", ["run"])
                .workload_variable("small", "size", "16", "Size")
                .template("execute_experiment", "execute_experiment", "#!/bin/bash\n{command}\n"),
        )
    }

    fn experiment(kind: WorkflowManagerKind, store: VariableStore) -> Experiment {
        Experiment::new(
            definition(),
            "small",
            "exp1",
            store,
            WorkflowManager::new(kind, ManagerConfig::default()),
            PathBuf::from("/ws/experiments/bench/small/exp1"),
        )
        .unwrap()
    }

    #[test]
    fn test_builtins_replace_user_experiment_values() {
        let mut store = VariableStore::new();
        store.define(Scope::Experiment, "experiment_name", "exp1");
        store.define(Scope::Experiment, "command", "rm -rf /tmp/x");
        store.define(Scope::Workspace, "workflow_manager", "Slurm");

        let shadowed = define_builtins(
            &mut store,
            "bench.small.exp1",
            &[
                ("experiment_name", "exp1"),
                ("command", "./bench"),
                ("workflow_manager", "None"),
            ],
        );
        assert_eq!(shadowed, vec!["command"]);
        assert_eq!(
            store.get_in(Scope::Experiment, "command").map(|v| &v.value),
            Some(&VariableValue::from("./bench"))
        );
    }

    #[test]
    fn test_builtins_and_defaults() {
        let mut exp = experiment(WorkflowManagerKind::None, VariableStore::new());
        let expander = exp.expander_mut();
        assert_eq!(expander.expand_var_name("experiment_namespace").unwrap(), "bench.small.exp1");
        assert_eq!(expander.expand_var_name("size").unwrap(), "16");
        assert_eq!(
            expander.expand_var_name("command").unwrap(),
            "./bench -t 1 >> {log_file} 2>&1"
        );
        assert_eq!(
            expander.expand_var_name("batch_submit").unwrap(),
            "/ws/experiments/bench/small/exp1/execute_experiment"
        );
        assert_eq!(exp.workflow_manager().application(), Some("bench.small.exp1"));
    }

    #[test]
    fn test_workspace_scopes_beat_defaults() {
        let mut store = VariableStore::new();
        store.define(Scope::Workload, "size", "64");
        store.define(Scope::Workspace, "n_threads", "8");
        let mut exp = experiment(WorkflowManagerKind::None, store);
        assert_eq!(exp.expander_mut().expand_var_name("size").unwrap(), "64");
        assert_eq!(exp.expander_mut().expand_var_name("n_threads").unwrap(), "8");
    }

    #[test]
    fn test_slurm_overrides_batch_submit() {
        let mut store = VariableStore::new();
        store.define(Scope::Workspace, "batch_submit", "echo {workflow_manager}");
        let mut exp = experiment(WorkflowManagerKind::Slurm, store);
        assert_eq!(
            exp.expander_mut().expand_var_name("batch_submit").unwrap(),
            "/ws/experiments/bench/small/exp1/batch_submit"
        );
        assert_eq!(exp.templates().len(), 5);
    }

    #[test]
    fn test_phase_hooks_update_state() {
        let mut exp = experiment(WorkflowManagerKind::None, VariableStore::new());
        exp.expander_mut().expand_var_name("size").unwrap();
        exp.begin_phase(Pipeline::Setup, "make_experiments");
        assert!(exp.expander().used_variables().is_empty());

        exp.end_phase(Pipeline::Setup, "make_experiments", &PhaseState::Done);
        assert!(exp.state().is_completed(Pipeline::Setup, "make_experiments"));
    }

    #[test]
    fn test_resolve_path() {
        let mut exp = experiment(WorkflowManagerKind::None, VariableStore::new());
        assert_eq!(
            exp.resolve_path("log.file").unwrap(),
            PathBuf::from("/ws/experiments/bench/small/exp1/log.file")
        );
        assert_eq!(
            exp.resolve_path("{experiment_run_dir}/out").unwrap(),
            PathBuf::from("/ws/experiments/bench/small/exp1/out")
        );
    }
}
