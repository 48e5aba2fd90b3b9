//! Built-in Applications
//!
//! The generic executable application and its phases, plus a small
//! catalog of ready-made definitions.
//!
//! | pipeline | phases                                              |
//! |----------|-----------------------------------------------------|
//! | setup    | `make_experiments`                                  |
//! | execute  | `submit_experiment`                                 |
//! | analyze  | `check_status`, then `analyze_experiments`          |
//! | archive  | `archive_experiment`                                |

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::execution::command::{CommandRunner, ErrorStream};
use crate::phases::{optional, PhaseOutcome, Pipeline};
use crate::variables::ExpandOptions;
use crate::workspace::Workspace;

use super::definition::ApplicationDefinition;
use super::instance::Experiment;
use super::state::FomValue;

const EXECUTE_EXPERIMENT_TEMPLATE: &str = "#!/bin/bash
# {experiment_namespace}
cd {experiment_run_dir}

{command}
";

const BAR_TEMPLATE: &str = "#!/bin/bash
echo foobar
echo {dynamic_hello_world}
";

/// Names accepted by [`builtin_application`].
pub const CATALOG: &[&str] = &["hostname", "template", "template-inherited"];

/// Base definition every application starts from.
pub fn executable_application(name: &str) -> ApplicationDefinition {
    ApplicationDefinition::new(name)
        .variable("n_nodes", "1", "Number of nodes")
        .variable("processes_per_node", "1", "MPI ranks per node")
        .variable("n_ranks", "{processes_per_node}*{n_nodes}", "Total MPI ranks")
        .variable("n_threads", "1", "Threads per rank")
        .variable("mpi_command", "mpirun -n {n_ranks}", "Launcher prefix of MPI executables")
        .variable("batch_submit", "{execute_experiment}", "Command submitting the experiment")
        .variable(
            "log_file",
            "{experiment_run_dir}/{experiment_name}.out",
            "Output of the experiment's executables",
        )
        .template("execute_experiment", "execute_experiment", EXECUTE_EXPERIMENT_TEMPLATE)
        .phase("make_experiments", Pipeline::Setup, &[], &[], make_experiments)
        .phase("submit_experiment", Pipeline::Execute, &[], &[], submit_experiment)
        .phase("check_status", Pipeline::Analyze, &[], &[], check_status)
        .phase(
            "analyze_experiments",
            Pipeline::Analyze,
            &[],
            &["check_status"],
            analyze_experiments,
        )
        .phase("archive_experiment", Pipeline::Archive, &[], &[], archive_experiment)
}

/// Looks up a catalog definition by name.
pub fn builtin_application(name: &str) -> Result<ApplicationDefinition> {
    match name {
        "hostname" => hostname(),
        "template" => Ok(template()),
        "template-inherited" => Ok(template_inherited()),
        _ => Err(Error::UnknownApplication(name.to_string())),
    }
}

fn hostname() -> Result<ApplicationDefinition> {
    executable_application("hostname")
        .executable("serial", ["hostname"], false)
        .executable("parallel", ["hostname"], true)
        .workload("local", ["serial"])
        .workload("parallel", ["parallel"])
        .figure_of_merit(
            "possible hostname",
            r"^(?P<hostname>[A-Za-z0-9][A-Za-z0-9.\-]*)\s*$",
            Some("hostname"),
            None,
            "",
        )
}

fn template() -> ApplicationDefinition {
    executable_application("template")
        .executable("foo", ["bash {bar}"], false)
        .workload("test_template", ["foo"])
        .workload_variable("test_template", "hello_name", "world", "hello name")
        .template("bar", "bar.sh", BAR_TEMPLATE)
        .phase(
            "ingest_dynamic_variables",
            Pipeline::Setup,
            &["make_experiments"],
            &[],
            ingest_dynamic_variables,
        )
}

fn template_inherited() -> ApplicationDefinition {
    template()
        .derive("template-inherited")
        .workload_variable("test_template", "hello_name", "world-inherited", "hello name")
}

fn ingest_dynamic_variables(_workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    let value = exp.expander_mut().expand_var("\"hello {hello_name}\"")?;
    exp.define_variable("dynamic_hello_world", value);
    Ok(PhaseOutcome::Done)
}

/// Creates the run directory and renders every template into it.
pub fn make_experiments(_workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    let run_dir = exp.run_dir().to_path_buf();
    fs::create_dir_all(&run_dir).map_err(|e| Error::io(&run_dir, e))?;

    let rendered = exp.render_templates()?;
    debug!(
        "Rendered {} template(s) into {}",
        rendered,
        run_dir.display()
    );
    Ok(PhaseOutcome::Done)
}

/// Runs `{batch_submit}` through the workspace shell.
pub fn submit_experiment(workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    if !exp.run_dir().is_dir() && !workspace.dry_run() {
        return Err(Error::Config(format!(
            "experiment '{}' has not been set up (missing {})",
            exp.namespace(),
            exp.run_dir().display()
        )));
    }

    let submit = exp
        .expander_mut()
        .expand_var_name_with("batch_submit", ExpandOptions::strict())?;

    let mut shell = CommandRunner::new("batch_submit", &workspace.manager_config().shell)
        .with_dry_run(workspace.dry_run());
    if exp.run_dir().is_dir() {
        shell = shell.with_working_dir(exp.run_dir());
    }

    let output = shell.command(["-c", submit.as_str()], ErrorStream::Capture)?;
    if !output.trim().is_empty() {
        info!("  [{}] {}", exp.namespace(), output.trim());
    }
    Ok(PhaseOutcome::Done)
}

/// Records the workflow manager's view of the experiment.
pub fn check_status(workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    let status = exp.get_status(workspace)?;
    exp.state_mut().status = status;
    debug!("Experiment '{}' status: {}", exp.namespace(), status);
    Ok(PhaseOutcome::Done)
}

/// Extracts figures of merit and evaluates success criteria.
pub fn analyze_experiments(_workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    let definition = exp.definition().clone();
    let mut foms = Vec::new();
    let mut read_any = false;

    for fom in &definition.figures_of_merit {
        let Some(path) = optional(exp.resolve_path(&fom.log_file))? else {
            debug!("Skipping figure of merit '{}': log file undefined", fom.name);
            continue;
        };
        let Some(content) = read_log(&path) else {
            continue;
        };
        read_any = true;

        for line in content.lines() {
            if let Some(value) = fom
                .regex
                .captures(line)
                .and_then(|caps| caps.name(&fom.group))
            {
                foms.push(FomValue {
                    name: fom.name.clone(),
                    value: value.as_str().to_string(),
                    units: fom.units.clone(),
                });
            }
        }
    }

    let mut success = true;
    for criterion in &definition.success_criteria {
        let passed = match optional(exp.resolve_path(&criterion.file))? {
            Some(path) => match read_log(&path) {
                Some(content) => {
                    read_any = true;
                    criterion.pattern.is_match(&content)
                }
                None => false,
            },
            None => false,
        };
        if !passed {
            debug!(
                "Success criterion '{}' not met for '{}'",
                criterion.name,
                exp.namespace()
            );
            success = false;
        }
    }

    if !read_any {
        return Ok(PhaseOutcome::skipped("no output to analyze"));
    }

    info!(
        "  [{}] {} figure(s) of merit, {}",
        exp.namespace(),
        foms.len(),
        if success { "SUCCESS" } else { "FAILED" }
    );
    let state = exp.state_mut();
    state.figures_of_merit = foms;
    state.success = Some(success);
    Ok(PhaseOutcome::Done)
}

/// Copies the run directory's files into the workspace archive.
pub fn archive_experiment(workspace: &Workspace, exp: &mut Experiment) -> Result<PhaseOutcome> {
    if !exp.run_dir().is_dir() {
        return Ok(PhaseOutcome::skipped("experiment was never set up"));
    }

    let dest = workspace.archive_dir().join(exp.namespace());
    if workspace.dry_run() {
        info!("[dry-run] would archive {} to {}", exp.namespace(), dest.display());
        return Ok(PhaseOutcome::Done);
    }

    // Persist first so the archived state includes this run's progress
    exp.save_state()?;
    let copied = copy_files(exp.run_dir(), &dest)?;
    debug!("Archived {} file(s) of '{}'", copied, exp.namespace());
    Ok(PhaseOutcome::Done)
}

fn read_log(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

fn copy_files(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;
    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(|e| Error::io(src, e))? {
        let entry = entry.map_err(|e| Error::io(src, e))?;
        let path = entry.path();
        if path.is_file() {
            let target = dest.join(entry.file_name());
            fs::copy(&path, &target).map_err(|e| Error::io(&path, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
