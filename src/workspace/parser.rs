//! Workspace Parser
//!
//! Loads workspace files and turns their inline `definitions` into
//! application definitions layered over the built-in catalog.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::experiment::builtin::{builtin_application, executable_application, CATALOG};
use crate::experiment::set::DefinitionCatalog;
use crate::experiment::ApplicationDefinition;
use crate::variables::{Variable, VariableValue};

use super::config::{DefinitionConfig, ExecutableConfig, VariableDefinition, WorkspaceConfig};

/// Loads and validates a workspace file.
///
/// # Example
///
/// ```rust,no_run
/// use hpcrunner::workspace::load_workspace;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_workspace("workspace.yaml")?;
///     println!("{} application(s)", config.applications.len());
///     Ok(())
/// }
/// ```
pub fn load_workspace(path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
    let path = path.as_ref();
    info!("Loading workspace from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", content.len());

    let config = parse_workspace(&content)?;
    info!(
        "Parsed {} application(s), {} inline definition(s)",
        config.applications.len(),
        config.definitions.len()
    );
    Ok(config)
}

/// Parses and validates workspace YAML.
pub fn parse_workspace(content: &str) -> Result<WorkspaceConfig> {
    let config: WorkspaceConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Structural checks serde cannot express.
pub fn validate_config(config: &WorkspaceConfig) -> Result<()> {
    let mut problems = Vec::new();

    for (app, app_cfg) in &config.applications {
        if app.trim().is_empty() {
            problems.push("application with an empty name".to_string());
        }
        if app_cfg.workloads.is_empty() {
            warn!("Application '{}' lists no workloads", app);
        }
        for (workload, workload_cfg) in &app_cfg.workloads {
            if workload_cfg.experiments.is_empty() {
                warn!("Workload '{}.{}' lists no experiments", app, workload);
            }
            for (name, _) in &workload_cfg.experiments {
                if name.trim().is_empty() {
                    problems.push(format!("experiment with an empty name in {}.{}", app, workload));
                }
            }
        }
    }

    for (name, definition) in &config.definitions {
        if definition.inherits.as_deref() == Some(name.as_str()) {
            problems.push(format!("definition '{}' inherits from itself", name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(problems.join("; ")))
    }
}

/// Built-in definitions plus the workspace's inline ones, in order.
///
/// An inline definition derives from `inherits` (a built-in or an earlier
/// inline definition) or from the generic executable application, and
/// replaces any built-in of the same name.
pub fn build_catalog(config: &WorkspaceConfig) -> Result<DefinitionCatalog> {
    let mut catalog = DefinitionCatalog::new();
    for name in CATALOG {
        catalog.insert(name.to_string(), Arc::new(builtin_application(name)?));
    }

    for (name, definition) in &config.definitions {
        let base = match &definition.inherits {
            Some(parent) => catalog
                .get(parent)
                .ok_or_else(|| Error::UnknownApplication(parent.clone()))?
                .derive(name.as_str()),
            None => executable_application(name),
        };
        let built = apply_definition(base, definition)
            .map_err(|e| Error::Config(format!("in definition '{}': {}", name, e)))?;
        debug!("Defined application '{}'", name);
        catalog.insert(name.clone(), Arc::new(built));
    }

    Ok(catalog)
}

fn apply_definition(
    mut def: ApplicationDefinition,
    config: &DefinitionConfig,
) -> Result<ApplicationDefinition> {
    for (name, variable) in &config.variables {
        def = def.variable_def(to_variable(name, variable)?);
    }

    for (name, executable) in &config.executables {
        def = match executable {
            ExecutableConfig::Commands(commands) => def.executable(name, commands, false),
            ExecutableConfig::Full {
                commands,
                use_mpi,
                redirect,
            } => {
                let def = def.executable(name, commands, *use_mpi);
                match redirect {
                    // An empty redirect sends output to the terminal
                    Some(target) if target.is_empty() => def.redirect(name, None),
                    Some(target) => def.redirect(name, Some(target)),
                    None => def,
                }
            }
        };
    }

    for (name, workload) in &config.workloads {
        if !workload.executables.is_empty() || !def.has_workload(name) {
            def = def.workload(name, &workload.executables);
        }
        for (var_name, variable) in &workload.variables {
            def = def.workload_variable_def(name, to_variable(var_name, variable)?);
        }
    }

    for template in &config.templates {
        let dest = template.dest.as_deref().unwrap_or(&template.name);
        def = def.template(&template.name, dest, template.content.as_str());
    }

    for fom in &config.figures_of_merit {
        def = def.figure_of_merit(
            &fom.name,
            &fom.regex,
            fom.group.as_deref(),
            fom.log_file.as_deref(),
            &fom.units,
        )?;
    }

    for criterion in &config.success_criteria {
        def = def.success_criteria(&criterion.name, &criterion.pattern, criterion.file.as_deref())?;
    }

    Ok(def)
}

fn to_variable(name: &str, definition: &VariableDefinition) -> Result<Variable> {
    match definition {
        VariableDefinition::Plain(value) => Ok(Variable::new(name, VariableValue::from_yaml(value)?)),
        VariableDefinition::Described {
            default,
            description,
            values,
        } => {
            let mut variable = Variable::new(name, VariableValue::from_yaml(default)?);
            if let Some(description) = description {
                variable = variable.with_description(description.as_str());
            }
            let suggested = values
                .iter()
                .map(|value| match VariableValue::from_yaml(value)? {
                    VariableValue::Str(s) => Ok(s),
                    other => Err(Error::Config(format!(
                        "suggested value {:?} of '{}' is not a scalar",
                        other, name
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(variable.with_values(suggested))
        }
    }
}
