//! Experiment Generation
//!
//! Turns the application/workload/experiment sections of a workspace file
//! into concrete [`Experiment`]s.
//!
//! List-valued variables multiply experiments. Lists are zipped by
//! default (all must have the same length); lists named in an
//! experiment's `matrix` are crossed instead, first entry outermost. The
//! experiment name template is expanded against each combination.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::variables::{ExpandOptions, Expander, Scope, VariableStore, VariableValue};
use crate::workflow_manager::{ManagerConfig, WorkflowManager};
use crate::workspace::config::{Entries, WorkspaceConfig};

use super::definition::ApplicationDefinition;
use super::instance::Experiment;

/// Application definitions by name.
pub type DefinitionCatalog = HashMap<String, Arc<ApplicationDefinition>>;

/// Workflow manager used when the workspace does not name one.
pub const DEFAULT_WORKFLOW_MANAGER: &str = "None";

/// Variables of one scope, in declaration order.
type ScopeEntries = Vec<(String, VariableValue)>;

/// Generates every experiment of a workspace, in declaration order.
pub fn generate(
    config: &WorkspaceConfig,
    catalog: &DefinitionCatalog,
    experiments_dir: &Path,
    manager_config: &ManagerConfig,
) -> Result<Vec<Experiment>> {
    let workspace_vars = to_scope_entries(&config.workspace.variables)?;
    let manager_template = config
        .workspace
        .workflow_manager
        .as_deref()
        .unwrap_or(DEFAULT_WORKFLOW_MANAGER);

    let mut experiments = Vec::new();

    for (app_name, app_cfg) in &config.applications {
        let definition = catalog
            .get(app_name)
            .ok_or_else(|| Error::UnknownApplication(app_name.clone()))?;
        let app_vars = to_scope_entries(&app_cfg.variables)?;

        for (workload_name, workload_cfg) in &app_cfg.workloads {
            if !definition.has_workload(workload_name) {
                return Err(Error::Config(format!(
                    "application '{}' has no workload '{}'",
                    app_name, workload_name
                )));
            }
            let workload_vars = to_scope_entries(&workload_cfg.variables)?;
            let mut seen = HashSet::new();

            for (name_template, exp_cfg) in &workload_cfg.experiments {
                let scopes = [
                    (Scope::Workspace, workspace_vars.clone()),
                    (Scope::Application, app_vars.clone()),
                    (Scope::Workload, workload_vars.clone()),
                    (Scope::Experiment, to_scope_entries(&exp_cfg.variables)?),
                ];

                for assignment in combinations(&scopes, &exp_cfg.matrix, name_template)? {
                    let store = build_store(&scopes, &assignment);
                    let mut naming = naming_expander(definition, workload_name, &store);

                    let name = naming
                        .expand_var_with(name_template, ExpandOptions::strict())
                        .map_err(|e| {
                            Error::Config(format!(
                                "cannot expand experiment name '{}': {}",
                                name_template, e
                            ))
                        })?;
                    if !seen.insert(name.clone()) {
                        return Err(Error::Config(format!(
                            "experiment name '{}' is generated more than once in {}.{}",
                            name, app_name, workload_name
                        )));
                    }

                    naming.define_variable("experiment_name", name.as_str());
                    let manager_name =
                        naming.expand_var_with(manager_template, ExpandOptions::strict())?;
                    let manager = WorkflowManager::from_name(&manager_name, manager_config.clone())?;

                    let run_dir = experiments_dir.join(app_name).join(workload_name).join(&name);
                    let experiment = Experiment::new(
                        Arc::clone(definition),
                        workload_name,
                        &name,
                        store,
                        manager,
                        run_dir,
                    )?;
                    debug!("Generated experiment '{}'", experiment.namespace());
                    experiments.push(experiment);
                }
            }
        }
    }

    info!("Generated {} experiment(s)", experiments.len());
    Ok(experiments)
}

fn to_scope_entries(entries: &Entries<serde_yaml::Value>) -> Result<ScopeEntries> {
    entries
        .iter()
        .map(|(name, value)| Ok((name.clone(), VariableValue::from_yaml(value)?)))
        .collect()
}

/// Every assignment of scalar values to list variables, zip first, then
/// matrix crossed in declaration order.
fn combinations(
    scopes: &[(Scope, ScopeEntries)],
    matrix: &[String],
    experiment: &str,
) -> Result<Vec<BTreeMap<String, String>>> {
    // Effective list variables, in declaration order (lowest scope first)
    let mut effective: Vec<(String, Option<Vec<String>>)> = Vec::new();
    for (_, entries) in scopes {
        for (name, value) in entries {
            let list = value.as_list().map(<[String]>::to_vec);
            match effective.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = list,
                None => effective.push((name.clone(), list)),
            }
        }
    }
    let lists: Vec<(String, Vec<String>)> = effective
        .into_iter()
        .filter_map(|(name, list)| list.map(|l| (name, l)))
        .collect();

    for (name, values) in &lists {
        if values.is_empty() {
            return Err(Error::Config(format!(
                "list variable '{}' of experiment '{}' is empty",
                name, experiment
            )));
        }
    }

    let mut matrix_lists = Vec::new();
    for name in matrix {
        let values = lists
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.clone())
            .ok_or_else(|| {
                Error::Config(format!(
                    "matrix variable '{}' of experiment '{}' is not a list",
                    name, experiment
                ))
            })?;
        matrix_lists.push((name.clone(), values));
    }

    let zipped: Vec<&(String, Vec<String>)> =
        lists.iter().filter(|(n, _)| !matrix.contains(n)).collect();
    let zip_len = match zipped.first() {
        Some((_, values)) => values.len(),
        None => 1,
    };
    if let Some((name, values)) = zipped.iter().find(|(_, values)| values.len() != zip_len) {
        return Err(Error::Config(format!(
            "cannot zip list variables of experiment '{}': '{}' has {} values, '{}' has {}",
            experiment,
            zipped[0].0,
            zip_len,
            name,
            values.len()
        )));
    }

    let mut crossed: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    for (name, values) in &matrix_lists {
        crossed = crossed
            .into_iter()
            .flat_map(|partial| {
                values.iter().map(move |value| {
                    let mut next = partial.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }

    let mut result = Vec::with_capacity(zip_len * crossed.len());
    for index in 0..zip_len {
        for partial in &crossed {
            let mut assignment = partial.clone();
            for (name, values) in &zipped {
                assignment.insert(name.clone(), values[index].clone());
            }
            result.push(assignment);
        }
    }
    Ok(result)
}

/// Store of one experiment: every scope's raw values, with list
/// variables replaced by their assigned element.
fn build_store(
    scopes: &[(Scope, ScopeEntries)],
    assignment: &BTreeMap<String, String>,
) -> VariableStore {
    let mut store = VariableStore::new();
    for (scope, entries) in scopes {
        for (name, value) in entries {
            match (value, assignment.get(name)) {
                (VariableValue::List(_), Some(element)) => {
                    store.define(*scope, name.clone(), element.clone())
                }
                _ => store.define(*scope, name.clone(), value.clone()),
            }
        }
    }
    store
}

/// Expander used to name an experiment before it exists.
fn naming_expander(
    definition: &ApplicationDefinition,
    workload: &str,
    store: &VariableStore,
) -> Expander {
    let mut store = store.clone();
    for variable in definition.variables.iter().chain(definition.workload_defaults(workload)) {
        store.insert(Scope::Default, variable.clone());
    }
    store.define(Scope::Experiment, "application_name", definition.name.as_str());
    store.define(Scope::Experiment, "workload_name", workload);
    Expander::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(entries: &[(Scope, &str, VariableValue)]) -> Vec<(Scope, ScopeEntries)> {
        let mut grouped: Vec<(Scope, ScopeEntries)> = Vec::new();
        for (scope, name, value) in entries {
            match grouped.iter_mut().find(|(s, _)| s == scope) {
                Some((_, vars)) => vars.push((name.to_string(), value.clone())),
                None => grouped.push((*scope, vec![(name.to_string(), value.clone())])),
            }
        }
        grouped
    }

    fn list(values: &[&str]) -> VariableValue {
        VariableValue::List(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_zip_pairs_lists() {
        let scopes = scopes(&[
            (Scope::Workspace, "n", list(&["1", "2"])),
            (Scope::Experiment, "m", list(&["a", "b"])),
        ]);
        let combos = combinations(&scopes, &[], "exp").unwrap();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0]["n"], "1");
        assert_eq!(combos[0]["m"], "a");
        assert_eq!(combos[1]["n"], "2");
        assert_eq!(combos[1]["m"], "b");
    }

    #[test]
    fn test_zip_unequal_lengths_is_config_error() {
        let scopes = scopes(&[
            (Scope::Workspace, "n", list(&["1", "2", "3"])),
            (Scope::Workspace, "m", list(&["a", "b"])),
        ]);
        assert!(matches!(
            combinations(&scopes, &[], "exp"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_matrix_crosses_in_declaration_order() {
        let scopes = scopes(&[
            (Scope::Workspace, "n", list(&["1", "2"])),
            (Scope::Workspace, "m", list(&["a", "b"])),
        ]);
        let matrix = vec!["n".to_string(), "m".to_string()];
        let combos = combinations(&scopes, &matrix, "exp").unwrap();
        let pairs: Vec<(String, String)> = combos
            .iter()
            .map(|c| (c["n"].clone(), c["m"].clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("1".to_string(), "a".to_string()),
                ("1".to_string(), "b".to_string()),
                ("2".to_string(), "a".to_string()),
                ("2".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_higher_scope_scalar_hides_list() {
        let scopes = scopes(&[
            (Scope::Workspace, "n", list(&["1", "2"])),
            (Scope::Experiment, "n", VariableValue::from("4")),
        ]);
        let combos = combinations(&scopes, &[], "exp").unwrap();
        assert_eq!(combos.len(), 1);
        assert!(combos[0].is_empty());
    }

    #[test]
    fn test_matrix_must_name_a_list() {
        let scopes = scopes(&[(Scope::Workspace, "n", VariableValue::from("1"))]);
        assert!(matches!(
            combinations(&scopes, &["n".to_string()], "exp"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_build_store_assigns_elements() {
        let scopes = scopes(&[
            (Scope::Workspace, "n", list(&["1", "2"])),
            (Scope::Workspace, "cmd", VariableValue::from("run -n {n}")),
        ]);
        let assignment = BTreeMap::from([("n".to_string(), "2".to_string())]);
        let mut expander = Expander::new(build_store(&scopes, &assignment));
        assert_eq!(expander.expand_var_name("cmd").unwrap(), "run -n 2");
    }
}
