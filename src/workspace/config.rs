//! Workspace File Model
//!
//! Serde model of the YAML workspace file. Mappings keep their declaration
//! order, which drives experiment and matrix ordering.
//!
//! # Example YAML Format
//!
//! ```yaml
//! workspace:
//!   workflow_manager: '{wm_name}'
//!   variables:
//!     processes_per_node: 1
//!     wm_name: ['None', 'slurm']
//! applications:
//!   hostname:
//!     workloads:
//!       local:
//!         experiments:
//!           test_{wm_name}:
//!             variables:
//!               n_nodes: 1
//! ```

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_yaml::Value;

/// Ordered `name -> value` entries of a YAML mapping.
pub type Entries<T> = Vec<(String, T)>;

/// Root of a workspace file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default, deserialize_with = "ordered_map")]
    pub applications: Entries<ApplicationConfig>,

    /// Inline application definitions
    #[serde(default, deserialize_with = "ordered_map")]
    pub definitions: Entries<DefinitionConfig>,
}

/// Workspace-wide settings.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkspaceSection {
    /// Overridden by `--dry-run`
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub shell: Option<String>,

    /// Name template, expanded per experiment
    #[serde(default)]
    pub workflow_manager: Option<String>,

    /// Scheduler command overrides
    #[serde(default)]
    pub squeue: Option<String>,
    #[serde(default)]
    pub sacct: Option<String>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<Value>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApplicationConfig {
    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<Value>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub workloads: Entries<WorkloadConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkloadConfig {
    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<Value>,

    /// Experiment name templates
    #[serde(default, deserialize_with = "ordered_map")]
    pub experiments: Entries<ExperimentConfig>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ExperimentConfig {
    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<Value>,

    /// List variables crossed instead of zipped
    #[serde(default, deserialize_with = "single_or_vec")]
    pub matrix: Vec<String>,
}

/// Application definition written in the workspace file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DefinitionConfig {
    /// Built-in or earlier inline definition to derive from
    #[serde(default)]
    pub inherits: Option<String>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub executables: Entries<ExecutableConfig>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub workloads: Entries<WorkloadDefinitionConfig>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<VariableDefinition>,

    #[serde(default)]
    pub figures_of_merit: Vec<FomConfig>,

    #[serde(default)]
    pub success_criteria: Vec<SuccessConfig>,

    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

/// Either a bare command list or a full executable description.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ExecutableConfig {
    Full {
        #[serde(deserialize_with = "single_or_vec")]
        commands: Vec<String>,
        #[serde(default)]
        use_mpi: bool,
        #[serde(default)]
        redirect: Option<String>,
    },
    Commands(#[serde(deserialize_with = "single_or_vec")] Vec<String>),
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkloadDefinitionConfig {
    #[serde(default, deserialize_with = "single_or_vec")]
    pub executables: Vec<String>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub variables: Entries<VariableDefinition>,
}

/// A default with documentation, or just a default.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum VariableDefinition {
    Described {
        default: Value,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        values: Vec<Value>,
    },
    Plain(Value),
}

#[derive(Deserialize, Debug, Clone)]
pub struct FomConfig {
    pub name: String,
    pub regex: String,
    /// Defaults to `name`
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub units: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SuccessConfig {
    pub name: String,
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TemplateConfig {
    pub name: String,
    /// Defaults to `name`
    #[serde(default)]
    pub dest: Option<String>,
    pub content: String,
}

/// Deserializes a mapping into ordered entries with string keys.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Entries<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();
    mapping
        .into_iter()
        .map(|(key, value)| {
            let key = match key {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(de::Error::custom(format!(
                        "expected a string key, found {:?}",
                        other
                    )))
                }
            };
            // `name:` with no body is an empty section or an empty value
            let value = if value.is_null() {
                serde_yaml::from_value(Value::Null)
                    .or_else(|_| serde_yaml::from_value(Value::Mapping(Default::default())))
            } else {
                serde_yaml::from_value(value)
            }
            .map_err(|e| de::Error::custom(format!("in '{}': {}", key, e)))?;
            Ok((key, value))
        })
        .collect()
}

/// Deserializes either a single string or a list of strings.
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("expected string in list")),
            })
            .collect(),
        _ => Err(de::Error::custom("expected string or list of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
workspace:
  workflow_manager: '{wm_name}'
  variables:
    processes_per_node: 1
    wm_name: ['None', 'slurm']
applications:
  hostname:
    workloads:
      local:
        experiments:
          test_{wm_name}:
            variables:
              n_nodes: 1
            matrix: wm_name
          empty:
definitions:
  mine:
    inherits: hostname
    executables:
      run: ./run.sh
      mpi:
        commands: [./a, ./b]
        use_mpi: true
    variables:
      size: 8
      ranks:
        default: 4
        description: Rank count
"#;

    #[test]
    fn test_parse_sample() {
        let config: WorkspaceConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.workspace.workflow_manager.as_deref(), Some("{wm_name}"));
        assert_eq!(config.workspace.variables[0].0, "processes_per_node");
        assert_eq!(config.workspace.variables[1].0, "wm_name");

        let (app, app_cfg) = &config.applications[0];
        assert_eq!(app, "hostname");
        let (_, workload) = &app_cfg.workloads[0];
        let names: Vec<&str> = workload.experiments.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["test_{wm_name}", "empty"]);
        assert_eq!(workload.experiments[0].1.matrix, vec!["wm_name"]);
        assert!(workload.experiments[1].1.variables.is_empty());
    }

    #[test]
    fn test_parse_definitions() {
        let config: WorkspaceConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let (name, def) = &config.definitions[0];
        assert_eq!(name, "mine");
        assert_eq!(def.inherits.as_deref(), Some("hostname"));
        assert!(matches!(&def.executables[0].1, ExecutableConfig::Commands(c) if c == &vec!["./run.sh".to_string()]));
        assert!(matches!(&def.executables[1].1, ExecutableConfig::Full { use_mpi: true, .. }));
        assert!(matches!(&def.variables[0].1, VariableDefinition::Plain(_)));
        assert!(matches!(&def.variables[1].1, VariableDefinition::Described { .. }));
    }

    #[test]
    fn test_empty_file() {
        let config: WorkspaceConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.applications.is_empty());
        assert!(!config.workspace.dry_run);
    }
}
