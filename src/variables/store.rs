//! Scoped Variable Store
//!
//! Holds raw variable definitions per scope. The effective value of a name
//! is the definition from the highest-precedence scope that has one.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Precedence level of a variable definition, highest first.
///
/// The derived `Ord` follows declaration order, so iterating a
/// `BTreeMap<Scope, _>` walks scopes from highest to lowest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Experiment-level definitions and runtime values
    Experiment,
    /// Workload section of the workspace
    Workload,
    /// Application section of the workspace
    Application,
    /// Workspace-wide variables
    Workspace,
    /// Defaults supplied by application and workflow manager definitions
    Default,
}

impl Scope {
    /// All scopes, highest precedence first.
    pub const PRECEDENCE: [Scope; 5] = [
        Scope::Experiment,
        Scope::Workload,
        Scope::Application,
        Scope::Workspace,
        Scope::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Experiment => "experiment",
            Scope::Workload => "workload",
            Scope::Application => "application",
            Scope::Workspace => "workspace",
            Scope::Default => "default",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw (unexpanded) value of a variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// Plain string, possibly containing `{name}` references
    Str(String),
    /// Ordered sequence of strings
    List(Vec<String>),
    /// Nested maps/arrays addressable by key path (`{name.key.0}`)
    Structured(Value),
}

impl VariableValue {
    /// Converts a YAML node into a variable value.
    ///
    /// Scalars become strings, sequences of scalars become lists and
    /// anything nested becomes a structured value.
    pub fn from_yaml(node: &serde_yaml::Value) -> Result<Self> {
        use serde_yaml::Value as Yaml;

        match node {
            Yaml::Null => Ok(Self::Str(String::new())),
            Yaml::Sequence(items) if items.iter().all(is_yaml_scalar) => Ok(Self::List(
                items.iter().filter_map(yaml_scalar_to_string).collect(),
            )),
            Yaml::Sequence(_) | Yaml::Mapping(_) => {
                Ok(Self::Structured(serde_json::to_value(node)?))
            }
            Yaml::Tagged(tagged) => Self::from_yaml(&tagged.value),
            scalar => yaml_scalar_to_string(scalar)
                .map(Self::Str)
                .ok_or_else(|| Error::Config(format!("unsupported variable value: {:?}", scalar))),
        }
    }

    /// Returns the list items, if this is a list value.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

fn is_yaml_scalar(node: &serde_yaml::Value) -> bool {
    matches!(
        node,
        serde_yaml::Value::String(_) | serde_yaml::Value::Number(_) | serde_yaml::Value::Bool(_)
    )
}

fn yaml_scalar_to_string(node: &serde_yaml::Value) -> Option<String> {
    match node {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<String>> for VariableValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<Value> for VariableValue {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// A named variable with optional documentation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: VariableValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Suggested values shown to users
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            description: None,
            values: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }
}

/// Scoped mapping of variable name to raw definition.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    scopes: BTreeMap<Scope, HashMap<String, Variable>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines (or replaces) a variable within one scope.
    pub fn define(
        &mut self,
        scope: Scope,
        name: impl Into<String>,
        value: impl Into<VariableValue>,
    ) {
        self.insert(scope, Variable::new(name, value));
    }

    /// Inserts a fully described variable within one scope.
    pub fn insert(&mut self, scope: Scope, variable: Variable) {
        self.scopes
            .entry(scope)
            .or_default()
            .insert(variable.name.clone(), variable);
    }

    /// Defines every entry of a map within one scope.
    pub fn extend<I, K, V>(&mut self, scope: Scope, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<VariableValue>,
    {
        for (name, value) in entries {
            self.define(scope, name, value);
        }
    }

    /// Removes a definition from one scope, returning it.
    pub fn remove(&mut self, scope: Scope, name: &str) -> Option<Variable> {
        self.scopes.get_mut(&scope).and_then(|vars| vars.remove(name))
    }

    /// Returns the effective definition of a name and the scope it came from.
    pub fn get(&self, name: &str) -> Option<(Scope, &Variable)> {
        self.scopes
            .iter()
            .find_map(|(scope, vars)| vars.get(name).map(|var| (*scope, var)))
    }

    /// Returns the definition of a name within a single scope.
    pub fn get_in(&self, scope: Scope, name: &str) -> Option<&Variable> {
        self.scopes.get(&scope).and_then(|vars| vars.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates the variables of one scope.
    pub fn scope_variables(&self, scope: Scope) -> impl Iterator<Item = &Variable> {
        self.scopes.get(&scope).into_iter().flat_map(|vars| vars.values())
    }

    /// Returns every effective name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scopes
            .values()
            .flat_map(|vars| vars.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(|vars| vars.is_empty())
    }
}
