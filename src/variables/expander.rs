//! Variable Expander
//!
//! Resolves variable names and template strings against a [`VariableStore`],
//! substituting `{name}` references recursively.
//!
//! - Nested references resolve innermost first: `{{kind}_count}`
//! - `\{` and `\}` produce literal braces
//! - A brace body that is not a variable but is arithmetic is evaluated
//! - A result that is one quoted string literal evaluates to its contents
//! - Self-referencing chains fail with [`Error::CyclicExpansion`]
//!
//! Every dereferenced name is recorded in the used-variable set of the
//! current stage until [`Expander::flush_used_variable_stage`] is called.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};

use super::math;
use super::store::{Scope, VariableStore, VariableValue};
use super::typed::{coerce, coerce_leaves};

/// Options for a single expansion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Return unresolved references as literal `{name}` text instead of failing
    pub allow_passthrough: bool,
    /// Record dereferenced names in the current used-variable stage
    pub merge_used_stage: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            allow_passthrough: true,
            merge_used_stage: true,
        }
    }
}

impl ExpandOptions {
    /// Options that fail with [`Error::UndefinedVariable`] on missing names.
    pub fn strict() -> Self {
        Self {
            allow_passthrough: false,
            ..Self::default()
        }
    }

    /// Same options, but the call leaves the used-variable stage untouched.
    pub fn untracked(mut self) -> Self {
        self.merge_used_stage = false;
        self
    }
}

/// Expansion context for one experiment.
#[derive(Debug, Clone, Default)]
pub struct Expander {
    store: VariableStore,
    used: BTreeSet<String>,
}

impl Expander {
    pub fn new(store: VariableStore) -> Self {
        Self {
            store,
            used: BTreeSet::new(),
        }
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VariableStore {
        &mut self.store
    }

    /// Defines a variable at experiment scope, shadowing all other scopes.
    pub fn define_variable(&mut self, name: impl Into<String>, value: impl Into<VariableValue>) {
        self.store.define(Scope::Experiment, name, value);
    }

    /// Returns the canonical reference token for a name.
    ///
    /// # Example
    /// ```
    /// use hpcrunner::variables::Expander;
    ///
    /// assert_eq!(Expander::expansion_str("n_nodes"), "{n_nodes}");
    /// ```
    pub fn expansion_str(name: &str) -> String {
        format!("{{{}}}", name)
    }

    /// Expands a variable by name, passing unknown names through.
    pub fn expand_var_name(&mut self, name: &str) -> Result<String> {
        self.expand_var_name_with(name, ExpandOptions::default())
    }

    pub fn expand_var_name_with(&mut self, name: &str, options: ExpandOptions) -> Result<String> {
        let mut resolver = Resolver::new(&self.store, None, options.allow_passthrough);
        let result = resolver.resolve_name(name);
        self.merge(resolver.used, options);
        result
    }

    /// Expands a variable by name into a typed value.
    ///
    /// List and structured variables keep their shape; strings are coerced
    /// when they parse unambiguously and stay strings otherwise.
    pub fn expand_var_name_typed(&mut self, name: &str, options: ExpandOptions) -> Result<Value> {
        let mut resolver = Resolver::new(&self.store, None, options.allow_passthrough);
        let result = resolver.resolve_name_typed(name);
        self.merge(resolver.used, options);
        result
    }

    /// Expands a required variable and parses it into `T`.
    ///
    /// Unlike typed expansion this is fatal on failure: a phase that casts
    /// a count must not silently continue with a string.
    pub fn expand_var_name_as<T: FromStr>(&mut self, name: &str) -> Result<T> {
        let value = self.expand_var_name_with(name, ExpandOptions::strict())?;
        value.trim().parse::<T>().map_err(|_| Error::InvalidValue {
            name: name.to_string(),
            value,
            expected: std::any::type_name::<T>(),
        })
    }

    /// Expands an arbitrary template string, passing unknown names through.
    pub fn expand_var(&mut self, template: &str) -> Result<String> {
        self.expand_var_with(template, ExpandOptions::default())
    }

    pub fn expand_var_with(&mut self, template: &str, options: ExpandOptions) -> Result<String> {
        let mut resolver = Resolver::new(&self.store, None, options.allow_passthrough);
        let result = resolver.render(template).map(evaluate_literal);
        self.merge(resolver.used, options);
        result
    }

    /// Expands a template into a typed value.
    ///
    /// A template consisting of a single `{name}` reference behaves like
    /// [`Expander::expand_var_name_typed`].
    pub fn expand_var_typed(&mut self, template: &str, options: ExpandOptions) -> Result<Value> {
        if let Some(name) = single_reference(template) {
            return self.expand_var_name_typed(name, options);
        }
        self.expand_var_with(template, options).map(|s| coerce(&s))
    }

    /// Renders a template with extra variables visible only to this call.
    ///
    /// Extra values are final: they shadow every scope and are not expanded
    /// again. Unknown names pass through so shell syntax survives.
    pub fn render_template(
        &mut self,
        template: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut resolver = Resolver::new(&self.store, Some(extra), true);
        let result = resolver.render(template);
        self.merge(resolver.used, ExpandOptions::default());
        result
    }

    /// Starts a new evaluation stage.
    pub fn flush_used_variable_stage(&mut self) {
        self.used.clear();
    }

    /// Names dereferenced since the last flush.
    pub fn used_variables(&self) -> &BTreeSet<String> {
        &self.used
    }

    /// Returns the names dereferenced in this stage and starts a new one.
    pub fn take_used_variables(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.used)
    }

    fn merge(&mut self, used: BTreeSet<String>, options: ExpandOptions) {
        if options.merge_used_stage {
            self.used.extend(used);
        }
    }
}

/// Returns `name` if `template` is exactly `{name}` with no nesting.
fn single_reference(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}', '\\']) {
        return None;
    }
    Some(inner)
}

/// One top-level expansion: tracks the in-progress chain for cycle
/// detection and the names it touched.
struct Resolver<'a> {
    store: &'a VariableStore,
    extra: Option<&'a BTreeMap<String, String>>,
    allow_passthrough: bool,
    stack: Vec<String>,
    used: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    fn new(
        store: &'a VariableStore,
        extra: Option<&'a BTreeMap<String, String>>,
        allow_passthrough: bool,
    ) -> Self {
        Self {
            store,
            extra,
            allow_passthrough,
            stack: Vec::new(),
            used: BTreeSet::new(),
        }
    }

    /// Substitutes every `{...}` token in `text`.
    fn render(&mut self, text: &str) -> Result<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut output = String::with_capacity(text.len());
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];

            if ch == '\\' && matches!(chars.get(i + 1), Some('{') | Some('}')) {
                output.push(chars[i + 1]);
                i += 2;
                continue;
            }

            if ch == '{' {
                if let Some(close) = find_closing_brace(&chars, i) {
                    let body: String = chars[i + 1..close].iter().collect();
                    output.push_str(&self.resolve_token(&body)?);
                    i = close + 1;
                    continue;
                }
            }

            output.push(ch);
            i += 1;
        }

        Ok(output)
    }

    fn resolve_token(&mut self, body: &str) -> Result<String> {
        if body.is_empty() {
            return Ok("{}".to_string());
        }
        let name = self.render(body)?;
        self.resolve_name(&name)
    }

    fn resolve_name(&mut self, name: &str) -> Result<String> {
        if let Some(value) = self.lookup(name)? {
            return Ok(value);
        }

        if let Some(value) = math::evaluate(name) {
            return Ok(value);
        }

        if self.allow_passthrough {
            debug!("Passing through undefined variable '{}'", name);
            Ok(Expander::expansion_str(name))
        } else {
            Err(Error::UndefinedVariable {
                name: name.to_string(),
            })
        }
    }

    fn resolve_name_typed(&mut self, name: &str) -> Result<Value> {
        if let Some(extra) = self.extra.and_then(|extra| extra.get(name)) {
            return Ok(coerce(extra));
        }

        let store = self.store;
        let Some((_, variable)) = store.get(name) else {
            return self.resolve_name(name).map(|s| coerce(&s));
        };

        self.enter(name)?;
        let result = match &variable.value {
            VariableValue::Str(raw) => self.render_str(raw).map(|s| coerce(&s)),
            VariableValue::List(items) => items
                .iter()
                .map(|item| self.render(item).map(|s| coerce(&s)))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            VariableValue::Structured(value) => self.render_json(value).map(coerce_leaves),
        };
        self.stack.pop();
        result
    }

    /// Looks up and expands a name; `None` if nothing defines it.
    fn lookup(&mut self, name: &str) -> Result<Option<String>> {
        if let Some(extra) = self.extra.and_then(|extra| extra.get(name)) {
            return Ok(Some(extra.clone()));
        }

        let store = self.store;
        if let Some((_, variable)) = store.get(name) {
            self.enter(name)?;
            let result = self.render_value(&variable.value);
            self.stack.pop();
            return result.map(Some);
        }

        if let Some((root, leaf)) = self.find_key_path(name) {
            self.enter(&root)?;
            let result = match leaf {
                Value::String(raw) => self.render(raw),
                other => self
                    .render_json(other)
                    .and_then(|v| value_to_string(&v)),
            };
            self.stack.pop();
            return result.map(Some);
        }

        Ok(None)
    }

    fn enter(&mut self, name: &str) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|n| n == name) {
            let mut chain = self.stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(Error::CyclicExpansion { chain });
        }
        self.used.insert(name.to_string());
        self.stack.push(name.to_string());
        Ok(())
    }

    fn render_value(&mut self, value: &VariableValue) -> Result<String> {
        match value {
            VariableValue::Str(raw) => self.render_str(raw),
            VariableValue::List(items) => {
                let rendered = items
                    .iter()
                    .map(|item| self.render(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(rendered.join(" "))
            }
            VariableValue::Structured(value) => {
                let rendered = self.render_json(value)?;
                value_to_string(&rendered)
            }
        }
    }

    /// Renders a string value and evaluates it if it is pure arithmetic or
    /// a quoted string literal.
    fn render_str(&mut self, raw: &str) -> Result<String> {
        let rendered = self.render(raw)?;
        match math::evaluate_expression(&rendered) {
            Some(value) => Ok(value),
            None => Ok(evaluate_literal(rendered)),
        }
    }

    fn render_json(&mut self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(raw) => Value::String(self.render(raw)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_json(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::new();
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_json(item)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }

    /// Resolves `root.key.0` against a structured variable `root`.
    ///
    /// The longest defined prefix wins, so a variable literally named
    /// `a.b` shadows key `b` of a structured `a`.
    fn find_key_path(&self, name: &str) -> Option<(String, &'a Value)> {
        let store = self.store;
        let parts: Vec<&str> = name.split('.').collect();
        for split in (1..parts.len()).rev() {
            let root = parts[..split].join(".");
            let Some((_, variable)) = store.get(&root) else {
                continue;
            };
            let VariableValue::Structured(value) = &variable.value else {
                return None;
            };
            let leaf = parts[split..].iter().try_fold(value, |node, key| match node {
                Value::Object(map) => map.get(*key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })?;
            return Some((root, leaf));
        }
        None
    }
}

fn evaluate_literal(text: String) -> String {
    match math::string_literal(&text) {
        Some(inner) => inner.to_string(),
        None => text,
    }
}

fn value_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

/// Finds the `}` matching the `{` at `open`, skipping escaped braces.
fn find_closing_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' if matches!(chars.get(i + 1), Some('{') | Some('}')) => {
                i += 2;
                continue;
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}
