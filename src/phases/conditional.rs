//! Conditional Expansion
//!
//! Expansion helpers for phases that tolerate missing variables.

use log::debug;

use crate::error::Result;
use crate::variables::{ExpandOptions, Expander};

/// Expands each template strictly and keeps the non-empty results.
///
/// Templates referencing an undefined variable are dropped; any other
/// expansion error (a cycle, for instance) propagates.
pub fn conditional_expand<I, S>(expander: &mut Expander, templates: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut expanded = Vec::new();
    for template in templates {
        let template = template.as_ref();
        if let Some(value) = optional(expander.expand_var_with(template, ExpandOptions::strict()))? {
            if value.trim().is_empty() {
                continue;
            }
            expanded.push(value);
        } else {
            debug!("Dropping '{}': references an undefined variable", template);
        }
    }
    Ok(expanded)
}

/// Turns an [`crate::Error::UndefinedVariable`] into `None`, keeping every
/// other error.
pub fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_undefined() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::variables::{Scope, VariableStore};

    fn expander(entries: &[(&str, &str)]) -> Expander {
        let mut store = VariableStore::new();
        store.extend(Scope::Workspace, entries.iter().copied());
        Expander::new(store)
    }

    #[test]
    fn test_drops_undefined_templates() {
        let mut exp = expander(&[("defined", "ok")]);
        let result = conditional_expand(&mut exp, ["{defined}", "{undefined}"]).unwrap();
        assert_eq!(result, vec!["ok"]);
    }

    #[test]
    fn test_drops_empty_results() {
        let mut exp = expander(&[("blank", ""), ("partition", "debug")]);
        let result = conditional_expand(
            &mut exp,
            ["#SBATCH {blank}", "{blank}", "#SBATCH -p {partition}"],
        )
        .unwrap();
        assert_eq!(result, vec!["#SBATCH ", "#SBATCH -p debug"]);
    }

    #[test]
    fn test_cycles_propagate() {
        let mut exp = expander(&[("a", "{b}"), ("b", "{a}")]);
        assert!(matches!(
            conditional_expand(&mut exp, ["{a}"]),
            Err(Error::CyclicExpansion { .. })
        ));
    }

    #[test]
    fn test_optional() {
        let undefined: Result<u32> = Err(Error::UndefinedVariable { name: "x".into() });
        assert_eq!(optional(undefined).unwrap(), None);
        assert_eq!(optional(Ok(3)).unwrap(), Some(3));
        assert!(optional::<u32>(Err(Error::Config("bad".into()))).is_err());
    }
}
