//! Template Artifacts
//!
//! A template is a source text rendered through the expander into a file
//! under the experiment run directory. Each template also defines a
//! variable named after it that points at its rendered file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::variables::Expander;

/// Producer of per-template variables, evaluated right before rendering.
pub type ExtraVarsFn = fn(&mut Expander) -> Result<BTreeMap<String, String>>;

/// One renderable artifact.
#[derive(Clone)]
pub struct TemplateSpec {
    /// Name of the path variable defined for this template
    pub name: String,
    /// File name inside the experiment run directory
    pub dest: String,
    pub source: String,
    pub extra_vars: Option<ExtraVarsFn>,
}

impl fmt::Debug for TemplateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateSpec")
            .field("name", &self.name)
            .field("dest", &self.dest)
            .field("extra_vars", &self.extra_vars.is_some())
            .finish()
    }
}

impl TemplateSpec {
    pub fn new(
        name: impl Into<String>,
        dest: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dest: dest.into(),
            source: source.into(),
            extra_vars: None,
        }
    }

    pub fn with_extra_vars(mut self, producer: ExtraVarsFn) -> Self {
        self.extra_vars = Some(producer);
        self
    }

    /// Value of the path variable: `{experiment_run_dir}/<dest>`.
    pub fn path_expansion(&self) -> String {
        format!("{}/{}", Expander::expansion_str("experiment_run_dir"), self.dest)
    }

    /// Renders the source against the expander plus the extra variables.
    pub fn render(&self, expander: &mut Expander) -> Result<String> {
        let extra = match self.extra_vars {
            Some(producer) => producer(expander)?,
            None => BTreeMap::new(),
        };
        expander.render_template(&self.source, &extra)
    }

    /// Renders the template and writes it into `run_dir`.
    pub fn materialize(&self, expander: &mut Expander, run_dir: &Path) -> Result<()> {
        let content = self.render(expander)?;
        let path = run_dir.join(&self.dest);
        write_artifact(&path, &content)?;
        debug!("Rendered template '{}' to {}", self.name, path.display());
        Ok(())
    }
}

/// Defines the path variable of every template at experiment scope.
///
/// Later templates win over earlier ones with the same name.
pub fn define_template_paths<'a, I>(expander: &mut Expander, templates: I)
where
    I: IntoIterator<Item = &'a TemplateSpec>,
{
    for template in templates {
        expander.define_variable(template.name.clone(), template.path_expansion());
    }
}

/// Writes `content` to `path` through a temporary sibling file, then marks
/// it executable on unix. The temporary file is removed if any step fails.
pub fn write_artifact(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config(format!("invalid artifact path {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let result = write_and_persist(&tmp_path, path, content);
    if result.is_err() && tmp_path.exists() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            warn!("Failed to remove {}: {}", tmp_path.display(), e);
        }
    }
    result
}

fn write_and_persist(tmp_path: &Path, path: &Path, content: &str) -> Result<()> {
    {
        let mut file = File::create(tmp_path).map_err(|e| Error::io(tmp_path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Error::io(tmp_path, e))?;
        if !content.ends_with('\n') {
            writeln!(file).map_err(|e| Error::io(tmp_path, e))?;
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::io(tmp_path, e))?;
    }

    fs::rename(tmp_path, path).map_err(|e| Error::io(path, e))
}
