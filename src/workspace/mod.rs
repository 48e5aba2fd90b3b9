//! Workspace
//!
//! A workspace is a directory holding a YAML workspace file and everything
//! generated from it:
//!
//! ```text
//! <root>/
//! ├── workspace.yaml
//! ├── all_experiments          # one submit command per experiment
//! ├── results.latest.json      # written by the analyze pipeline
//! ├── experiments/<app>/<workload>/<experiment>/
//! └── archive/<namespace>/
//! ```

pub mod config;
pub mod parser;

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::Result;
use crate::experiment::set::{self, DefinitionCatalog};
use crate::experiment::{ApplicationDefinition, Experiment};
use crate::workflow_manager::ManagerConfig;

pub use config::WorkspaceConfig;
pub use parser::{build_catalog, load_workspace, parse_workspace};

/// File listing the submit command of every experiment.
pub const ALL_EXPERIMENTS_FILE: &str = "all_experiments";

/// Analysis results of the last `analyze` run.
pub const RESULTS_FILE: &str = "results.latest.json";

/// Workspace directory, its configuration and application catalog.
pub struct Workspace {
    root: PathBuf,
    dry_run: bool,
    manager_config: ManagerConfig,
    config: WorkspaceConfig,
    catalog: DefinitionCatalog,
}

impl Workspace {
    /// Empty workspace rooted at `root`, with only built-in applications.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::from_config(root, WorkspaceConfig::default())
    }

    /// Loads a workspace file; its directory becomes the workspace root.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = load_workspace(path)?;
        let root = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::from_config(root, config)
    }

    pub fn from_config(root: impl Into<PathBuf>, config: WorkspaceConfig) -> Result<Self> {
        let catalog = build_catalog(&config)?;

        let defaults = ManagerConfig::default();
        let section = &config.workspace;
        let manager_config = ManagerConfig {
            shell: section.shell.clone().unwrap_or(defaults.shell),
            squeue: section.squeue.clone().unwrap_or(defaults.squeue),
            sacct: section.sacct.clone().unwrap_or(defaults.sacct),
        };

        let root = root.into();
        debug!(
            "Workspace at {} ({} application definition(s))",
            root.display(),
            catalog.len()
        );

        Ok(Self {
            root,
            dry_run: section.dry_run,
            manager_config,
            config,
            catalog,
        })
    }

    /// Forces dry-run on or off, overriding the workspace file.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn manager_config(&self) -> &ManagerConfig {
        &self.manager_config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn experiments_dir(&self) -> PathBuf {
        self.root.join("experiments")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    pub fn all_experiments_file(&self) -> PathBuf {
        self.root.join(ALL_EXPERIMENTS_FILE)
    }

    pub fn results_file(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    pub fn definition(&self, name: &str) -> Option<&ApplicationDefinition> {
        self.catalog.get(name).map(|def| def.as_ref())
    }

    /// Generates the workspace's experiments.
    pub fn experiments(&self) -> Result<Vec<Experiment>> {
        set::generate(
            &self.config,
            &self.catalog,
            &self.experiments_dir(),
            &self.manager_config,
        )
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("dry_run", &self.dry_run)
            .field("manager_config", &self.manager_config)
            .finish_non_exhaustive()
    }
}
