//! External Command Runner
//!
//! Thin synchronous wrapper around [`std::process::Command`] used for
//! scheduler queries and for running rendered scripts.
//!
//! A runner in dry-run mode never spawns anything: it logs the command
//! line and returns empty output.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::ProcessError;

/// What to do with the standard error stream of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStream {
    /// Capture it and attach it to a [`ProcessError`]
    Capture,
    /// Discard it
    Null,
}

/// Named handle on one external program.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: String,
    command: PathBuf,
    dry_run: bool,
    working_dir: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            dry_run: false,
            working_dir: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs the program with `args` and returns its standard output.
    ///
    /// # Errors
    ///
    /// A spawn failure or a non-zero exit status yields a [`ProcessError`]
    /// carrying the rendered command line, the exit code and (when
    /// captured) standard error.
    pub fn command<I, S>(&self, args: I, error: ErrorStream) -> Result<String, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let rendered = self.render(&args);

        if self.dry_run {
            info!("[dry-run] {}: {}", self.name, rendered);
            return Ok(String::new());
        }

        debug!("Running {}: {}", self.name, rendered);

        let mut cmd = Command::new(&self.command);
        cmd.args(&args).stdin(Stdio::null());
        cmd.stderr(match error {
            ErrorStream::Capture => Stdio::piped(),
            ErrorStream::Null => Stdio::null(),
        });
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| ProcessError {
            command: rendered.clone(),
            code: None,
            message: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            if !stdout.trim().is_empty() {
                debug!("{} output:\n{}", self.name, stdout.trim_end());
            }
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProcessError {
                command: rendered,
                code: output.status.code(),
                message: stderr.trim().to_string(),
            })
        }
    }

    /// Runs a script file through this runner (typically a shell).
    pub fn run_script(&self, script: &Path) -> Result<String, ProcessError> {
        self.command([script.as_os_str()], ErrorStream::Capture)
    }

    fn render<S: AsRef<OsStr>>(&self, args: &[S]) -> String {
        let mut parts = vec![self.command.display().to_string()];
        parts.extend(
            args.iter()
                .map(|arg| arg.as_ref().to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}
