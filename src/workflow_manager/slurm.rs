//! Slurm Workflow Manager
//!
//! Submission through `sbatch`, status through `squeue` with an `sacct`
//! fallback for jobs that already left the queue.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::execution::command::{CommandRunner, ErrorStream};
use crate::phases::conditional_expand;
use crate::variables::{ExpandOptions, Expander};

use super::status::ExperimentStatus;
use super::template::TemplateSpec;
use super::{ManagerConfig, ManagerVariable};

/// File in the run directory holding the submitted job id.
pub const JOB_ID_FILE: &str = ".slurm_job";

/// squeue / sacct state tokens.
pub static STATUS_MAP: Lazy<HashMap<&'static str, ExperimentStatus>> = Lazy::new(|| {
    HashMap::from([
        ("PD", ExperimentStatus::Setup),
        ("R", ExperimentStatus::Running),
        ("CF", ExperimentStatus::Setup),
        ("CG", ExperimentStatus::Complete),
        ("COMPLETED", ExperimentStatus::Complete),
        ("CANCELLED", ExperimentStatus::Cancelled),
        ("CANCELLED+", ExperimentStatus::Cancelled),
    ])
});

pub(super) const VARIABLES: &[ManagerVariable] = &[
    ManagerVariable {
        name: "job_name",
        default: "{application_name}_{workload_name}_{experiment_name}",
        description: "Slurm job name",
    },
    ManagerVariable {
        name: "extra_sbatch_headers",
        default: "",
        description: "Extra sbatch headers added to the slurm job script, one per line",
    },
    ManagerVariable {
        name: "hostlist",
        default: "$SLURM_JOB_NODELIST",
        description: "Host list of the allocation",
    },
];

const SBATCH_PRAGMAS: &[&str] = &[
    "#SBATCH -N {n_nodes}",
    "#SBATCH -p {partition}",
    "#SBATCH --ntasks-per-node {processes_per_node}",
    "#SBATCH -J {job_name}",
    "#SBATCH -o {experiment_run_dir}/slurm-%j.out",
    "#SBATCH -e {experiment_run_dir}/slurm-%j.err",
    "#SBATCH --gpus-per-node {gpus_per_node}",
];

pub(super) fn templates() -> Vec<TemplateSpec> {
    vec![
        TemplateSpec::new(
            "batch_submit",
            "batch_submit",
            include_str!("templates/batch_submit.tpl"),
        ),
        TemplateSpec::new(
            "batch_query",
            "batch_query",
            include_str!("templates/batch_query.tpl"),
        ),
        TemplateSpec::new(
            "batch_cancel",
            "batch_cancel",
            include_str!("templates/batch_cancel.tpl"),
        ),
        TemplateSpec::new(
            "slurm_execute_experiment",
            "slurm_execute_experiment",
            include_str!("templates/slurm_execute_experiment.tpl"),
        )
        .with_extra_vars(execute_vars),
    ]
}

/// Builds `sbatch_headers_str`: every pragma whose variables are defined,
/// followed by the non-empty lines of `extra_sbatch_headers`.
pub fn execute_vars(expander: &mut Expander) -> Result<BTreeMap<String, String>> {
    let mut pragmas: Vec<String> = SBATCH_PRAGMAS.iter().map(|p| p.to_string()).collect();

    match expander.expand_var_name_with("extra_sbatch_headers", ExpandOptions::strict()) {
        Ok(extra) => pragmas.extend(
            extra
                .trim()
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        ),
        Err(e) if e.is_undefined() => {}
        Err(e) => return Err(e),
    }

    let headers = conditional_expand(expander, &pragmas)?;
    Ok(BTreeMap::from([(
        "sbatch_headers_str".to_string(),
        headers.join("\n"),
    )]))
}

/// Maps a raw scheduler token to a normalized status.
pub fn map_status(raw: &str) -> ExperimentStatus {
    // sacct may print one line per step; the allocation comes first
    let token = raw.split_whitespace().next().unwrap_or("");
    STATUS_MAP
        .get(token)
        .copied()
        .unwrap_or(ExperimentStatus::Unknown)
}

/// Reads the job id persisted by `batch_submit`.
pub fn read_job_id(run_dir: &Path) -> Option<String> {
    let path = run_dir.join(JOB_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let id = content.trim();
            if id.is_empty() {
                warn!("Job id file {} is empty", path.display());
                None
            } else {
                Some(id.to_string())
            }
        }
        Err(_) => {
            warn!("Job id file {} is missing", path.display());
            None
        }
    }
}

/// Runs the scheduler status queries for one job.
pub struct SlurmRunner {
    squeue: CommandRunner,
    sacct: CommandRunner,
}

impl SlurmRunner {
    pub fn new(config: &ManagerConfig, dry_run: bool) -> Self {
        Self {
            squeue: CommandRunner::new("squeue", &config.squeue).with_dry_run(dry_run),
            sacct: CommandRunner::new("sacct", &config.sacct).with_dry_run(dry_run),
        }
    }

    /// Raw status token of a job; `None` in dry-run mode or when both
    /// queries fail.
    pub fn get_status(&self, job_id: &str) -> Option<String> {
        if self.squeue.is_dry_run() {
            return None;
        }

        let queued = match self
            .squeue
            .command(["-h", "-o", "%t", "-j", job_id], ErrorStream::Null)
        {
            Ok(out) => out,
            Err(e) => {
                debug!(
                    "squeue failed ({}); expected once the job has left the queue",
                    e
                );
                String::new()
            }
        };
        if !queued.trim().is_empty() {
            return Some(queued.trim().to_string());
        }

        match self
            .sacct
            .command(["-o", "state", "-X", "-n", "-j", job_id], ErrorStream::Capture)
        {
            Ok(out) => Some(out.trim().to_string()),
            Err(e) => {
                debug!("sacct failed: {}", e);
                None
            }
        }
    }
}

/// Status of the job submitted from `run_dir`.
pub fn get_status(run_dir: &Path, config: &ManagerConfig, dry_run: bool) -> ExperimentStatus {
    let Some(job_id) = read_job_id(run_dir) else {
        return ExperimentStatus::Unknown;
    };
    let runner = SlurmRunner::new(config, dry_run);
    let status = runner
        .get_status(&job_id)
        .map(|raw| map_status(&raw))
        .unwrap_or_default();
    debug!("Slurm job {} is {}", job_id, status);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::{Scope, VariableStore};

    #[test]
    fn test_status_tokens() {
        assert_eq!(map_status("PD"), ExperimentStatus::Setup);
        assert_eq!(map_status("R\n"), ExperimentStatus::Running);
        assert_eq!(map_status("CG"), ExperimentStatus::Complete);
        assert_eq!(map_status("  COMPLETED \n COMPLETED"), ExperimentStatus::Complete);
        assert_eq!(map_status("CANCELLED+"), ExperimentStatus::Cancelled);
        assert_eq!(map_status("TIMEOUT"), ExperimentStatus::Unknown);
        assert_eq!(map_status(""), ExperimentStatus::Unknown);
    }

    #[test]
    fn test_headers_skip_undefined_pragmas() {
        let mut store = VariableStore::new();
        store.define(Scope::Workspace, "n_nodes", "2");
        store.define(Scope::Workspace, "processes_per_node", "4");
        store.define(Scope::Default, "job_name", "hello_test_exp");
        store.define(Scope::Default, "extra_sbatch_headers", "#SBATCH --exclusive\n\n#SBATCH -t {time}\n");
        store.define(Scope::Workspace, "time", "10:00");
        store.define(Scope::Experiment, "experiment_run_dir", "/runs/exp");
        let mut expander = Expander::new(store);

        let vars = execute_vars(&mut expander).unwrap();
        let headers: Vec<&str> = vars["sbatch_headers_str"].lines().collect();
        assert_eq!(
            headers,
            vec![
                "#SBATCH -N 2",
                "#SBATCH --ntasks-per-node 4",
                "#SBATCH -J hello_test_exp",
                "#SBATCH -o /runs/exp/slurm-%j.out",
                "#SBATCH -e /runs/exp/slurm-%j.err",
                "#SBATCH --exclusive",
                "#SBATCH -t 10:00",
            ]
        );
    }

    #[test]
    fn test_missing_job_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let status = get_status(dir.path(), &ManagerConfig::default(), false);
        assert_eq!(status, ExperimentStatus::Unknown);
    }

    #[test]
    fn test_dry_run_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(JOB_ID_FILE), "42\n").unwrap();
        let status = get_status(dir.path(), &ManagerConfig::default(), true);
        assert_eq!(status, ExperimentStatus::Unknown);
    }

    #[test]
    fn test_failing_queries_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(JOB_ID_FILE), "42\n").unwrap();
        let config = ManagerConfig {
            squeue: "/nonexistent/squeue".into(),
            sacct: "/nonexistent/sacct".into(),
            ..ManagerConfig::default()
        };
        assert_eq!(get_status(dir.path(), &config, false), ExperimentStatus::Unknown);
    }

    #[test]
    fn test_templates_are_complete() {
        let templates = templates();
        let names: Vec<&str> = templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["batch_submit", "batch_query", "batch_cancel", "slurm_execute_experiment"]
        );
        assert!(templates[0].source.contains("{slurm_execute_experiment}"));
        assert!(templates[0].source.contains(JOB_ID_FILE));
        assert!(templates[1].source.contains("squeue"));
        assert!(templates[2].source.contains("scancel"));
        assert!(templates[3].source.contains("scontrol show hostnames"));
        assert!(templates[3].extra_vars.is_some());
    }
}
