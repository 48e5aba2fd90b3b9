//! End-to-end pipeline runs over temporary workspaces.

use std::fs;
use std::path::Path;

use hpcrunner::experiment::state::ExperimentState;
use hpcrunner::workspace::parse_workspace;
use hpcrunner::{Engine, Error, Pipeline, Workspace};
use tempfile::tempdir;

fn workspace(root: &Path, yaml: &str) -> Workspace {
    Workspace::from_config(root, parse_workspace(yaml).unwrap()).unwrap()
}

fn run_dir(root: &Path, app: &str, workload: &str, name: &str) -> std::path::PathBuf {
    root.join("experiments").join(app).join(workload).join(name)
}

const SLURM_OR_NOT: &str = r#"
workspace:
  workflow_manager: '{wm_name}'
  variables:
    wm_name: ['None', 'slurm']
    processes_per_node: 2
    extra_sbatch_headers: |
      #SBATCH --gpus-per-task=1

      #SBATCH --exclusive
applications:
  hostname:
    workloads:
      parallel:
        experiments:
          test_{wm_name}:
            variables:
              n_nodes: 2
"#;

const SLURM_ARTIFACTS: &[&str] = &[
    "batch_submit",
    "batch_query",
    "batch_cancel",
    "slurm_execute_experiment",
];

#[test]
fn setup_dry_run_renders_scheduler_artifacts_only_with_a_scheduler() {
    let dir = tempdir().unwrap();
    let ws = workspace(dir.path(), SLURM_OR_NOT).with_dry_run(true);

    let summary = Engine::new(&ws).run(Pipeline::Setup).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.total(), 2);

    let plain = run_dir(dir.path(), "hostname", "parallel", "test_None");
    let slurm = run_dir(dir.path(), "hostname", "parallel", "test_slurm");
    assert!(plain.join("execute_experiment").is_file());
    assert!(slurm.join("execute_experiment").is_file());
    for artifact in SLURM_ARTIFACTS {
        assert!(slurm.join(artifact).is_file(), "missing {}", artifact);
        assert!(!plain.join(artifact).exists(), "unexpected {}", artifact);
    }

    let script = fs::read_to_string(slurm.join("slurm_execute_experiment")).unwrap();
    assert!(script.contains("#SBATCH -N 2"));
    assert!(script.contains("#SBATCH --ntasks-per-node 2"));
    assert!(script.contains("#SBATCH --gpus-per-task=1"));
    assert!(script.contains("#SBATCH --exclusive"));
    assert!(!script.contains("#SBATCH -p"), "undefined partition must be dropped");
    assert!(!script.contains("{partition}"));
    assert!(script.contains(&format!("cd {}", slurm.display())));

    let execute = fs::read_to_string(slurm.join("execute_experiment")).unwrap();
    assert!(execute.contains("mpirun -n 4 hostname"));
}

#[test]
fn setup_writes_all_experiments() {
    let dir = tempdir().unwrap();
    let yaml = r#"
workspace:
  variables:
    batch_submit: 'echo {workflow_manager} {experiment_name}'
applications:
  hostname:
    workloads:
      local:
        experiments:
          first: {}
          second: {}
"#;
    let ws = workspace(dir.path(), yaml).with_dry_run(true);
    Engine::new(&ws).run(Pipeline::Setup).unwrap().into_result().unwrap();

    let all = fs::read_to_string(dir.path().join("all_experiments")).unwrap();
    let lines: Vec<&str> = all.lines().collect();
    assert_eq!(lines, vec!["#!/bin/bash", "echo None first", "echo None second"]);
}

#[test]
fn matrix_and_zip_generate_named_experiments() {
    let dir = tempdir().unwrap();
    let yaml = r#"
applications:
  hostname:
    variables:
      n_threads: ['1', '2']
      label: ['a', 'b']
    workloads:
      local:
        experiments:
          run_{n_nodes}_{n_threads}_{label}:
            variables:
              n_nodes: [1, 2, 4]
            matrix: [n_nodes]
"#;
    let ws = workspace(dir.path(), yaml);
    let names: Vec<String> = ws
        .experiments()
        .unwrap()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "run_1_1_a", "run_2_1_a", "run_4_1_a",
            "run_1_2_b", "run_2_2_b", "run_4_2_b",
        ]
    );
}

#[test]
fn zip_of_unequal_lists_is_rejected() {
    let dir = tempdir().unwrap();
    let yaml = r#"
applications:
  hostname:
    workloads:
      local:
        experiments:
          run_{n_nodes}_{n_threads}:
            variables:
              n_nodes: [1, 2, 4]
              n_threads: [1, 2]
"#;
    let ws = workspace(dir.path(), yaml);
    assert!(matches!(ws.experiments(), Err(Error::Config(_))));
}

#[test]
fn duplicate_experiment_names_are_rejected() {
    let dir = tempdir().unwrap();
    let yaml = r#"
applications:
  hostname:
    workloads:
      local:
        experiments:
          same:
            variables:
              n_nodes: [1, 2]
"#;
    let ws = workspace(dir.path(), yaml);
    assert!(matches!(ws.experiments(), Err(Error::Config(_))));
}

#[test]
fn unknown_application_and_manager() {
    let dir = tempdir().unwrap();
    let unknown_app = "applications:\n  gromacs:\n    workloads:\n      w:\n        experiments:\n          e: {}\n";
    assert!(matches!(
        workspace(dir.path(), unknown_app).experiments(),
        Err(Error::UnknownApplication(_))
    ));

    let unknown_wm = "workspace:\n  workflow_manager: pbs\napplications:\n  hostname:\n    workloads:\n      local:\n        experiments:\n          e: {}\n";
    assert!(matches!(
        workspace(dir.path(), unknown_wm).experiments(),
        Err(Error::UnknownWorkflowManager(_))
    ));
}

#[test]
fn inherited_template_application_overrides_default() {
    let dir = tempdir().unwrap();
    let yaml = r#"
applications:
  template:
    workloads:
      test_template:
        experiments:
          base: {}
  template-inherited:
    workloads:
      test_template:
        experiments:
          derived: {}
"#;
    let ws = workspace(dir.path(), yaml).with_dry_run(true);
    let summary = Engine::new(&ws).run(Pipeline::Setup).unwrap();
    assert!(summary.is_success());

    let base = run_dir(dir.path(), "template", "test_template", "base");
    let derived = run_dir(dir.path(), "template-inherited", "test_template", "derived");

    let bar = fs::read_to_string(base.join("bar.sh")).unwrap();
    assert!(bar.contains("echo foobar"));
    assert!(bar.contains("echo hello world\n"));
    assert!(!bar.contains('"'));
    let bar = fs::read_to_string(derived.join("bar.sh")).unwrap();
    assert!(bar.contains("echo foobar"));
    assert!(bar.contains("echo hello world-inherited"));

    let execute = fs::read_to_string(derived.join("execute_experiment")).unwrap();
    assert!(execute.contains(&format!("bash {}", derived.join("bar.sh").display())));
}

#[test]
fn workspace_scope_beats_definition_default() {
    let dir = tempdir().unwrap();
    let yaml = r#"
workspace:
  variables:
    hello_name: workspace
applications:
  template:
    workloads:
      test_template:
        experiments:
          scoped: {}
          overridden:
            variables:
              hello_name: experiment
"#;
    let ws = workspace(dir.path(), yaml).with_dry_run(true);
    Engine::new(&ws).run(Pipeline::Setup).unwrap().into_result().unwrap();

    let read = |name: &str| {
        fs::read_to_string(run_dir(dir.path(), "template", "test_template", name).join("bar.sh")).unwrap()
    };
    assert!(read("scoped").contains("hello workspace"));
    assert!(read("overridden").contains("hello experiment"));
}

#[test]
fn execute_before_setup_fails_every_experiment() {
    let dir = tempdir().unwrap();
    let yaml = "applications:\n  hostname:\n    workloads:\n      local:\n        experiments:\n          a: {}\n          b: {}\n";
    let ws = workspace(dir.path(), yaml);

    let result = Engine::new(&ws).run(Pipeline::Execute).unwrap().into_result();
    assert!(matches!(
        result,
        Err(Error::ExperimentsFailed { failed: 2, total: 2, .. })
    ));
}

#[test]
fn setup_state_is_persisted() {
    let dir = tempdir().unwrap();
    let yaml = "applications:\n  hostname:\n    workloads:\n      local:\n        experiments:\n          a: {}\n";
    let ws = workspace(dir.path(), yaml);
    Engine::new(&ws).run(Pipeline::Setup).unwrap().into_result().unwrap();

    let state = ExperimentState::load(&run_dir(dir.path(), "hostname", "local", "a")).unwrap();
    assert_eq!(state.namespace, "hostname.local.a");
    assert!(state.is_completed(Pipeline::Setup, "make_experiments"));
    assert!(!state.has_failed());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn slurm_workspace(root: &Path, squeue: &Path, sacct: &Path) -> Workspace {
        let yaml = format!(
            r#"
workspace:
  workflow_manager: slurm
  squeue: {}
  sacct: {}
applications:
  hostname:
    workloads:
      local:
        experiments:
          job: {{}}
"#,
            squeue.display(),
            sacct.display()
        );
        workspace(root, &yaml)
    }

    fn status_after_analyze(ws: &Workspace) -> String {
        let summary = Engine::new(ws).run(Pipeline::Analyze).unwrap();
        assert!(summary.is_success());
        summary.outcomes[0].experiment.state().status.to_string()
    }

    #[test]
    fn slurm_status_from_squeue_then_sacct() {
        let dir = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let squeue = bin.path().join("squeue");
        let sacct = bin.path().join("sacct");
        write_script(&squeue, r#"[ "$5" = "12345" ] && echo R"#);
        write_script(&sacct, "echo COMPLETED");

        let ws = slurm_workspace(dir.path(), &squeue, &sacct);
        Engine::new(&ws).run(Pipeline::Setup).unwrap().into_result().unwrap();
        let job_dir = run_dir(dir.path(), "hostname", "local", "job");
        fs::write(job_dir.join(".slurm_job"), "12345\n").unwrap();

        assert_eq!(status_after_analyze(&ws), "RUNNING");

        // The job left the queue: squeue prints nothing
        write_script(&squeue, "exit 0");
        assert_eq!(status_after_analyze(&ws), "COMPLETE");

        let results = fs::read_to_string(dir.path().join("results.latest.json")).unwrap();
        assert!(results.contains("\"COMPLETE\""));
    }

    #[test]
    fn slurm_status_query_failures_are_unknown() {
        let dir = tempdir().unwrap();
        let bin = tempdir().unwrap();
        let squeue = bin.path().join("squeue");
        let sacct = bin.path().join("sacct");
        write_script(&squeue, "exit 1");
        write_script(&sacct, "echo 'sacct: error' >&2; exit 1");

        let ws = slurm_workspace(dir.path(), &squeue, &sacct);
        Engine::new(&ws).run(Pipeline::Setup).unwrap().into_result().unwrap();
        fs::write(run_dir(dir.path(), "hostname", "local", "job").join(".slurm_job"), "7").unwrap();

        assert_eq!(status_after_analyze(&ws), "UNKNOWN");
    }

    const BENCH: &str = r#"
definitions:
  bench:
    executables:
      run: 'echo "Time {size}: 1.5 s"'
    workloads:
      small:
        executables: [run]
        variables:
          size: 8
    figures_of_merit:
      - name: time
        regex: 'Time (?P<size>[0-9]+): (?P<time>[0-9.]+) s'
        units: s
    success_criteria:
      - name: timed
        match: 'Time [0-9]+:'
applications:
  bench:
    workloads:
      small:
        experiments:
          exp_{size}:
            variables:
              size: [8, 16]
"#;

    #[test]
    fn execute_then_analyze_extracts_figures_of_merit() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path(), BENCH);
        let engine = Engine::new(&ws);

        engine.run(Pipeline::Setup).unwrap().into_result().unwrap();
        engine.run(Pipeline::Execute).unwrap().into_result().unwrap();

        let exp_dir = run_dir(dir.path(), "bench", "small", "exp_16");
        let log = fs::read_to_string(exp_dir.join("exp_16.out")).unwrap();
        assert_eq!(log.trim(), "Time 16: 1.5 s");

        let summary = engine.run(Pipeline::Analyze).unwrap().into_result().unwrap();
        let state = summary.outcomes[1].experiment.state();
        assert_eq!(state.figures_of_merit.len(), 1);
        assert_eq!(state.figures_of_merit[0].name, "time");
        assert_eq!(state.figures_of_merit[0].value, "1.5");
        assert_eq!(state.figures_of_merit[0].units, "s");
        assert_eq!(state.success, Some(true));

        let results: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.results_file()).unwrap()).unwrap();
        assert_eq!(results["experiments"][0]["name"], "bench.small.exp_8");
        assert_eq!(results["experiments"][0]["figures_of_merit"][0]["value"], "1.5");
    }

    #[test]
    fn archive_copies_run_directory() {
        let dir = tempdir().unwrap();
        let ws = workspace(dir.path(), BENCH);
        let engine = Engine::new(&ws);
        engine.run(Pipeline::Setup).unwrap().into_result().unwrap();
        engine.run(Pipeline::Archive).unwrap().into_result().unwrap();

        let archived = dir.path().join("archive").join("bench.small.exp_8");
        assert!(archived.join("execute_experiment").is_file());
        assert!(archived.join(".hpcrunner_state").is_file());
    }
}
