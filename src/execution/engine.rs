//! Pipeline Execution Engine
//!
//! Runs one pipeline over every experiment of a workspace:
//! - experiments are spread over at most `max_parallel` worker threads
//! - each worker walks the experiment's ordered phases and saves its state
//! - a failing experiment does not stop the others; the run fails at the end
//! - `setup` writes `all_experiments`, `analyze` writes `results.latest.json`

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::experiment::{Experiment, FomValue};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::phases::{Pipeline, PipelineReport};
use crate::workflow_manager::template::write_artifact;
use crate::workflow_manager::ExperimentStatus;
use crate::workspace::Workspace;

/// What a worker sends back: the experiment's index, the experiment
/// itself and how its pipeline went.
type WorkerResult = (usize, Experiment, Result<PipelineReport>);

/// Outcome of one experiment in a pipeline run.
#[derive(Debug)]
pub struct ExperimentOutcome {
    pub experiment: Experiment,
    pub result: Result<PipelineReport>,
}

impl ExperimentOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything a pipeline run produced, in experiment order.
#[derive(Debug)]
pub struct RunSummary {
    pub pipeline: Pipeline,
    pub outcomes: Vec<ExperimentOutcome>,
    pub timeline: ExecutionTimeline,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Turns a run with failed experiments into an error.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::ExperimentsFailed {
                pipeline: self.pipeline,
                failed: self.failed(),
                total: self.total(),
            })
        }
    }
}

/// One line of `results.latest.json`.
#[derive(Debug, Serialize)]
struct ExperimentResults<'a> {
    name: &'a str,
    status: ExperimentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    figures_of_merit: &'a [FomValue],
}

#[derive(Debug, Serialize)]
struct ResultsFile<'a> {
    timestamp: DateTime<Utc>,
    experiments: Vec<ExperimentResults<'a>>,
}

/// Pipeline execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use hpcrunner::execution::Engine;
/// use hpcrunner::phases::Pipeline;
/// use hpcrunner::workspace::Workspace;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workspace = Workspace::load("workspace.yaml")?;
///     let mut engine = Engine::new(&workspace);
///     engine.set_max_parallel(4);
///
///     let summary = engine.run(Pipeline::Setup)?;
///     println!("{} experiment(s) set up", summary.total());
///     Ok(())
/// }
/// ```
pub struct Engine<'w> {
    workspace: &'w Workspace,
    max_parallel: usize,
}

impl<'w> Engine<'w> {
    /// Engine using one worker per CPU.
    pub fn new(workspace: &'w Workspace) -> Self {
        Self {
            workspace,
            max_parallel: num_cpus::get().max(1),
        }
    }

    /// Sets the maximum number of experiments run at once (at least 1).
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Generates the workspace's experiments and runs `pipeline` on each.
    pub fn run(&self, pipeline: Pipeline) -> Result<RunSummary> {
        let experiments = self.workspace.experiments()?;
        self.run_experiments(pipeline, experiments)
    }

    /// Runs `pipeline` on the given experiments.
    ///
    /// Only workspace-level failures (like an unwritable results file)
    /// are returned as errors; per-experiment failures are in the summary.
    pub fn run_experiments(
        &self,
        pipeline: Pipeline,
        experiments: Vec<Experiment>,
    ) -> Result<RunSummary> {
        let start_time = Instant::now();
        let total = experiments.len();
        let mut timeline = ExecutionTimeline::new();

        info!(
            "Running pipeline '{}' on {} experiment(s) (max parallel: {}, dry run: {})",
            pipeline,
            total,
            self.max_parallel,
            self.workspace.dry_run()
        );

        let mut slots: Vec<Option<ExperimentOutcome>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        let workspace = self.workspace;
        thread::scope(|scope| -> Result<()> {
            let (tx, rx): (Sender<WorkerResult>, Receiver<WorkerResult>) = channel();
            let mut pending = experiments.into_iter().enumerate();
            let mut running = 0;

            loop {
                // Fill free worker slots
                while running < self.max_parallel {
                    let Some((index, experiment)) = pending.next() else {
                        break;
                    };
                    timeline.add_event(experiment.namespace(), EventType::Started);

                    let tx = tx.clone();
                    scope.spawn(move || {
                        let (experiment, result) = run_experiment(workspace, pipeline, experiment);
                        if let Err(e) = tx.send((index, experiment, result)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    });
                    running += 1;
                }

                if running == 0 {
                    break;
                }

                let (index, experiment, result) = rx
                    .recv()
                    .map_err(|e| Error::Config(format!("worker channel closed: {}", e)))?;
                running -= 1;

                match &result {
                    Ok(report) => {
                        debug!(
                            "Experiment '{}' finished pipeline '{}' in {} ms",
                            experiment.namespace(),
                            pipeline,
                            report.total_duration_ms()
                        );
                        timeline.add_event(experiment.namespace(), EventType::Completed);
                    }
                    Err(e) => {
                        error!("{}", e);
                        timeline.add_event(experiment.namespace(), EventType::Failed);
                    }
                }
                slots[index] = Some(ExperimentOutcome { experiment, result });
            }
            Ok(())
        })?;

        let mut outcomes: Vec<ExperimentOutcome> = slots.into_iter().flatten().collect();

        match pipeline {
            Pipeline::Setup => self.write_all_experiments(&mut outcomes)?,
            Pipeline::Analyze => self.write_results(&outcomes)?,
            _ => {}
        }

        let summary = RunSummary {
            pipeline,
            outcomes,
            timeline,
            elapsed: start_time.elapsed(),
        };
        info!(
            "Pipeline '{}' finished: {} of {} experiment(s) succeeded in {:.2?}",
            pipeline,
            summary.total() - summary.failed(),
            summary.total(),
            summary.elapsed
        );
        Ok(summary)
    }

    /// Writes one `{batch_submit}` line per set-up experiment.
    fn write_all_experiments(&self, outcomes: &mut [ExperimentOutcome]) -> Result<()> {
        let mut script = String::from("#!/bin/bash\n");
        for outcome in outcomes.iter_mut().filter(|o| o.is_success()) {
            let command = outcome.experiment.expander_mut().expand_var_name("batch_submit")?;
            script.push_str(command.trim_end());
            script.push('\n');
        }

        let path = self.workspace.all_experiments_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        write_artifact(&path, &script)?;
        info!("Wrote {}", path.display());
        Ok(())
    }

    /// Writes figures of merit and statuses of every analyzed experiment.
    fn write_results(&self, outcomes: &[ExperimentOutcome]) -> Result<()> {
        let experiments: Vec<ExperimentResults> = outcomes
            .iter()
            .map(|o| {
                let state = o.experiment.state();
                ExperimentResults {
                    name: o.experiment.namespace(),
                    status: state.status,
                    success: state.success,
                    figures_of_merit: &state.figures_of_merit,
                }
            })
            .collect();
        let results = ResultsFile {
            timestamp: Utc::now(),
            experiments,
        };

        let path = self.workspace.results_file();
        let json = serde_json::to_string_pretty(&results)?;
        std::fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        info!("Wrote results to {}", path.display());
        Ok(())
    }
}

/// Runs one pipeline on one experiment and persists its state.
fn run_experiment(
    workspace: &Workspace,
    pipeline: Pipeline,
    mut experiment: Experiment,
) -> (Experiment, Result<PipelineReport>) {
    experiment.start_pipeline(pipeline);

    let definition = Arc::clone(experiment.definition());
    let result = definition.phases.execute(pipeline, workspace, &mut experiment);

    if let Err(e) = experiment.save_state() {
        warn!(
            "Failed to save state of '{}': {}",
            experiment.namespace(),
            e
        );
    }
    (experiment, result)
}
