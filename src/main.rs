//! HPCRunner CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Render experiment directories and scripts
//! hpcrunner workspace.yaml setup
//!
//! # Submit without running anything
//! hpcrunner workspace.yaml execute --dry-run
//!
//! # Collect statuses and figures of merit, 8 experiments at a time
//! hpcrunner workspace.yaml analyze --parallel 8
//! ```

use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use hpcrunner::execution::RunSummary;
use hpcrunner::phases::{PhaseState, Pipeline};
use hpcrunner::{Engine, Workspace, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workspace_path: String,
    pipeline: Pipeline,
    dry_run: bool,
    max_parallel: Option<usize>,
    verbose: bool,
}

/// What the command line asks for.
#[derive(Debug)]
enum Command {
    Run(Config),
    Help,
    Version,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!();
}

fn print_usage() {
    println!("Usage: hpcrunner [OPTIONS] <WORKSPACE_FILE> <PIPELINE>");
    println!();
    println!("Arguments:");
    println!("  <WORKSPACE_FILE>    Path to the workspace YAML file");
    println!("  <PIPELINE>          One of: setup, execute, analyze, archive");
    println!();
    println!("Options:");
    println!("  --dry-run           Render and log commands without running them");
    println!("  --parallel N        Experiments run at once (default: number of CPUs)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  hpcrunner workspace.yaml setup");
    println!("  hpcrunner workspace.yaml execute --dry-run");
    println!("  hpcrunner workspace.yaml analyze --parallel 8");
}

fn parse_arguments(args: &[String]) -> Result<Command, String> {
    let mut positional: Vec<&str> = Vec::new();
    let mut dry_run = false;
    let mut verbose = false;
    let mut max_parallel = None;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            "--dry-run" => dry_run = true,
            "--verbose" | "-v" => verbose = true,
            "--parallel" | "-j" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "--parallel requires a number argument".to_string())?;
                let parsed: usize = value
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", value))?;
                if parsed == 0 {
                    return Err("--parallel must be at least 1".to_string());
                }
                max_parallel = Some(parsed);
            }
            arg if arg.starts_with('-') => return Err(format!("Unknown option: {}", arg)),
            arg => positional.push(arg),
        }
        i += 1;
    }

    match positional.as_slice() {
        [workspace, pipeline] => Ok(Command::Run(Config {
            workspace_path: workspace.to_string(),
            pipeline: pipeline.parse().map_err(|e: hpcrunner::Error| e.to_string())?,
            dry_run,
            max_parallel,
            verbose,
        })),
        [] | [_] => Err("expected a workspace file and a pipeline".to_string()),
        [_, _, extra, ..] => Err(format!("Unexpected argument: {}", extra)),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    for outcome in &summary.outcomes {
        let name = outcome.experiment.namespace();
        match &outcome.result {
            Ok(report) => {
                let skipped: Vec<String> = report
                    .phases
                    .iter()
                    .filter_map(|record| match &record.state {
                        PhaseState::Skipped(reason) => Some(format!("{} ({})", record.name, reason)),
                        _ => None,
                    })
                    .collect();
                if skipped.is_empty() {
                    println!("  {} {}", "OK".green().bold(), name);
                } else {
                    println!("  {} {} skipped: {}", "OK".green().bold(), name, skipped.join(", "));
                }
            }
            Err(e) => {
                println!("  {} {}: {}", "FAILED".red().bold(), name, e);
                let reached: Vec<String> = e
                    .phase_records()
                    .iter()
                    .map(|record| format!("{} {}", record.name, record.state))
                    .collect();
                if !reached.is_empty() {
                    println!("    {}", reached.join(", ").dimmed());
                }
            }
        }
    }

    if summary.pipeline == Pipeline::Analyze {
        for outcome in summary.outcomes.iter().filter(|o| o.is_success()) {
            let state = outcome.experiment.state();
            for fom in &state.figures_of_merit {
                println!(
                    "    {} {} = {} {}",
                    outcome.experiment.namespace().dimmed(),
                    fom.name,
                    fom.value.bold(),
                    fom.units
                );
            }
        }
    }

    print!("{}", summary.timeline.gantt_chart());

    let line = format!(
        "{} of {} experiment(s) succeeded in {:.2?}",
        summary.total() - summary.failed(),
        summary.total(),
        summary.elapsed
    );
    if summary.is_success() {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

fn run(config: Config) -> hpcrunner::Result<()> {
    let mut workspace = Workspace::load(&config.workspace_path)?;
    if config.dry_run {
        workspace = workspace.with_dry_run(true);
    }
    if workspace.dry_run() {
        info!("Mode: DRY RUN (commands will not execute)");
    }

    let mut engine = Engine::new(&workspace);
    if let Some(max) = config.max_parallel {
        engine.set_max_parallel(max);
    }

    let summary = engine.run(config.pipeline)?;
    print_summary(&summary);
    summary.into_result().map(|_| ())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_arguments(&args) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("{} {}", APP_NAME, VERSION);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(2);
        }
    };

    setup_logging(config.verbose);
    print_banner();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
