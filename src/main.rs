//! ipcsum CLI entry point
//!
//! `ipcsum run` is the orchestrator. It re-executes this binary as
//! `ipcsum worker shm ...` or `ipcsum worker pipe` once per partition.

use anyhow::{Context, Result};
use ipcsum::config::cli::{Cli, Command, RunArgs, WorkerMode};
use ipcsum::config::{self, validator};
use ipcsum::coordinator::launcher::CommandLauncher;
use ipcsum::{input, output, worker, Orchestrator};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    match cli.command {
        Command::Run(args) => run(&args),
        Command::Worker { mode } => run_worker(&mode),
    }
}

/// Logs go to stderr; stdout carries the report, or a pipe worker's result
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_env(ipcsum::LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "warn" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Orchestrator mode
fn run(args: &RunArgs) -> Result<()> {
    let config = config::toml::build_config(args)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    let numbers = input::load_numbers(&args.file)?;
    validator::check_worker_load(&config.run, numbers.len());
    tracing::debug!(
        file = %args.file.display(),
        elements = numbers.len(),
        workers = config.run.worker_count(),
        transport = %config.run.transport,
        "loaded input"
    );

    let launcher =
        CommandLauncher::current_exe().context("Failed to locate the ipcsum executable")?;
    let orchestrator = Orchestrator::new(launcher, config.run.run_options());
    let report = orchestrator.run(&numbers, config.run.worker_count(), config.run.transport)?;

    output::print_report(&report, &config.output)
}

/// Worker mode; any error exits nonzero without publishing a result
fn run_worker(mode: &WorkerMode) -> Result<()> {
    let partial = match mode {
        WorkerMode::Shm(handles) => worker::run_shared_memory(handles),
        WorkerMode::Pipe => worker::run_pipe_stdio(),
    }
    .context("Worker failed")?;

    tracing::debug!(partial, "worker finished");
    Ok(())
}
