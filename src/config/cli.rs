//! CLI argument parsing using clap

use crate::transport::{SharedMemoryHandles, TransportKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// ipcsum - multi-process sum of squares over shared memory or pipes
#[derive(Parser, Debug)]
#[command(name = "ipcsum")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (overridden by IPCSUM_LOG)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compute the sum of squares of the numbers in a file
    Run(RunArgs),

    /// Worker process entry point, started by `run`
    #[command(hide = true)]
    Worker {
        #[command(subcommand)]
        mode: WorkerMode,
    },
}

/// Arguments of `ipcsum run`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// File of whitespace-separated numbers
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Number of worker processes (default: number of CPUs)
    #[arg(value_name = "WORKERS")]
    pub workers: Option<usize>,

    /// Transport between orchestrator and workers
    #[arg(value_name = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    /// TOML configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Include per-worker partitions and partial sums
    #[arg(long)]
    pub per_worker: bool,

    /// Count workers that publish no result as zero instead of failing
    #[arg(long)]
    pub allow_missing: bool,

    /// Fail if workers have not terminated after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

/// Transport-specific worker entry points
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum WorkerMode {
    /// Read the partition from shared memory, publish into a result slot
    Shm(SharedMemoryHandles),
    /// Read values from stdin, write the partial sum to stdout
    Pipe,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_positional_run_arguments() {
        let args = run_args(&["ipcsum", "run", "numbers.txt", "4", "pipe"]);
        assert_eq!(args.file, PathBuf::from("numbers.txt"));
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.transport, Some(TransportKind::Pipe));
        assert!(!args.json);
    }

    #[test]
    fn test_shm_alias_and_flags() {
        let args = run_args(&[
            "ipcsum", "run", "n.txt", "2", "shm", "--json", "--per-worker", "--allow-missing",
            "--timeout-secs", "9",
        ]);
        assert_eq!(args.transport, Some(TransportKind::SharedMemory));
        assert!(args.json && args.per_worker && args.allow_missing);
        assert_eq!(args.timeout_secs, Some(9));
    }

    #[test]
    fn test_optional_positionals() {
        let args = run_args(&["ipcsum", "run", "n.txt"]);
        assert_eq!(args.workers, None);
        assert_eq!(args.transport, None);
    }

    #[test]
    fn test_rejects_unknown_transport() {
        assert!(Cli::try_parse_from(["ipcsum", "run", "n.txt", "2", "socket"]).is_err());
        assert!(Cli::try_parse_from(["ipcsum", "run", "n.txt", "two"]).is_err());
    }

    #[test]
    fn test_global_debug_flag() {
        let cli = Cli::try_parse_from(["ipcsum", "run", "n.txt", "--debug"]).unwrap();
        assert!(cli.debug);
    }

    #[test]
    fn test_worker_pipe_mode() {
        let cli = Cli::try_parse_from(["ipcsum", "worker", "pipe"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Worker {
                mode: WorkerMode::Pipe
            }
        ));
    }

    #[test]
    fn test_worker_shm_mode_from_handles() {
        let handles = SharedMemoryHandles {
            input: "/ipcsum.1.abcd0123.in".into(),
            output: "/ipcsum.1.abcd0123.out".into(),
            lock: "/ipcsum.1.abcd0123.lock".into(),
            index: 1,
            workers: 2,
            count: 5,
        };
        let argv: Vec<String> = ["ipcsum", "worker"]
            .iter()
            .map(|s| s.to_string())
            .chain(handles.to_args())
            .collect();

        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Worker {
                mode: WorkerMode::Shm(parsed),
            } => assert_eq!(parsed, handles),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
