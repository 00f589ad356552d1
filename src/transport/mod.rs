//! Orchestrator/worker transports
//!
//! A transport moves each worker's input slice to it and its partial sum back.
//! Two implementations exist:
//!
//! - **Shared memory** ([`shm`]): the whole sequence is copied once into a
//!   read-only segment, results land in a second segment of per-worker slots,
//!   and a named semaphore serializes every write to the result segment.
//! - **Pipes** ([`pipe`]): each worker gets a private stdin/stdout pipe pair.
//!   The orchestrator streams the worker's values into stdin, closes it, and
//!   reads exactly one value back from stdout.
//!
//! # Lifecycle
//!
//! 1. Create the concrete transport (`SharedMemoryTransport::create` or
//!    `PipeTransport::create`). All OS resources exist after this step.
//! 2. For every partition, ask for a [`WorkerInvocation`] and spawn it.
//! 3. `send_inputs()` then `receive_results()`.
//! 4. After every worker has terminated, `collect()` the result slots.
//! 5. `release()`, unconditionally, on success and failure paths alike.
//!
//! Named kernel objects are derived from a [`RunId`] so concurrent runs never
//! share a segment or semaphore.

pub mod pipe;
pub mod shm;

use crate::error::RunResult;
use crate::partition::Partition;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::OwnedFd;
use std::process::{Command, Stdio};

pub use pipe::PipeTransport;
pub use shm::{SharedMemoryHandles, SharedMemoryTransport};

/// Transport selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Shared memory segments guarded by a named semaphore
    #[default]
    #[serde(alias = "shm")]
    #[value(name = "shared-memory", alias = "shm")]
    SharedMemory,
    /// One stdin/stdout pipe pair per worker
    Pipe,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::SharedMemory => write!(f, "shared-memory"),
            TransportKind::Pipe => write!(f, "pipe"),
        }
    }
}

/// Per-run discriminator for named kernel objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    pid: u32,
    nonce: String,
}

impl RunId {
    pub fn generate() -> Self {
        let mut nonce = uuid::Uuid::new_v4().simple().to_string();
        nonce.truncate(8);
        Self {
            pid: std::process::id(),
            nonce,
        }
    }

    /// POSIX object name for `role`, e.g. `/ipcsum.4242.9f3c01ab.lock`
    ///
    /// Kept under 31 bytes so it is valid on macOS as well as Linux.
    pub fn resource_name(&self, role: &str) -> String {
        format!("/ipcsum.{}.{}.{}", self.pid, self.nonce, role)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pid, self.nonce)
    }
}

/// How a worker's standard streams are wired at spawn time
#[derive(Debug)]
pub enum StdioBinding {
    /// No data on stdin, stdout inherited from the orchestrator
    Inherit,
    /// Child ends of a pipe pair become the worker's stdin and stdout
    Streams { stdin: OwnedFd, stdout: OwnedFd },
}

impl StdioBinding {
    /// Apply the binding to a command; stderr is always inherited
    pub fn apply(self, command: &mut Command) {
        match self {
            StdioBinding::Inherit => {
                command.stdin(Stdio::null());
                command.stdout(Stdio::inherit());
            }
            StdioBinding::Streams { stdin, stdout } => {
                command.stdin(Stdio::from(stdin));
                command.stdout(Stdio::from(stdout));
            }
        }
        command.stderr(Stdio::inherit());
    }
}

/// Everything a launcher needs to start one worker
#[derive(Debug)]
pub struct WorkerInvocation {
    /// Worker ordinal
    pub index: usize,
    /// Worker-mode arguments (after the program's own `worker` subcommand)
    pub args: Vec<String>,
    pub stdio: StdioBinding,
}

/// Orchestrator side of a transport
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Build the invocation for worker `index`, bound to `partition`
    fn invocation(&mut self, index: usize, partition: &Partition) -> RunResult<WorkerInvocation>;

    /// Deliver every worker's input; called once, after all workers are spawned
    fn send_inputs(&mut self) -> RunResult<()>;

    /// Receive results that arrive before termination (blocking)
    fn receive_results(&mut self) -> RunResult<()>;

    /// Read all result slots; `None` marks a worker that never published.
    /// Only valid after every worker has terminated.
    fn collect(&mut self) -> RunResult<Vec<Option<f32>>>;

    /// Release all OS resources. Idempotent and infallible: problems are logged.
    fn release(&mut self);
}
