//! Error taxonomy for a sum-of-squares run
//!
//! Glue code (config, input loading, CLI) uses `anyhow` like the rest of the
//! crate. The orchestration core returns [`RunError`] so callers and tests can
//! match on the failure category.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for the orchestration core
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Fatal failure of a run
#[derive(Debug, Error)]
pub enum RunError {
    /// Fewer than two numbers, or a requested worker count of zero.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A shared memory segment, the semaphore, or a pipe pair could not be created.
    #[error("failed to acquire {resource}: {source}")]
    ResourceAcquisition {
        resource: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to start a worker process.
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    /// Attaching to a shared region, or a stream read/write, failed.
    #[error("transport error ({context}): {source}")]
    Transport {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A worker terminated without publishing its partial sum.
    #[error("worker {worker} terminated without publishing a result (exit: {status})")]
    MissingResult { worker: usize, status: String },

    /// A worker was still running when the completion deadline passed.
    #[error("worker {worker} did not terminate within {timeout:?}")]
    WorkerTimeout { worker: usize, timeout: Duration },

    /// Waiting on a worker process failed at the OS level.
    #[error("failed to wait for worker {worker}: {source}")]
    Wait {
        worker: usize,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub(crate) fn resource(resource: impl Into<String>, source: io::Error) -> Self {
        Self::ResourceAcquisition {
            resource: resource.into(),
            source,
        }
    }

    pub(crate) fn transport(context: impl Into<String>, source: io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Whether the error happened before any worker could have been spawned
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::ResourceAcquisition { .. })
    }
}
