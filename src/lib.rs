//! ipcsum - multi-process sum of squares
//!
//! An orchestrator splits a sequence of numbers into contiguous partitions,
//! starts one worker process per partition, and adds up the partial sums of
//! squares the workers send back.
//!
//! # Architecture
//!
//! - **Partitioning**: balanced contiguous ranges, worker count clamped to `N / 2`
//! - **Transports**: POSIX shared memory guarded by a named semaphore, or one
//!   stdin/stdout pipe pair per worker
//! - **Workers**: the same binary re-executed in worker mode
//! - **Aggregation**: double-precision total of single-precision partials
//! - **Lifecycle**: resources are released and workers reaped on every path

pub mod config;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod output;
pub mod partition;
pub mod stats;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Orchestrator, RunOptions, RunReport};
pub use error::{RunError, RunResult};
pub use input::NumberSequence;
pub use transport::TransportKind;

/// Result type used throughout ipcsum
pub type Result<T> = anyhow::Result<T>;

/// Environment variable holding the log filter; forwarded to workers
pub const LOG_ENV: &str = "IPCSUM_LOG";
