//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! A configuration file is optional; every key has a default and CLI flags
//! override file values.
//!
//! ```toml
//! [run]
//! workers = 4
//! transport = "pipe"          # "shared-memory" (or "shm"), "pipe"
//! missing_result = "error"    # "error", "zero"
//! timeout_secs = 30
//!
//! [output]
//! format = "json"             # "text", "json"
//! per_worker = true
//! ```

pub mod cli;
pub mod toml;
pub mod validator;

use crate::coordinator::wait::WaitPolicy;
use crate::coordinator::{MissingResultPolicy, RunOptions};
use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Orchestration settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Requested worker count (default: number of logical CPUs)
    pub workers: Option<usize>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub missing_result: MissingResultPolicy,
    /// Completion deadline in seconds (default: wait without bound)
    pub timeout_secs: Option<u64>,
}

impl RunConfig {
    /// Requested worker count, before clamping to the input size
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            missing_result: self.missing_result,
            wait: WaitPolicy::from_timeout(self.timeout_secs),
        }
    }
}

/// Report settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Include one line (or JSON entry) per worker
    #[serde(default)]
    pub per_worker: bool,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
