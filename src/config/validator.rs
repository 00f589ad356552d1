//! Configuration validation

use super::*;
use crate::partition::effective_worker_count;
use anyhow::Result;

/// Requested workers beyond this multiple of the CPU count draw a warning
const OVERSUBSCRIPTION_FACTOR: usize = 4;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_run(&config.run)?;
    Ok(())
}

/// Validate orchestration settings
pub fn validate_run(run: &RunConfig) -> Result<()> {
    if run.workers == Some(0) {
        anyhow::bail!("The number of workers must be a positive integer");
    }

    if run.timeout_secs == Some(0) {
        anyhow::bail!("timeout_secs must be greater than 0");
    }

    Ok(())
}

/// Warn when the workers that will actually run far exceed the CPU count
///
/// Applies the same clamp as the partitioner, so it needs the input size.
/// Returns whether the warning fired.
pub fn check_worker_load(run: &RunConfig, elements: usize) -> bool {
    let (workers, _) = effective_worker_count(elements, run.worker_count());
    let cpus = num_cpus::get();
    let oversubscribed = workers > cpus * OVERSUBSCRIPTION_FACTOR;
    if oversubscribed {
        tracing::warn!(
            workers,
            cpus,
            "workers far exceed available CPUs; each worker is a separate process"
        );
    }
    oversubscribed
}
