//! Worker process implementation
//!
//! A worker computes the sum of squares of its partition and publishes the
//! single-precision partial result through the transport it was started with.
//! Workers are separate processes (the `ipcsum worker ...` subcommand); the
//! functions here are what that subcommand runs, and they are equally callable
//! in-process, which is how the unit tests drive them.
//!
//! # Shared memory
//!
//! 1. Re-derive the partition from `(index, workers, count)`
//! 2. Map the input segment read-only and the result segment read-write
//! 3. Sum squares, then publish into slot `index` while holding the semaphore
//! 4. Unmap both segments and close the semaphore
//!
//! # Pipes
//!
//! Read values from stdin until end-of-stream, write one value to stdout. The
//! worker needs no index or bounds; the stream content is its partition.
//!
//! Any failure exits the worker without publishing. The orchestrator sees the
//! missing result and applies its missing-result policy.

use crate::error::{RunError, RunResult};
use crate::partition::partition_for;
use crate::transport::pipe::{read_value, write_value};
use crate::transport::shm::{Access, NamedSemaphore, ResultRegion, SharedMemoryHandles, SharedSegment};
use std::io::{self, BufReader, Read, Write};
use std::mem;

/// Single-precision sum of squares, accumulated in index order
#[inline]
pub fn sum_of_squares(values: &[f32]) -> f32 {
    values.iter().fold(0.0f32, |acc, &v| acc + v * v)
}

/// Run a shared-memory worker to completion; returns the published partial sum
pub fn run_shared_memory(handles: &SharedMemoryHandles) -> RunResult<f32> {
    if handles.workers == 0 || handles.index >= handles.workers {
        return Err(RunError::InvalidInput(format!(
            "worker index {} out of range for {} workers",
            handles.index, handles.workers
        )));
    }
    if handles.count < handles.workers {
        return Err(RunError::InvalidInput(format!(
            "{} elements cannot be split across {} workers",
            handles.count, handles.workers
        )));
    }

    let partition = partition_for(handles.index, handles.workers, handles.count);

    let mut input = SharedSegment::attach(
        &handles.input,
        handles.count * mem::size_of::<f32>(),
        Access::ReadOnly,
    )
    .map_err(|e| RunError::transport(format!("attaching input segment {}", handles.input), e))?;

    let mut results = ResultRegion::attach(&handles.output, handles.workers)
        .map_err(|e| RunError::transport(format!("attaching result segment {}", handles.output), e))?;

    let mut lock = NamedSemaphore::open(&handles.lock)
        .map_err(|e| RunError::transport(format!("opening semaphore {}", handles.lock), e))?;

    let values = input.floats().get(partition.range()).ok_or_else(|| {
        RunError::InvalidInput(format!(
            "partition {} exceeds input of {} elements",
            partition,
            input.floats().len()
        ))
    })?;
    let sum = sum_of_squares(values);

    results
        .publish(&lock, handles.index, sum)
        .map_err(|e| RunError::transport(format!("publishing result of worker {}", handles.index), e))?;

    tracing::debug!(worker = handles.index, %partition, partial = sum, "published partial sum");

    // The result is already visible; detach problems are not worth failing over
    if let Err(e) = input.release() {
        tracing::warn!("failed to detach input segment: {}", e);
    }
    if let Err(e) = results.release() {
        tracing::warn!("failed to detach result segment: {}", e);
    }
    if let Err(e) = lock.release() {
        tracing::warn!("failed to close semaphore: {}", e);
    }

    Ok(sum)
}

/// Run a pipe worker over `input`/`output`; returns the written partial sum
pub fn run_pipe<R: Read, W: Write>(input: R, mut output: W) -> RunResult<f32> {
    let mut reader = BufReader::new(input);
    let mut sum = 0.0f32;
    let mut count = 0usize;

    while let Some(value) =
        read_value(&mut reader).map_err(|e| RunError::transport("reading worker input", e))?
    {
        sum += value * value;
        count += 1;
    }

    write_value(&mut output, sum)
        .and_then(|()| output.flush())
        .map_err(|e| RunError::transport("writing worker result", e))?;

    tracing::debug!(values = count, partial = sum, "pipe worker done");
    Ok(sum)
}

/// Pipe worker bound to this process's stdin/stdout
pub fn run_pipe_stdio() -> RunResult<f32> {
    run_pipe(io::stdin().lock(), io::stdout().lock())
}
