//! Work partitioning
//!
//! Splits `[0, N)` into contiguous, ordered, non-overlapping ranges, one per
//! worker. The first `N % W` partitions receive one extra element, so sizes
//! differ by at most one.
//!
//! The requested worker count is clamped to `N / 2` before partitioning so that
//! every partition holds at least two elements whenever possible.
//!
//! # Example
//!
//! ```
//! use ipcsum::partition::PartitionPlan;
//!
//! let plan = PartitionPlan::new(5, 2).unwrap();
//! assert_eq!(plan.worker_count(), 2);
//! assert_eq!(plan.partitions()[0].len(), 3);
//! assert_eq!(plan.partitions()[1].len(), 2);
//! assert!(plan.clamp_warning().is_none());
//! ```

use crate::error::{RunError, RunResult};
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Half-open index range `[start, end)` into the number sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Emitted when the requested worker count had to be reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClampWarning {
    pub requested: usize,
    pub effective: usize,
}

impl fmt::Display for ClampWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Number of child processes adjusted to {} to match input size constraints.",
            self.effective
        )
    }
}

/// Apply the clamp policy: `min(requested, count / 2)`
///
/// Returns the effective count and, when it differs from the request, the
/// warning to surface. Callers must have validated `count >= 2` and
/// `requested >= 1`.
pub fn effective_worker_count(count: usize, requested: usize) -> (usize, Option<ClampWarning>) {
    let ceiling = count / 2;
    if requested > ceiling {
        (
            ceiling,
            Some(ClampWarning {
                requested,
                effective: ceiling,
            }),
        )
    } else {
        (requested, None)
    }
}

/// Partition assigned to worker `index` out of `workers` over `count` elements
///
/// This is the closed form of the running-sum layout, used by shared-memory
/// workers to re-derive their own range from their index.
pub fn partition_for(index: usize, workers: usize, count: usize) -> Partition {
    let base = count / workers;
    let remainder = count % workers;
    let start = index * base + index.min(remainder);
    let size = base + usize::from(index < remainder);
    Partition {
        start,
        end: start + size,
    }
}

/// Build the ordered partition list for `workers` over `count` elements
pub fn split(count: usize, workers: usize) -> Vec<Partition> {
    let base = count / workers;
    let remainder = count % workers;

    let mut partitions = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        let size = if i < remainder { base + 1 } else { base };
        partitions.push(Partition {
            start,
            end: start + size,
        });
        start += size;
    }
    partitions
}

/// Validated, clamped partitioning of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    count: usize,
    requested: usize,
    partitions: Vec<Partition>,
    warning: Option<ClampWarning>,
}

impl PartitionPlan {
    /// Validate inputs, clamp the worker count and partition
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `count < 2` or `requested < 1`.
    pub fn new(count: usize, requested: usize) -> RunResult<Self> {
        if count < 2 {
            return Err(RunError::InvalidInput(format!(
                "at least 2 numbers are required, got {}",
                count
            )));
        }
        if requested < 1 {
            return Err(RunError::InvalidInput(
                "the number of workers must be a positive integer".to_string(),
            ));
        }

        let (workers, warning) = effective_worker_count(count, requested);
        Ok(Self {
            count,
            requested,
            partitions: split(count, workers),
            warning,
        })
    }

    pub fn element_count(&self) -> usize {
        self.count
    }

    pub fn requested_workers(&self) -> usize {
        self.requested
    }

    pub fn worker_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn clamp_warning(&self) -> Option<ClampWarning> {
        self.warning
    }
}
