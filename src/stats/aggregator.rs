//! Result aggregation
//!
//! Workers produce single-precision partial sums. The aggregator merges them
//! into one total using double-precision accumulation, while keeping the
//! per-worker values for reporting.
//!
//! # Example
//!
//! ```
//! use ipcsum::stats::aggregator::ResultAggregator;
//!
//! let mut aggregator = ResultAggregator::new();
//! aggregator.add_worker(0, 14.0);
//! aggregator.add_worker(1, 41.0);
//!
//! assert_eq!(aggregator.aggregate(), 55.0);
//! assert_eq!(aggregator.partials(), vec![14.0, 41.0]);
//! ```

use std::collections::BTreeMap;

/// Sum partial results in double precision
///
/// Pure and order-stable: partials are added in slice order.
///
/// ```
/// assert_eq!(ipcsum::stats::aggregate(&[1.0, 4.0, 9.0]), 14.0);
/// ```
pub fn aggregate(partials: &[f32]) -> f64 {
    partials.iter().map(|&p| f64::from(p)).sum()
}

/// Partial-result aggregator for multiple workers
///
/// # Usage
///
/// 1. Create aggregator with `new()`
/// 2. Record each worker's partial with `add_worker()`
/// 3. Get the total with `aggregate()`
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    /// worker index → partial sum, iterated in index order
    partials: BTreeMap<usize, f32>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a worker's partial sum
    ///
    /// Result slots are write-once: a second value for the same worker is
    /// ignored and `false` is returned.
    pub fn add_worker(&mut self, worker_id: usize, partial: f32) -> bool {
        if self.partials.contains_key(&worker_id) {
            tracing::warn!(worker = worker_id, "duplicate partial result ignored");
            return false;
        }
        self.partials.insert(worker_id, partial);
        true
    }

    pub fn num_workers(&self) -> usize {
        self.partials.len()
    }

    /// Partials in worker index order
    pub fn partials(&self) -> Vec<f32> {
        self.partials.values().copied().collect()
    }

    /// Total across all recorded workers, in double precision
    pub fn aggregate(&self) -> f64 {
        aggregate(&self.partials())
    }
}
