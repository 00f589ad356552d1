//! Result statistics
//!
//! Aggregation of per-worker partial sums into a run total.

pub mod aggregator;

pub use aggregator::{aggregate, ResultAggregator};
