//! JSON output format
//!
//! One self-describing document per run, suitable for scripting:
//!
//! ```json
//! {
//!   "timestamp": "2026-01-01T12:00:00.000+00:00",
//!   "run_id": "4242.9f3c01ab",
//!   "transport": "pipe",
//!   "elements": 5,
//!   "requested_workers": 2,
//!   "effective_workers": 2,
//!   "clamped": false,
//!   "total": 55.0,
//!   "elapsed": { "micros": 2310, "human": "2.31ms" },
//!   // only with per_worker
//!   "workers": [ { "worker": 0, "start": 0, "end": 3, "partial": 14.0, "contributed": true, "exit_code": 0 } ]
//! }
//! ```

use crate::coordinator::{RunReport, WorkerOutcome};
use crate::transport::TransportKind;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        let human = format_duration_human(d);
        Self { micros, human }
    }
}

/// Per-worker entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonWorker {
    pub worker: usize,
    pub start: usize,
    pub end: usize,
    pub partial: f32,
    pub contributed: bool,
    pub exit_code: Option<i32>,
}

impl From<&WorkerOutcome> for JsonWorker {
    fn from(outcome: &WorkerOutcome) -> Self {
        Self {
            worker: outcome.index,
            start: outcome.partition.start,
            end: outcome.partition.end,
            partial: outcome.partial,
            contributed: outcome.contributed,
            exit_code: outcome.exit_code,
        }
    }
}

/// Complete JSON report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub timestamp: String,
    pub run_id: String,
    pub transport: TransportKind,
    pub elements: usize,
    pub requested_workers: usize,
    pub effective_workers: usize,
    pub clamped: bool,
    pub total: f64,
    pub elapsed: JsonDuration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<JsonWorker>,
}

impl JsonReport {
    /// Per-worker entries are included only with `per_worker`
    pub fn from_report(report: &RunReport, per_worker: bool) -> Self {
        let workers = if per_worker {
            report.workers.iter().map(JsonWorker::from).collect()
        } else {
            Vec::new()
        };

        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            run_id: report.run_id.clone(),
            transport: report.transport,
            elements: report.plan.element_count(),
            requested_workers: report.plan.requested_workers(),
            effective_workers: report.plan.worker_count(),
            clamped: report.clamp_warning().is_some(),
            total: report.total,
            elapsed: JsonDuration::from_duration(report.elapsed),
            workers,
        }
    }
}

/// Serialize a run report as pretty-printed JSON
pub fn to_json_string(report: &RunReport, per_worker: bool) -> Result<String> {
    Ok(serde_json::to_string_pretty(&JsonReport::from_report(report, per_worker))?)
}

/// Print a run report to stdout as JSON
pub fn print_report(report: &RunReport, per_worker: bool) -> Result<()> {
    println!("{}", to_json_string(report, per_worker)?);
    Ok(())
}

fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2}ms", d.as_secs_f64() * 1_000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_report;

    #[test]
    fn test_json_report_fields() {
        let report = sample_report(5, 2);
        let json = to_json_string(&report, true).unwrap();
        let parsed: JsonReport = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.transport, TransportKind::SharedMemory);
        assert_eq!(parsed.elements, 5);
        assert_eq!(parsed.effective_workers, 2);
        assert!(!parsed.clamped);
        assert_eq!(parsed.total, 55.0);
        assert_eq!(parsed.workers.len(), 2);
        assert_eq!((parsed.workers[1].start, parsed.workers[1].end), (3, 5));
        assert!(chrono::DateTime::parse_from_rfc3339(&parsed.timestamp).is_ok());
    }

    #[test]
    fn test_json_marks_clamp() {
        let report = sample_report(3, 5);
        let value: serde_json::Value = serde_json::from_str(&to_json_string(&report, false).unwrap()).unwrap();
        assert_eq!(value["clamped"], true);
        assert_eq!(value["requested_workers"], 5);
        assert_eq!(value["effective_workers"], 1);
        assert_eq!(value["transport"], "shared-memory");
    }

    #[test]
    fn test_json_workers_only_with_per_worker() {
        let report = sample_report(5, 2);

        let value: serde_json::Value = serde_json::from_str(&to_json_string(&report, false).unwrap()).unwrap();
        assert!(value.get("workers").is_none());
        assert_eq!(value["total"], 55.0);

        let value: serde_json::Value = serde_json::from_str(&to_json_string(&report, true).unwrap()).unwrap();
        assert_eq!(value["workers"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_format_duration_human() {
        assert_eq!(format_duration_human(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration_human(Duration::from_micros(2_500)), "2.50ms");
        assert_eq!(format_duration_human(Duration::from_millis(1_500)), "1.50s");
    }
}
