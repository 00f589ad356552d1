//! Human-readable text output

use crate::coordinator::RunReport;
use std::fmt::Write;

/// Render a run report as text
///
/// The clamp warning (if any) comes first, then the total with six decimals.
/// With `per_worker`, one line per worker follows the total.
pub fn format_report(report: &RunReport, per_worker: bool) -> String {
    let mut out = String::new();

    if let Some(warning) = report.clamp_warning() {
        let _ = writeln!(out, "Warning: {}", warning);
    }
    let _ = writeln!(out, "Total sum of squares: {:.6}", report.total);

    if per_worker {
        for worker in &report.workers {
            let _ = write!(
                out,
                "  worker {:>3}: {:<16} {:>6} values  partial {:.6}",
                worker.index,
                worker.partition.to_string(),
                worker.partition.len(),
                worker.partial
            );
            if !worker.contributed {
                out.push_str("  (no result, counted as zero)");
            }
            out.push('\n');
        }
    }

    out
}

/// Print a run report to stdout
pub fn print_report(report: &RunReport, per_worker: bool) {
    print!("{}", format_report(report, per_worker));
}
