//! Report rendering
//!
//! Text for people, JSON for scripts. Both go to stdout; logs go to stderr.

pub mod json;
pub mod text;

use crate::config::{OutputConfig, OutputFormat};
use crate::coordinator::RunReport;
use crate::Result;

/// Print a run report in the configured format
pub fn print_report(report: &RunReport, output: &OutputConfig) -> Result<()> {
    match output.format {
        OutputFormat::Text => text::print_report(report, output.per_worker),
        OutputFormat::Json => json::print_report(report, output.per_worker)?,
    }
    Ok(())
}
