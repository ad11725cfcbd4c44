//! Output formatting for race reports.

pub mod json;
pub mod plain;

use crate::race::RaceReport;

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Plain text summary (default).
    #[default]
    Plain,
    /// JSON output.
    Json,
}

/// Format and print a race report to stdout.
pub fn print_report(report: &RaceReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => plain::print_plain(report),
        OutputFormat::Json => json::print_json(report),
    }
}
