//! Plain text output for race reports.

use crate::race::{Outcome, RaceReport};
use std::fmt::Write;

/// Render a race report as plain text (no colors).
pub fn render_plain(report: &RaceReport) -> String {
    let mut out = String::new();
    let _ = match (report.outcome, report.winner) {
        (Outcome::Winner, Some(winner)) => writeln!(out, "Winner: worker {}", winner),
        (Outcome::Exhausted, _) => writeln!(
            out,
            "No winner: report budget exhausted, worker {} leading",
            report.leader
        ),
        (outcome, _) => writeln!(
            out,
            "Race {}: worker {} leading",
            outcome.as_str(),
            report.leader
        ),
    };
    let _ = writeln!(
        out,
        "Reports processed: {}/{}",
        report.reports_processed, report.exhaustion_bound
    );
    if report.unconsumed_reports > 0 {
        let _ = writeln!(out, "Unconsumed reports: {}", report.unconsumed_reports);
    }
    let _ = writeln!(
        out,
        "Workers: {} ({} registered)  Target: {}  Elapsed: {} ms",
        report.workers, report.registered_workers, report.target, report.elapsed_ms
    );

    let failed: Vec<_> = report.failed_participants().collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "Abnormal exits:");
        for p in failed {
            let _ = writeln!(out, "  {}\t{}\t{}", p.role, p.pid, p.exit);
        }
    }
    out
}

/// Print a race report as plain text.
pub fn print_plain(report: &RaceReport) {
    print!("{}", render_plain(report));
}
