//! JSON output for race reports.

use crate::race::RaceReport;

/// Print a race report as JSON.
pub fn print_json(report: &RaceReport) {
    let json = serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string());
    println!("{}", json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::{Outcome, WorkerId};

    #[test]
    fn test_print_json() {
        let report = RaceReport {
            outcome: Outcome::Exhausted,
            winner: None,
            leader: WorkerId::new(2),
            reports_processed: 12,
            exhaustion_bound: 12,
            unconsumed_reports: 0,
            workers: 3,
            registered_workers: 3,
            target: 4,
            elapsed_ms: 5,
            participants: vec![],
        };

        // Should not panic
        print_json(&report);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"], "exhausted");
        assert!(value["winner"].is_null());
        assert_eq!(value["leader"], 2);
    }
}
