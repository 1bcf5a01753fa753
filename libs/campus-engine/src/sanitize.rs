//! Redaction of hidden test detail before a verdict crosses the trust
//! boundary.
//!
//! Every grading path funnels through here as its final step; there is no
//! code path that returns validator output directly to a caller.

use campus_common::types::{CaseReport, Verdict};

pub const HIDDEN_CASE_MESSAGE: &str = "This is a hidden test case";

/// For a failed hidden case, drop everything that could reconstruct the
/// authored input or expected output; keep the learner-safe fields. All
/// other reports pass through with the hidden marker cleared.
pub fn sanitize_reports(reports: Vec<CaseReport>) -> Vec<CaseReport> {
    reports
        .into_iter()
        .map(|report| {
            if report.hidden && !report.passed {
                CaseReport {
                    test_number: report.test_number,
                    description: report.description,
                    input: None,
                    expected_output: None,
                    actual_output: None,
                    passed: report.passed,
                    execution_time: report.execution_time,
                    error: report.error,
                    timed_out: report.timed_out,
                    hidden: true,
                    points: report.points,
                    message: Some(HIDDEN_CASE_MESSAGE.to_string()),
                }
            } else {
                CaseReport {
                    hidden: false,
                    ..report
                }
            }
        })
        .collect()
}

pub fn sanitize_verdict(verdict: Verdict) -> Verdict {
    Verdict {
        results: sanitize_reports(verdict.results),
        ..verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(test_number: usize, passed: bool, hidden: bool) -> CaseReport {
        CaseReport {
            test_number,
            description: format!("case {test_number}"),
            input: Some("secret input".to_string()),
            expected_output: Some("secret expected".to_string()),
            actual_output: Some("actual".to_string()),
            passed,
            execution_time: 0.5,
            error: None,
            timed_out: false,
            hidden,
            points: 10,
            message: Some("Expected: secret expected, Got: actual".to_string()),
        }
    }

    #[test]
    fn failed_hidden_cases_are_redacted() {
        let sanitized = sanitize_reports(vec![report(1, false, true)]);
        let case = &sanitized[0];
        assert!(case.hidden);
        assert!(case.input.is_none());
        assert!(case.expected_output.is_none());
        assert!(case.actual_output.is_none());
        assert_eq!(case.message.as_deref(), Some(HIDDEN_CASE_MESSAGE));
        // Learner-safe fields survive.
        assert_eq!(case.test_number, 1);
        assert_eq!(case.description, "case 1");
        assert_eq!(case.execution_time, 0.5);
        assert!(!case.passed);
    }

    #[test]
    fn visible_cases_pass_through() {
        let sanitized = sanitize_reports(vec![report(1, false, false)]);
        let case = &sanitized[0];
        assert_eq!(case.input.as_deref(), Some("secret input"));
        assert_eq!(case.expected_output.as_deref(), Some("secret expected"));
        assert!(!case.hidden);
    }

    #[test]
    fn passed_hidden_cases_pass_through_without_the_flag() {
        let sanitized = sanitize_reports(vec![report(1, true, true)]);
        let case = &sanitized[0];
        assert!(!case.hidden);
        assert_eq!(case.input.as_deref(), Some("secret input"));
    }

    #[test]
    fn serialized_output_never_leaks_hidden_payloads() {
        let sanitized = sanitize_reports(vec![report(1, false, true)]);
        let body = serde_json::to_string(&sanitized[0]).unwrap();
        assert!(!body.contains("secret"));
        assert!(body.contains(HIDDEN_CASE_MESSAGE));
    }

    #[test]
    fn verdict_counts_are_preserved() {
        let verdict = Verdict {
            total_tests: 2,
            passed_tests: 1,
            failed_tests: 1,
            pass_percentage: 50.0,
            all_passed: false,
            results: vec![report(1, true, false), report(2, false, true)],
        };
        let sanitized = sanitize_verdict(verdict);
        assert_eq!(sanitized.total_tests, 2);
        assert_eq!(sanitized.passed_tests, 1);
        assert_eq!(sanitized.failed_tests, 1);
        assert!(sanitized.results[1].input.is_none());
    }
}
