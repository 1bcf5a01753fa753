//! Test case validation: run the staged submission once per case, compare
//! with the pluggable rules, and aggregate.
//!
//! Cases run sequentially in declared order because later cases may depend
//! on state left by earlier ones. A case that errors, times out, or exits
//! non-zero is recorded as failed and validation continues; a single bad
//! case never aborts the batch.

use std::path::Path;
use std::time::{Duration, Instant};

use campus_common::types::{CaseReport, ExecutionResult, SqlCase, TestCase, Verdict};
use serde_json::json;
use tracing::{debug, warn};

use crate::compare;
use crate::error::EngineError;
use crate::executor::{CommandSpec, ProcessExecutor};
use crate::runner::{ExternalRunner, RunnerRequest};
use crate::sqllab::SqlSandbox;

/// Fold case reports into the aggregate verdict.
pub fn aggregate(results: Vec<CaseReport>) -> Verdict {
    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.passed).count();
    let failed_tests = total_tests - passed_tests;
    let pass_percentage = if total_tests == 0 {
        0.0
    } else {
        (passed_tests as f64 / total_tests as f64 * 100.0 * 100.0).round() / 100.0
    };
    Verdict {
        total_tests,
        passed_tests,
        failed_tests,
        pass_percentage,
        all_passed: total_tests > 0 && failed_tests == 0,
        results,
    }
}

/// Run every code test case against the staged submission.
pub async fn validate_code_cases(
    executor: &ProcessExecutor,
    runner: Option<&ExternalRunner>,
    run_command: &str,
    arena: &Path,
    cases: &[TestCase],
    time_limit: Duration,
) -> Vec<CaseReport> {
    let mut reports = Vec::with_capacity(cases.len());
    for (idx, case) in cases.iter().enumerate() {
        let test_number = idx + 1;
        debug!(test_number, description = %case.description, "running test case");
        let report = match runner {
            Some(runner) => {
                run_case_via_runner(runner, run_command, arena, case, test_number, time_limit)
                    .await
            }
            None => run_case_local(executor, run_command, arena, case, test_number, time_limit)
                .await,
        };
        reports.push(report);
    }
    reports
}

async fn run_case_local(
    executor: &ProcessExecutor,
    run_command: &str,
    arena: &Path,
    case: &TestCase,
    test_number: usize,
    time_limit: Duration,
) -> CaseReport {
    let spec = CommandSpec::shell(run_command)
        .with_cwd(arena)
        .with_stdin(case.input.clone())
        .with_timeout(time_limit);
    match executor.run(&spec).await {
        Ok(result) => code_case_report(case, test_number, &result),
        Err(err) => {
            warn!(test_number, "test case execution failed: {err}");
            failed_case_report(case, test_number, err.to_string())
        }
    }
}

async fn run_case_via_runner(
    runner: &ExternalRunner,
    run_command: &str,
    arena: &Path,
    case: &TestCase,
    test_number: usize,
    time_limit: Duration,
) -> CaseReport {
    let data = json!({
        "command": run_command,
        "input": case.input,
        "expected_output": case.expected_output,
        "time_limit_seconds": time_limit.as_secs(),
    });
    let request = RunnerRequest {
        exercise_type: "code",
        exercise_data: &data,
    };
    // Give the runner a little headroom over the case budget so its own
    // timeout reporting wins.
    let budget = time_limit + Duration::from_secs(5);
    match runner
        .invoke(&request, &Default::default(), Some(arena), budget)
        .await
    {
        Ok(reply) => CaseReport {
            test_number,
            description: case.description.clone(),
            input: Some(case.input.clone()),
            expected_output: Some(case.expected_output.clone()),
            actual_output: Some(reply.output.clone()),
            passed: reply.pass && !reply.timed_out,
            execution_time: 0.0,
            error: None,
            timed_out: reply.timed_out,
            hidden: case.hidden,
            points: case.points,
            message: if reply.messages.is_empty() {
                None
            } else {
                Some(reply.messages.join("\n"))
            },
        },
        Err(err) => {
            warn!(test_number, "external runner failed: {err}");
            failed_case_report(case, test_number, "runner_error".to_string())
        }
    }
}

fn code_case_report(case: &TestCase, test_number: usize, result: &ExecutionResult) -> CaseReport {
    let mut error = None;
    let mut message = None;

    let passed = if result.timed_out {
        error = Some("execution timed out".to_string());
        false
    } else if !matches!(result.exit_code, Some(0)) {
        error = Some(match result.exit_code {
            Some(code) => format!("process exited with code {code}"),
            None => "process terminated by signal".to_string(),
        });
        false
    } else {
        match &case.rules {
            Some(rules) => match compare::check_output_rules(rules, &result.output) {
                Ok(()) => true,
                Err(reason) => {
                    message = Some(reason);
                    false
                }
            },
            None => {
                let ok = compare::expected_matches(&result.output, &case.expected_output);
                if !ok {
                    message = Some("output does not match the expected output".to_string());
                }
                ok
            }
        }
    };

    CaseReport {
        test_number,
        description: case.description.clone(),
        input: Some(case.input.clone()),
        expected_output: Some(case.expected_output.clone()),
        actual_output: Some(compare::normalize_output(&result.output)),
        passed,
        execution_time: result.execution_time(),
        error,
        timed_out: result.timed_out,
        hidden: case.hidden,
        points: case.points,
        message,
    }
}

fn failed_case_report(case: &TestCase, test_number: usize, error: String) -> CaseReport {
    CaseReport {
        test_number,
        description: case.description.clone(),
        input: Some(case.input.clone()),
        expected_output: Some(case.expected_output.clone()),
        actual_output: None,
        passed: false,
        execution_time: 0.0,
        error: Some(error),
        timed_out: false,
        hidden: case.hidden,
        points: case.points,
        message: None,
    }
}

/// Run every SQL case: per-case setup, then the learner query, then the
/// structural comparison. Driver failures become failed cases with
/// sanitized messages.
pub async fn validate_sql_cases(
    sandbox: &SqlSandbox,
    query: &str,
    cases: &[SqlCase],
    time_limit: Duration,
) -> Vec<CaseReport> {
    let mut reports = Vec::with_capacity(cases.len());
    for (idx, case) in cases.iter().enumerate() {
        let test_number = idx + 1;
        reports.push(run_sql_case(sandbox, query, case, test_number, time_limit).await);
    }
    reports
}

async fn run_sql_case(
    sandbox: &SqlSandbox,
    query: &str,
    case: &SqlCase,
    test_number: usize,
    time_limit: Duration,
) -> CaseReport {
    let expected_json = serde_json::to_string(&case.expected).unwrap_or_default();
    let mut report = CaseReport {
        test_number,
        description: case.description.clone(),
        input: case.setup.clone(),
        expected_output: Some(expected_json),
        actual_output: None,
        passed: false,
        execution_time: 0.0,
        error: None,
        timed_out: false,
        hidden: case.hidden,
        points: case.points,
        message: None,
    };

    if let Some(setup) = &case.setup {
        if let Err(err) = sandbox.batch(setup).await {
            warn!(test_number, "sql case setup failed: {err}");
            report.error = Some(err.to_string());
            return report;
        }
    }

    let started = Instant::now();
    match sandbox.query(query, time_limit).await {
        Ok(result) => {
            report.execution_time =
                (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
            report.actual_output = Some(
                serde_json::to_string(&json!({
                    "columns": result.columns,
                    "rows": result.rows,
                }))
                .unwrap_or_default(),
            );
            match compare::check_sql_result(&case.expected, &result.columns, &result.rows) {
                Ok(()) => report.passed = true,
                Err(reason) => report.message = Some(reason),
            }
        }
        Err(EngineError::ExecutionTimeout(_)) => {
            report.timed_out = true;
            report.error = Some("query timed out".to_string());
        }
        Err(err) => {
            report.error = Some(err.to_string());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_case(expected: &str) -> TestCase {
        TestCase {
            description: "doubles the input".to_string(),
            input: "21".to_string(),
            expected_output: expected.to_string(),
            rules: None,
            hidden: false,
            points: 10,
        }
    }

    fn make_result(output: &str, exit_code: Option<i32>, timed_out: bool) -> ExecutionResult {
        ExecutionResult {
            output: output.to_string(),
            exit_code,
            timed_out,
            duration: Duration::from_millis(42),
        }
    }

    #[test]
    fn aggregate_counts_and_percentage() {
        let reports = vec![
            code_case_report(&make_case("42"), 1, &make_result("42\n", Some(0), false)),
            code_case_report(&make_case("42"), 2, &make_result("41\n", Some(0), false)),
            code_case_report(&make_case("42"), 3, &make_result("42", Some(0), false)),
        ];
        let verdict = aggregate(reports);
        assert_eq!(verdict.total_tests, 3);
        assert_eq!(verdict.passed_tests, 2);
        assert_eq!(verdict.failed_tests, 1);
        assert!(!verdict.all_passed);
        assert_eq!(verdict.pass_percentage, 66.67);
    }

    #[test]
    fn aggregate_of_nothing_never_passes() {
        let verdict = aggregate(Vec::new());
        assert_eq!(verdict.total_tests, 0);
        assert!(!verdict.all_passed);
        assert_eq!(verdict.pass_percentage, 0.0);
    }

    #[test]
    fn exact_output_passes_and_is_whitespace_tolerant() {
        let report = code_case_report(&make_case("42"), 1, &make_result("  42  \n", Some(0), false));
        assert!(report.passed);
        assert_eq!(report.execution_time, 0.042);
    }

    #[test]
    fn timeout_is_a_failed_case_not_a_crash() {
        let report = code_case_report(&make_case("42"), 1, &make_result("", None, true));
        assert!(!report.passed);
        assert!(report.timed_out);
        assert_eq!(report.error.as_deref(), Some("execution timed out"));
    }

    #[test]
    fn nonzero_exit_fails_with_error_field() {
        let report = code_case_report(&make_case("42"), 1, &make_result("boom", Some(1), false));
        assert!(!report.passed);
        assert_eq!(report.error.as_deref(), Some("process exited with code 1"));
    }

    #[test]
    fn explicit_rules_override_expected_output() {
        let mut case = make_case("ignored");
        case.rules = Some(campus_common::types::OutputRules {
            must_include: vec!["Running".to_string()],
            must_not_include: vec!["Error".to_string()],
        });
        let passing = code_case_report(&case, 1, &make_result("pod Running", Some(0), false));
        assert!(passing.passed);
        let failing = code_case_report(&case, 1, &make_result("pod Error", Some(0), false));
        assert!(!failing.passed);
    }

    #[tokio::test]
    async fn code_cases_run_to_completion_in_order() {
        let executor = ProcessExecutor::default();
        let arena = tempfile::tempdir().unwrap();
        std::fs::write(arena.path().join("main.sh"), "read x\necho $((x * 2))\n").unwrap();
        let cases = vec![
            TestCase {
                input: "2".to_string(),
                expected_output: "4".to_string(),
                ..make_case("4")
            },
            TestCase {
                input: "3".to_string(),
                expected_output: "7".to_string(),
                ..make_case("7")
            },
            TestCase {
                input: "5".to_string(),
                expected_output: "10".to_string(),
                ..make_case("10")
            },
        ];
        let reports = validate_code_cases(
            &executor,
            None,
            "sh main.sh",
            arena.path(),
            &cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(reports.len(), 3);
        assert!(reports[0].passed);
        assert!(!reports[1].passed, "6 != 7 must fail");
        assert!(reports[2].passed, "batch continues after a failure");
        assert_eq!(
            reports.iter().map(|r| r.test_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn sql_cases_report_structural_mismatches() {
        use campus_common::types::SqlExpected;
        use serde_json::json;

        let sandbox = SqlSandbox::create().await.unwrap();
        sandbox
            .batch("CREATE TABLE users (id INTEGER, name TEXT);")
            .await
            .unwrap();
        let cases = vec![SqlCase {
            description: "two seeded users".to_string(),
            setup: Some("INSERT INTO users VALUES (1, 'a'), (2, 'b');".to_string()),
            expected: SqlExpected {
                columns: vec!["id".to_string(), "name".to_string()],
                rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
            },
            hidden: false,
            points: 10,
        }];
        // Reversed ordering in the learner query must still pass.
        let reports = validate_sql_cases(
            &sandbox,
            "SELECT id, name FROM users ORDER BY id DESC",
            &cases,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].passed, "{:?}", reports[0]);
    }

    #[tokio::test]
    async fn sql_driver_errors_become_failed_cases() {
        use campus_common::types::SqlExpected;

        let sandbox = SqlSandbox::create().await.unwrap();
        let cases = vec![SqlCase {
            description: "broken".to_string(),
            setup: None,
            expected: SqlExpected {
                columns: vec!["id".to_string()],
                rows: vec![],
            },
            hidden: false,
            points: 10,
        }];
        let reports =
            validate_sql_cases(&sandbox, "SELECT * FROM missing", &cases, Duration::from_secs(5))
                .await;
        assert!(!reports[0].passed);
        assert!(reports[0].error.is_some());
    }
}
