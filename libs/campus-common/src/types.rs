use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_timeout_seconds() -> u64 {
    60
}

fn default_memory_limit_mb() -> u64 {
    128
}

fn default_points() -> u32 {
    10
}

/// The six exercise kinds the engine knows how to grade.
///
/// This is a closed set: the dispatcher matches exhaustively over it and
/// there is no fallback grader. Unknown tags are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    Mcq,
    ShortAnswer,
    Terminal,
    Sandbox,
    Code,
    Sql,
}

impl ExerciseType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "mcq" => Some(Self::Mcq),
            "short_answer" => Some(Self::ShortAnswer),
            "terminal" => Some(Self::Terminal),
            "sandbox" => Some(Self::Sandbox),
            "code" => Some(Self::Code),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcq => "mcq",
            Self::ShortAnswer => "short_answer",
            Self::Terminal => "terminal",
            Self::Sandbox => "sandbox",
            Self::Code => "code",
            Self::Sql => "sql",
        }
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substring rules applied to captured output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputRules {
    #[serde(default)]
    pub must_include: Vec<String>,
    #[serde(default)]
    pub must_not_include: Vec<String>,
}

/// Structural rules applied to the submitted command line itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRules {
    /// Acceptable command prefixes, e.g. `["kubectl get pods"]`.
    #[serde(default)]
    pub base_command: Vec<String>,
    /// Flags that must appear; `"-o wide"` matches both `-o wide` and `-o=wide`.
    #[serde(default)]
    pub required_flags: Vec<String>,
    #[serde(default)]
    pub requires_argument: bool,
    #[serde(default)]
    pub required_resource: Option<String>,
    #[serde(default)]
    pub required_name: Option<String>,
    /// When set, the command must also have exited successfully.
    #[serde(default)]
    pub require_success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub command: Option<CommandRules>,
    #[serde(default)]
    pub output: Option<OutputRules>,
}

/// One authored test case for a code exercise. Ordered; addressed 1-based
/// in reports. Never mutated after authoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
    /// Overrides the default comparison when present.
    #[serde(default)]
    pub rules: Option<OutputRules>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_points")]
    pub points: u32,
}

/// Expected shape of an SQL result: exact column list, order-independent
/// row set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlExpected {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlCase {
    #[serde(default)]
    pub description: String,
    /// Statements run before the learner query, e.g. per-case fixtures.
    #[serde(default)]
    pub setup: Option<String>,
    pub expected: SqlExpected,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_points")]
    pub points: u32,
}

/// The per-type exercise data bundle. Internally tagged so authored JSON
/// carries a `type` field; an unknown tag fails deserialization instead of
/// falling through to a default grader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExerciseSpec {
    Mcq {
        question: String,
        options: Vec<String>,
        correct_index: usize,
    },
    ShortAnswer {
        question: String,
        /// `|`-delimited acceptable variants.
        accepted_answers: String,
    },
    Terminal {
        #[serde(default)]
        command: Option<String>,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u64,
        #[serde(default)]
        validation: ValidationRules,
        #[serde(default)]
        hints: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Sandbox {
        #[serde(default)]
        run: Option<String>,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u64,
        #[serde(default)]
        validation: ValidationRules,
        #[serde(default)]
        hints: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Code {
        language: String,
        /// Relative paths the exercise expects the learner to provide.
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        starter_code: Option<String>,
        #[serde(default)]
        test_cases: Vec<TestCase>,
        #[serde(default)]
        allowed_imports: Vec<String>,
        #[serde(default = "default_timeout_seconds")]
        time_limit_seconds: u64,
        #[serde(default = "default_memory_limit_mb")]
        memory_limit_mb: u64,
    },
    Sql {
        #[serde(default)]
        schema_setup: Option<String>,
        #[serde(default)]
        sample_data: Option<String>,
        #[serde(default)]
        cases: Vec<SqlCase>,
        #[serde(default = "default_timeout_seconds")]
        time_limit_seconds: u64,
    },
}

impl ExerciseSpec {
    pub fn exercise_type(&self) -> ExerciseType {
        match self {
            Self::Mcq { .. } => ExerciseType::Mcq,
            Self::ShortAnswer { .. } => ExerciseType::ShortAnswer,
            Self::Terminal { .. } => ExerciseType::Terminal,
            Self::Sandbox { .. } => ExerciseType::Sandbox,
            Self::Code { .. } => ExerciseType::Code,
            Self::Sql { .. } => ExerciseType::Sql,
        }
    }
}

/// An authored exercise. Immutable once authored; owned by content
/// management, which lives outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    pub id: Uuid,
    #[serde(default)]
    pub slug: String,
    pub spec: ExerciseSpec,
}

/// The learner-supplied payload. Transient; lives for one grading call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    Choice {
        answer_index: usize,
    },
    Text {
        answer: String,
    },
    Command {
        command: String,
    },
    Code {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        files: BTreeMap<String, String>,
    },
    Query {
        query: String,
    },
}

/// Raw outcome of one process execution. Produced once per
/// (submission, test case) pair; never persisted by the engine.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Merged stdout + stderr.
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Wall-clock seconds, rounded to milliseconds.
    pub fn execution_time(&self) -> f64 {
        (self.duration.as_secs_f64() * 1000.0).round() / 1000.0
    }
}

/// Per-test-case entry of a verdict. Redaction of hidden cases happens in
/// the sanitizer before this ever leaves the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub test_number: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    pub passed: bool,
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_points")]
    pub points: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate pass/fail report across all test cases for one submission.
/// The engine's sole externally visible output besides raw run echoes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub pass_percentage: f64,
    pub all_passed: bool,
    pub results: Vec<CaseReport>,
}

impl Verdict {
    /// Points earned across passing cases; used by the submit verb when
    /// notifying the completion sink.
    pub fn points_earned(&self) -> u32 {
        self.results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.points)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exercise_type_round_trip() {
        for tag in ["mcq", "short_answer", "terminal", "sandbox", "code", "sql"] {
            let parsed = ExerciseType::parse(tag).expect("known tag");
            assert_eq!(parsed.as_str(), tag);
        }
        assert!(ExerciseType::parse("essay").is_none());
    }

    #[test]
    fn unknown_spec_tag_is_rejected() {
        let raw = r#"{"type":"essay","question":"?"}"#;
        let parsed: Result<ExerciseSpec, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn code_spec_defaults() {
        let raw = r#"{"type":"code","language":"python"}"#;
        let spec: ExerciseSpec = serde_json::from_str(raw).unwrap();
        match spec {
            ExerciseSpec::Code {
                time_limit_seconds,
                memory_limit_mb,
                test_cases,
                allowed_imports,
                ..
            } => {
                assert_eq!(time_limit_seconds, 60);
                assert_eq!(memory_limit_mb, 128);
                assert!(test_cases.is_empty());
                assert!(allowed_imports.is_empty());
            }
            other => panic!("unexpected spec: {other:?}"),
        }
    }

    #[test]
    fn test_case_defaults() {
        let raw = r#"{"input":"1","expected_output":"2"}"#;
        let case: TestCase = serde_json::from_str(raw).unwrap();
        assert!(!case.hidden);
        assert_eq!(case.points, 10);
        assert!(case.rules.is_none());
    }

    #[test]
    fn submission_tags() {
        let raw = r#"{"kind":"choice","answer_index":1}"#;
        let submission: Submission = serde_json::from_str(raw).unwrap();
        assert!(matches!(submission, Submission::Choice { answer_index: 1 }));

        let raw = r#"{"kind":"code","code":"print(1)"}"#;
        let submission: Submission = serde_json::from_str(raw).unwrap();
        match submission {
            Submission::Code { code, files } => {
                assert_eq!(code.as_deref(), Some("print(1)"));
                assert!(files.is_empty());
            }
            other => panic!("unexpected submission: {other:?}"),
        }
    }

    #[test]
    fn points_earned_counts_only_passing_cases() {
        let passing = CaseReport {
            test_number: 1,
            description: String::new(),
            input: None,
            expected_output: None,
            actual_output: None,
            passed: true,
            execution_time: 0.0,
            error: None,
            timed_out: false,
            hidden: false,
            points: 15,
            message: None,
        };
        let failing = CaseReport {
            test_number: 2,
            passed: false,
            points: 25,
            ..passing.clone()
        };
        let verdict = Verdict {
            total_tests: 2,
            passed_tests: 1,
            failed_tests: 1,
            pass_percentage: 50.0,
            all_passed: false,
            results: vec![passing, failing],
        };
        assert_eq!(verdict.points_earned(), 15);
    }
}
