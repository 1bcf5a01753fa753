use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy of the grading engine.
///
/// Failures local to a single test case are folded into that case's report
/// and never surface here; these variants cover the fail-closed paths that
/// abort before any execution is attempted, plus infrastructure faults.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported exercise type: {0}")]
    UnsupportedExerciseType(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("forbidden imports detected: {}", .found.join(", "))]
    ForbiddenImport { found: Vec<String> },

    #[error("forbidden command: {0}")]
    ForbiddenCommand(String),

    #[error("forbidden path: {0}")]
    ForbiddenPath(String),

    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("runner error: {0}")]
    Runner(String),

    #[error("comparison error: {0}")]
    Comparison(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
