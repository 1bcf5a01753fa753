// HTTP route handlers for the grading API

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use campus_common::types::{Exercise, ExerciseSpec, ExerciseType, Submission, Verdict};
use campus_engine::{EngineError, RunOutcome};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub exercise: serde_json::Value,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
    pub timeout: bool,
}

#[derive(Debug, Deserialize)]
pub struct GradeRequest {
    pub exercise: serde_json::Value,
    pub submission: Submission,
}

/// Check the declared type tag against the closed set before handing the
/// payload to serde, so an unknown tag surfaces as the typed
/// `UnsupportedExerciseType` instead of a generic parse failure.
fn parse_exercise(value: serde_json::Value) -> Result<Exercise, EngineError> {
    if let Some(tag) = value.pointer("/spec/type").and_then(|t| t.as_str()) {
        if ExerciseType::parse(tag).is_none() {
            return Err(EngineError::UnsupportedExerciseType(tag.to_string()));
        }
    }
    serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidSubmission(format!("malformed exercise: {e}")))
}

#[derive(Debug, Serialize)]
pub struct GradeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub validation: Verdict,
}

/// GET /health - liveness probe
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /api/v1/exercises/execute - ungraded single run
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> Response {
    let timer = metrics::GRADING_DURATION
        .with_label_values(&["execute"])
        .start_timer();

    let exercise = match parse_exercise(payload.exercise) {
        Ok(exercise) => exercise,
        Err(err) => {
            metrics::observe("execute", "rejected");
            return engine_error_response("execute", err);
        }
    };

    let submission = match build_submission(&exercise, &payload.code, &payload.command, &payload.query) {
        Ok(submission) => submission,
        Err(message) => {
            metrics::observe("execute", "rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": message })),
            )
                .into_response();
        }
    };

    let outcome = state
        .engine
        .run(&exercise, &submission, payload.input.as_deref())
        .await;
    timer.observe_duration();

    match outcome {
        Ok(outcome) => {
            metrics::observe("execute", "ok");
            execute_response(outcome)
        }
        Err(err) => {
            metrics::observe("execute", "error");
            engine_error_response("execute", err)
        }
    }
}

/// POST /api/v1/exercises/validate - full sanitized test suite, no side
/// effects on learner records
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GradeRequest>,
) -> Response {
    let timer = metrics::GRADING_DURATION
        .with_label_values(&["validate"])
        .start_timer();
    let exercise = match parse_exercise(payload.exercise) {
        Ok(exercise) => exercise,
        Err(err) => {
            metrics::observe("validate", "rejected");
            return engine_error_response("validate", err);
        }
    };
    let verdict = state.engine.grade(&exercise, &payload.submission).await;
    timer.observe_duration();

    match verdict {
        Ok(verdict) => {
            metrics::observe("validate", "ok");
            (
                StatusCode::OK,
                Json(GradeResponse {
                    success: true,
                    message: None,
                    validation: verdict,
                }),
            )
                .into_response()
        }
        Err(err) => {
            metrics::observe("validate", "error");
            engine_error_response("validate", err)
        }
    }
}

/// POST /api/v1/exercises/submit - validate plus completion side effects
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GradeRequest>,
) -> Response {
    let started = Instant::now();
    let exercise = match parse_exercise(payload.exercise) {
        Ok(exercise) => exercise,
        Err(err) => {
            metrics::observe("submit", "rejected");
            return engine_error_response("submit", err);
        }
    };
    let verdict = state.engine.grade(&exercise, &payload.submission).await;
    metrics::GRADING_DURATION
        .with_label_values(&["submit"])
        .observe(started.elapsed().as_secs_f64());

    let verdict = match verdict {
        Ok(verdict) => verdict,
        Err(err) => {
            metrics::observe("submit", "error");
            return engine_error_response("submit", err);
        }
    };

    if verdict.all_passed {
        state
            .completions
            .record_completion(exercise.id, &exercise.slug, &verdict);
        metrics::observe("submit", "completed");
        info!(
            exercise_id = %exercise.id,
            points = verdict.points_earned(),
            "submission completed the exercise"
        );
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Congratulations! All tests passed.",
                "validation": verdict,
                "points_earned": verdict.points_earned(),
                "completed": true,
                "completed_at": campus_common::timestamp(),
            })),
        )
            .into_response()
    } else {
        metrics::observe("submit", "failed");
        (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": format!(
                    "{} test(s) failed. Please review and try again.",
                    verdict.failed_tests
                ),
                "validation": verdict,
                "completed": false,
            })),
        )
            .into_response()
    }
}

fn build_submission(
    exercise: &Exercise,
    code: &Option<String>,
    command: &Option<String>,
    query: &Option<String>,
) -> Result<Submission, String> {
    match &exercise.spec {
        ExerciseSpec::Code { .. } => match code {
            Some(code) => Ok(Submission::Code {
                code: Some(code.clone()),
                files: Default::default(),
            }),
            None => Err("Code is required".to_string()),
        },
        ExerciseSpec::Terminal { .. } | ExerciseSpec::Sandbox { .. } => match command {
            Some(command) => Ok(Submission::Command {
                command: command.clone(),
            }),
            None => Err("Command is required".to_string()),
        },
        ExerciseSpec::Sql { .. } => match query {
            Some(query) => Ok(Submission::Query {
                query: query.clone(),
            }),
            None => Err("Query is required".to_string()),
        },
        ExerciseSpec::Mcq { .. } | ExerciseSpec::ShortAnswer { .. } => {
            Err("This exercise type cannot be executed".to_string())
        }
    }
}

fn execute_response(outcome: RunOutcome) -> Response {
    (
        StatusCode::OK,
        Json(ExecuteResponse {
            success: outcome.success,
            output: outcome.output,
            error: outcome.error,
            execution_time: outcome.execution_time,
            timeout: outcome.timed_out,
        }),
    )
        .into_response()
}

/// Every failure mode is a typed result field; callers never see a raw
/// fault.
fn engine_error_response(verb: &str, err: EngineError) -> Response {
    match err {
        EngineError::ForbiddenImport { found } => {
            warn!(verb, "submission rejected: forbidden imports {:?}", found);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "success": false,
                    "error": format!("Forbidden imports detected: {}", found.join(", ")),
                    "forbidden_imports": found,
                })),
            )
                .into_response()
        }
        EngineError::InvalidSubmission(message) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response(),
        err @ (EngineError::UnsupportedExerciseType(_)
        | EngineError::UnsupportedLanguage(_)
        | EngineError::ForbiddenCommand(_)
        | EngineError::ForbiddenPath(_)) => {
            warn!(verb, "submission rejected: {err}");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
                .into_response()
        }
        err => {
            error!(verb, "grading failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "An error occurred while grading the submission",
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn code_exercise() -> Exercise {
        Exercise {
            id: Uuid::new_v4(),
            slug: "demo".to_string(),
            spec: ExerciseSpec::Code {
                language: "python".to_string(),
                files: vec![],
                starter_code: None,
                test_cases: vec![],
                allowed_imports: vec![],
                time_limit_seconds: 60,
                memory_limit_mb: 128,
            },
        }
    }

    #[test]
    fn execute_requires_code_for_code_exercises() {
        let err = build_submission(
            &code_exercise(),
            &None,
            &Some("echo hi".to_string()),
            &None,
        )
        .unwrap_err();
        assert_eq!(err, "Code is required");
    }

    #[test]
    fn execute_rejects_pure_data_exercises() {
        let exercise = Exercise {
            id: Uuid::new_v4(),
            slug: String::new(),
            spec: ExerciseSpec::Mcq {
                question: "?".to_string(),
                options: vec![],
                correct_index: 0,
            },
        };
        assert!(build_submission(&exercise, &None, &None, &None).is_err());
    }

    #[test]
    fn unknown_type_tag_is_unsupported_not_a_parse_error() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "slug": "quiz",
            "spec": { "type": "essay", "question": "?" },
        });
        let err = parse_exercise(raw).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedExerciseType(tag) if tag == "essay"));
    }

    #[test]
    fn known_exercise_parses() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "slug": "quiz",
            "spec": {
                "type": "mcq",
                "question": "?",
                "options": ["a", "b"],
                "correct_index": 0,
            },
        });
        let exercise = parse_exercise(raw).unwrap();
        assert!(matches!(exercise.spec, ExerciseSpec::Mcq { .. }));
    }
}
