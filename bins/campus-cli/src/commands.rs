// CLI commands: load exercise/submission JSON, invoke the engine, print
// the result as JSON for scripting.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use campus_common::types::{Exercise, Submission, Verdict};
use campus_engine::config::{EngineConfig, LanguageRegistry};
use campus_engine::{GradingEngine, RunOutcome};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
struct GradeEnvelope {
    graded_at: String,
    exercise_id: Uuid,
    exercise_type: String,
    verdict: Verdict,
}

#[derive(Serialize)]
struct RunEnvelope {
    ran_at: String,
    exercise_id: Uuid,
    result: RunOutcome,
}

fn load_exercise(path: &Path) -> Result<Exercise> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read exercise file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse exercise file {}", path.display()))
}

fn load_submission(path: &Path) -> Result<Submission> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read submission file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse submission file {}", path.display()))
}

fn build_engine() -> GradingEngine {
    GradingEngine::new(EngineConfig::from_env(), LanguageRegistry::load_default())
}

pub async fn grade(exercise_path: &Path, submission_path: &Path) -> Result<()> {
    let exercise = load_exercise(exercise_path)?;
    let submission = load_submission(submission_path)?;
    let engine = build_engine();

    let verdict = engine
        .grade(&exercise, &submission)
        .await
        .context("grading failed")?;

    let envelope = GradeEnvelope {
        graded_at: campus_common::timestamp(),
        exercise_id: exercise.id,
        exercise_type: exercise.spec.exercise_type().to_string(),
        verdict,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

pub async fn run(
    exercise_path: &Path,
    submission_path: &Path,
    input: Option<&str>,
) -> Result<()> {
    let exercise = load_exercise(exercise_path)?;
    let submission = load_submission(submission_path)?;
    let engine = build_engine();

    let outcome = engine
        .run(&exercise, &submission, input)
        .await
        .context("execution failed")?;

    let envelope = RunEnvelope {
        ran_at: campus_common::timestamp(),
        exercise_id: exercise.id,
        result: outcome,
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

pub fn list_languages() {
    let registry = LanguageRegistry::load_default();
    let names = registry.list();
    if names.is_empty() {
        println!("No languages configured.");
        return;
    }

    println!("{:<14} {:<10} {:<12} Command", "Name", "Version", "File");
    println!("{}", "-".repeat(60));
    for name in names {
        if let Ok(spec) = registry.get(&name) {
            println!(
                "{:<14} {:<10} {:<12} {}",
                spec.name, spec.version, spec.file_name, spec.command
            );
        }
    }
}
