//! Exercise type dispatch and grading orchestration.
//!
//! `GradingEngine` is the glue layer: guards and staging prepare a run,
//! the executor produces raw results, the validator compares, and the
//! sanitizer redacts before anything is returned. The dispatch is an
//! exhaustive match over the closed exercise spec; there is no default
//! grader to fall through to.

use std::collections::BTreeMap;
use std::time::Duration;

use campus_common::types::{
    CaseReport, Exercise, ExerciseSpec, ExecutionResult, Submission, ValidationRules, Verdict,
};
use tracing::{info, warn};

use crate::config::{EngineConfig, LanguageRegistry};
use crate::error::EngineError;
use crate::executor::{CommandSpec, ProcessExecutor};
use crate::guard::{self, ImportGuard};
use crate::sanitize;
use crate::scope::EphemeralScope;
use crate::sqllab::SqlSandbox;
use crate::validator;
use crate::workspace::StagingArea;
use crate::{compare, sqllab};

/// Raw echo of an ungraded "try it" run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
    pub timed_out: bool,
}

pub struct GradingEngine {
    executor: ProcessExecutor,
    languages: LanguageRegistry,
    config: EngineConfig,
}

impl GradingEngine {
    pub fn new(config: EngineConfig, languages: LanguageRegistry) -> Self {
        Self {
            executor: ProcessExecutor::new(config.default_timeout),
            languages,
            config,
        }
    }

    pub fn languages(&self) -> &LanguageRegistry {
        &self.languages
    }

    /// Grade a submission against an exercise and return the sanitized
    /// verdict. This is the `validate` verb; `submit` is the same call
    /// with completion side effects layered on by the caller.
    pub async fn grade(
        &self,
        exercise: &Exercise,
        submission: &Submission,
    ) -> Result<Verdict, EngineError> {
        let reports = match (&exercise.spec, submission) {
            (
                ExerciseSpec::Mcq { correct_index, .. },
                Submission::Choice { answer_index },
            ) => vec![mcq_report(*correct_index, *answer_index)],

            (
                ExerciseSpec::ShortAnswer {
                    accepted_answers, ..
                },
                Submission::Text { answer },
            ) => vec![short_answer_report(accepted_answers, answer)],

            (
                ExerciseSpec::Terminal {
                    timeout_seconds,
                    validation,
                    env,
                    cwd,
                    ..
                },
                Submission::Command { command },
            ) => {
                self.grade_command(
                    command,
                    *timeout_seconds,
                    validation,
                    env,
                    cwd.as_deref(),
                    false,
                )
                .await?
            }

            (
                ExerciseSpec::Sandbox {
                    timeout_seconds,
                    validation,
                    env,
                    ..
                },
                Submission::Command { command },
            ) => {
                self.grade_command(command, *timeout_seconds, validation, env, None, true)
                    .await?
            }

            (
                ExerciseSpec::Code {
                    language,
                    files: declared_files,
                    starter_code,
                    test_cases,
                    allowed_imports,
                    time_limit_seconds,
                    ..
                },
                Submission::Code { code, files },
            ) => {
                if test_cases.is_empty() {
                    return Err(EngineError::InvalidSubmission(
                        "exercise defines no test cases".to_string(),
                    ));
                }
                let (arena, run_command) = self.stage_code_submission(
                    language,
                    declared_files,
                    starter_code.as_deref(),
                    allowed_imports,
                    code.as_deref(),
                    files,
                )?;
                validator::validate_code_cases(
                    &self.executor,
                    self.config.runner.as_ref(),
                    &run_command,
                    arena.path(),
                    test_cases,
                    Duration::from_secs(*time_limit_seconds),
                )
                .await
            }

            (
                ExerciseSpec::Sql {
                    schema_setup,
                    sample_data,
                    cases,
                    time_limit_seconds,
                },
                Submission::Query { query },
            ) => {
                if cases.is_empty() {
                    return Err(EngineError::InvalidSubmission(
                        "exercise defines no test cases".to_string(),
                    ));
                }
                let sandbox = self
                    .sql_sandbox(schema_setup.as_deref(), sample_data.as_deref())
                    .await?;
                validator::validate_sql_cases(
                    &sandbox,
                    query,
                    cases,
                    Duration::from_secs(*time_limit_seconds),
                )
                .await
            }

            _ => {
                return Err(EngineError::InvalidSubmission(format!(
                    "submission does not match a {} exercise",
                    exercise.spec.exercise_type()
                )))
            }
        };

        let verdict = sanitize::sanitize_verdict(validator::aggregate(reports));
        info!(
            exercise_id = %exercise.id,
            exercise_type = %exercise.spec.exercise_type(),
            total = verdict.total_tests,
            passed = verdict.passed_tests,
            all_passed = verdict.all_passed,
            "graded submission"
        );
        Ok(verdict)
    }

    /// Ungraded single run for exploratory "try it" flows. Guards still
    /// apply: untrusted code is never executed with forbidden imports.
    pub async fn run(
        &self,
        exercise: &Exercise,
        submission: &Submission,
        input: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        match (&exercise.spec, submission) {
            (
                ExerciseSpec::Code {
                    language,
                    files: declared_files,
                    starter_code,
                    allowed_imports,
                    time_limit_seconds,
                    ..
                },
                Submission::Code { code, files },
            ) => {
                let (arena, run_command) = self.stage_code_submission(
                    language,
                    declared_files,
                    starter_code.as_deref(),
                    allowed_imports,
                    code.as_deref(),
                    files,
                )?;
                let mut spec = CommandSpec::shell(&run_command)
                    .with_cwd(arena.path())
                    .with_timeout(Duration::from_secs(*time_limit_seconds));
                if let Some(stdin) = input {
                    spec = spec.with_stdin(stdin);
                }
                let result = self.executor.run(&spec).await?;
                Ok(run_outcome(&result))
            }

            (
                ExerciseSpec::Terminal {
                    timeout_seconds,
                    env,
                    cwd,
                    ..
                },
                Submission::Command { command },
            ) => {
                guard::check_command(command)?;
                let mut spec = CommandSpec::shell(command)
                    .with_env(env)
                    .with_timeout(Duration::from_secs(*timeout_seconds));
                if let Some(dir) = cwd {
                    spec = spec.with_cwd(dir);
                }
                let result = self.executor.run(&spec).await?;
                Ok(run_outcome(&result))
            }

            (
                ExerciseSpec::Sandbox {
                    timeout_seconds,
                    env,
                    ..
                },
                Submission::Command { command },
            ) => {
                guard::check_command(command)?;
                let (result, _scope) = self
                    .run_scoped(command, env, Duration::from_secs(*timeout_seconds))
                    .await?;
                Ok(run_outcome(&result))
            }

            (
                ExerciseSpec::Sql {
                    schema_setup,
                    sample_data,
                    time_limit_seconds,
                    ..
                },
                Submission::Query { query },
            ) => {
                let sandbox = self
                    .sql_sandbox(schema_setup.as_deref(), sample_data.as_deref())
                    .await?;
                let started = std::time::Instant::now();
                match sandbox
                    .query(query, Duration::from_secs(*time_limit_seconds))
                    .await
                {
                    Ok(result) => Ok(RunOutcome {
                        success: true,
                        output: sqllab::render_table(&result),
                        error: None,
                        execution_time: (started.elapsed().as_secs_f64() * 1000.0).round()
                            / 1000.0,
                        timed_out: false,
                    }),
                    Err(EngineError::ExecutionTimeout(limit)) => Ok(RunOutcome {
                        success: false,
                        output: String::new(),
                        error: Some(format!("query timed out after {}s", limit.as_secs())),
                        execution_time: (started.elapsed().as_secs_f64() * 1000.0).round()
                            / 1000.0,
                        timed_out: true,
                    }),
                    Err(EngineError::Comparison(message)) => Ok(RunOutcome {
                        success: false,
                        output: String::new(),
                        error: Some(message),
                        execution_time: 0.0,
                        timed_out: false,
                    }),
                    Err(other) => Err(other),
                }
            }

            (spec, _) => Err(EngineError::InvalidSubmission(format!(
                "nothing to execute for a {} exercise",
                spec.exercise_type()
            ))),
        }
    }

    /// Guard, stage, and resolve the run command for a code submission.
    /// Import checks run before anything touches the filesystem.
    fn stage_code_submission(
        &self,
        language: &str,
        declared_files: &[String],
        starter_code: Option<&str>,
        allowed_imports: &[String],
        code: Option<&str>,
        files: &BTreeMap<String, String>,
    ) -> Result<(StagingArea, String), EngineError> {
        let lang = self.languages.get(language)?;

        let import_guard = ImportGuard::new(allowed_imports);
        if let Some(source) = code {
            import_guard.check(&lang.name, source)?;
        }
        for content in files.values() {
            import_guard.check(&lang.name, content)?;
        }

        let arena = StagingArea::create()?;
        let entry = declared_files
            .first()
            .map(String::as_str)
            .unwrap_or(&lang.file_name)
            .to_string();

        if !files.is_empty() {
            let staged = arena.stage_files(files)?;
            if !staged.rejected.is_empty() {
                warn!(
                    rejected = staged.rejected.len(),
                    "some submitted paths were rejected during staging"
                );
            }
        } else if let Some(source) = code {
            arena.write_file(&entry, source)?;
        } else if declared_files.len() == 1 {
            if let Some(starter) = starter_code {
                arena.seed_starter(&entry, starter)?;
            }
        }

        if !arena.path().join(&entry).exists() {
            return Err(EngineError::InvalidSubmission("code is required".to_string()));
        }

        let run_command = lang.run_command(&entry);
        Ok((arena, run_command))
    }

    async fn sql_sandbox(
        &self,
        schema_setup: Option<&str>,
        sample_data: Option<&str>,
    ) -> Result<SqlSandbox, EngineError> {
        let sandbox = SqlSandbox::create().await?;
        if let Some(schema) = schema_setup {
            sandbox.batch(schema).await?;
        }
        if let Some(data) = sample_data {
            sandbox.batch(data).await?;
        }
        Ok(sandbox)
    }

    async fn grade_command(
        &self,
        command: &str,
        timeout_seconds: u64,
        validation: &ValidationRules,
        env: &BTreeMap<String, String>,
        cwd: Option<&str>,
        scoped: bool,
    ) -> Result<Vec<CaseReport>, EngineError> {
        guard::check_command(command)?;

        // Structural rules are cheap and run before anything executes.
        if let Some(rules) = &validation.command {
            if let Err(reason) = compare::check_command_structure(rules, command) {
                return Ok(vec![command_case(false, 0.0, false, None, Some(reason))]);
            }
        }

        let limit = Duration::from_secs(timeout_seconds);
        let result = if scoped && EphemeralScope::applies_to(command) {
            match self.run_scoped(command, env, limit).await {
                Ok((result, scope)) => {
                    drop(scope);
                    result
                }
                Err(err) => {
                    warn!("scoped command execution failed: {err}");
                    return Ok(vec![command_case(
                        false,
                        0.0,
                        false,
                        Some(err.to_string()),
                        None,
                    )]);
                }
            }
        } else {
            let mut spec = CommandSpec::shell(command).with_env(env).with_timeout(limit);
            if let Some(dir) = cwd {
                spec = spec.with_cwd(dir);
            }
            match self.executor.run(&spec).await {
                Ok(result) => result,
                Err(err) => {
                    warn!("command execution failed: {err}");
                    return Ok(vec![command_case(
                        false,
                        0.0,
                        false,
                        Some(err.to_string()),
                        None,
                    )]);
                }
            }
        };

        Ok(vec![command_report(validation, &result)])
    }

    /// Execute a cluster-bound command under a fresh ephemeral scope. The
    /// scope is returned so its drop (and teardown) stays at the caller's
    /// end of the run.
    async fn run_scoped(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
        limit: Duration,
    ) -> Result<(ExecutionResult, Option<EphemeralScope>), EngineError> {
        if !EphemeralScope::applies_to(command) {
            let spec = CommandSpec::shell(command).with_env(env).with_timeout(limit);
            return Ok((self.executor.run(&spec).await?, None));
        }
        let mut scope = EphemeralScope::allocate(&self.config.kubectl);
        scope.provision().await;
        let spec = CommandSpec::shell(scope.scoped_command(command))
            .with_env(env)
            .with_timeout(limit);
        let result = self.executor.run(&spec).await?;
        Ok((result, Some(scope)))
    }
}

fn run_outcome(result: &ExecutionResult) -> RunOutcome {
    RunOutcome {
        success: result.success(),
        output: result.output.clone(),
        error: if result.timed_out {
            Some("execution timed out".to_string())
        } else {
            None
        },
        execution_time: result.execution_time(),
        timed_out: result.timed_out,
    }
}

fn mcq_report(correct_index: usize, answer_index: usize) -> CaseReport {
    let passed = answer_index == correct_index;
    CaseReport {
        test_number: 1,
        description: "answer selection".to_string(),
        input: None,
        expected_output: None,
        actual_output: None,
        passed,
        execution_time: 0.0,
        error: None,
        timed_out: false,
        hidden: false,
        points: 10,
        message: Some(if passed {
            "Correct!".to_string()
        } else {
            "That is not the right option.".to_string()
        }),
    }
}

fn short_answer_report(accepted_answers: &str, answer: &str) -> CaseReport {
    let normalized = answer.trim().to_lowercase();
    let passed = accepted_answers
        .split('|')
        .map(|variant| variant.trim().to_lowercase())
        .any(|variant| variant == normalized);
    CaseReport {
        test_number: 1,
        description: "answer check".to_string(),
        input: None,
        expected_output: None,
        actual_output: Some(answer.trim().to_string()),
        passed,
        execution_time: 0.0,
        error: None,
        timed_out: false,
        hidden: false,
        points: 10,
        message: Some(if passed {
            "Correct!".to_string()
        } else {
            "That is not an accepted answer.".to_string()
        }),
    }
}

fn command_case(
    passed: bool,
    execution_time: f64,
    timed_out: bool,
    error: Option<String>,
    message: Option<String>,
) -> CaseReport {
    CaseReport {
        test_number: 1,
        description: "command check".to_string(),
        input: None,
        expected_output: None,
        actual_output: None,
        passed,
        execution_time,
        error,
        timed_out,
        hidden: false,
        points: 10,
        message,
    }
}

fn command_report(validation: &ValidationRules, result: &ExecutionResult) -> CaseReport {
    let mut report = command_case(false, result.execution_time(), result.timed_out, None, None);
    report.actual_output = Some(compare::normalize_output(&result.output));

    if result.timed_out {
        report.error = Some("execution timed out".to_string());
        return report;
    }

    let require_success = validation
        .command
        .as_ref()
        .is_some_and(|rules| rules.require_success);
    if require_success && !result.success() {
        report.message = Some(command_failure_hint(&result.output));
        return report;
    }

    match &validation.output {
        Some(rules) => match compare::check_output_rules(rules, &result.output) {
            Ok(()) => report.passed = true,
            Err(reason) => report.message = Some(reason),
        },
        None => {
            if result.success() {
                report.passed = true;
            } else {
                report.error = Some(match result.exit_code {
                    Some(code) => format!("command exited with code {code}"),
                    None => "command terminated by signal".to_string(),
                });
            }
        }
    }
    report
}

/// Turn raw control-plane noise into a hint a learner can act on.
fn command_failure_hint(output: &str) -> String {
    let lower = output.to_lowercase();
    if lower.contains("connection refused")
        || lower.contains("unable to connect")
        || lower.contains("no such host")
    {
        "no cluster detected; start one or connect to it before practicing".to_string()
    } else if lower.contains("not found") {
        "resource not found; check that it exists first".to_string()
    } else if lower.contains("unknown flag") || lower.contains("invalid") {
        "invalid flag; check the command syntax".to_string()
    } else if lower.contains("forbidden") || lower.contains("unauthorized") {
        "permission denied for this operation".to_string()
    } else {
        format!(
            "command failed: {}",
            output.lines().next().unwrap_or("").trim()
        )
    }
}
