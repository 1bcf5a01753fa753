//! Delegation point for completion side effects.
//!
//! Progress and points recording belong to the learner-records service,
//! not this engine; the submit verb only notifies whatever sink is
//! plugged in here.

use campus_common::types::Verdict;
use tracing::info;
use uuid::Uuid;

pub trait CompletionSink: Send + Sync {
    fn record_completion(&self, exercise_id: Uuid, slug: &str, verdict: &Verdict);
}

/// Default sink: log the completion and move on.
pub struct LogCompletionSink;

impl CompletionSink for LogCompletionSink {
    fn record_completion(&self, exercise_id: Uuid, slug: &str, verdict: &Verdict) {
        info!(
            exercise_id = %exercise_id,
            slug = %slug,
            points_earned = verdict.points_earned(),
            pass_percentage = verdict.pass_percentage,
            "exercise completed"
        );
    }
}
