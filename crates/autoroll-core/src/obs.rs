//! Structured observability hooks for the roll lifecycle.
//!
//! This module provides:
//! - Attempt-scoped tracing spans via the `RollSpan` RAII guard
//! - Emission functions for key lifecycle events: start, search steps,
//!   oracle invocations, selection, restoration, finish
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it. Verbosity is controlled via `AUTOROLL_LOG`.

use tracing::{info, warn};

/// RAII guard that enters an attempt-scoped span for the duration of a roll.
///
/// ```ignore
/// let _span = RollSpan::enter("5f0c...");
/// // every tracing call below carries attempt_id = "5f0c..."
/// ```
pub struct RollSpan {
    _span: tracing::span::EnteredSpan,
}

impl RollSpan {
    pub fn enter(attempt_id: &str) -> Self {
        Self {
            _span: attempt_span(attempt_id).entered(),
        }
    }
}

/// The attempt-scoped span, for instrumenting futures that cross `.await`.
pub fn attempt_span(attempt_id: &str) -> tracing::Span {
    tracing::info_span!("autoroll.attempt", attempt_id = %attempt_id)
}

/// Emit event: roll attempt started for a project.
pub fn emit_roll_started(attempt_id: &str, project_id: &str, tracked: usize) {
    info!(
        event = "roll.started",
        attempt_id = %attempt_id,
        project_id = %project_id,
        tracked = tracked,
    );
}

/// Emit event: one search step produced a candidate.
pub fn emit_search_step(step: usize, repo_id: &str, revision: &str, consistent: bool) {
    info!(
        event = "search.step",
        step = step,
        repo = %repo_id,
        revision = %revision,
        consistent = consistent,
    );
}

/// Emit event: search finished.
pub fn emit_search_finished(steps: usize, good: usize, bad: usize, stop: &dyn std::fmt::Display) {
    info!(
        event = "search.finished",
        steps = steps,
        good = good,
        bad = bad,
        stop = %stop,
    );
}

/// Emit event: oracle ran against a materialized manifest.
pub fn emit_oracle_invoked(mode: &str, candidate: Option<usize>, exit_code: i32) {
    info!(
        event = "oracle.invoked",
        mode = %mode,
        candidate = ?candidate,
        exit_code = exit_code,
    );
}

/// Emit event: a candidate was picked.
pub fn emit_selector_picked(candidate: usize, trivial: bool) {
    info!(event = "selector.picked", candidate = candidate, trivial = trivial);
}

/// Emit event: the original manifest was restored (warning level).
pub fn emit_selector_restored(digest: &str, train_exit_code: i32) {
    warn!(
        event = "selector.restored",
        digest = %digest,
        train_exit_code = train_exit_code,
    );
}

/// Emit event: roll attempt finished.
pub fn emit_roll_finished(attempt_id: &str, duration_ms: u64, success: bool, trivial: Option<bool>) {
    info!(
        event = "roll.finished",
        attempt_id = %attempt_id,
        duration_ms = duration_ms,
        success = success,
        trivial = ?trivial,
    );
}
