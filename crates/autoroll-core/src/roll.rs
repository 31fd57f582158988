//! One complete roll attempt: load the manifest, search, select, report.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{info, Instrument};
use uuid::Uuid;

use crate::domain::{RollError, RollResult};
use crate::obs;
use crate::oracle::Oracle;
use crate::reporting::RollReport;
use crate::search::get_roll_candidates;
use crate::selector::RollSelector;
use crate::store::ManifestStore;
use crate::vcs::CommitSource;

/// Run a roll attempt against the manifest in `store`.
///
/// A manifest whose roll options carry a disable reason is reported as
/// unsuccessful without searching or running the oracle.
pub async fn run_attempt(
    store: &dyn ManifestStore,
    source: &dyn CommitSource,
    oracle: &dyn Oracle,
    interested: &BTreeSet<String>,
) -> RollResult<RollReport> {
    let attempt_id = Uuid::new_v4();
    let attempt = attempt_id.to_string();
    let started = Instant::now();

    let original = store.load()?;
    if let Some(reason) = original.autoroll_options.disabled() {
        info!(project = %original.project_id, reason = %reason, "rolling disabled");
        return Ok(RollReport::disabled(attempt_id, &original, reason));
    }

    let report = async {
        obs::emit_roll_started(&attempt, &original.project_id, original.deps.len());
        let outcome = get_roll_candidates(&original, source)?;
        let selection = RollSelector::new(store, oracle).select(&outcome.good).await?;
        Ok::<_, RollError>(RollReport::build(
            attempt_id,
            &original,
            &outcome,
            &selection,
            interested,
        ))
    }
    .instrument(obs::attempt_span(&attempt))
    .await?;

    obs::emit_roll_finished(
        &attempt,
        started.elapsed().as_millis() as u64,
        report.success,
        report.trivial,
    );
    Ok(report)
}
