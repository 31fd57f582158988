//! Two-phase picker over the good candidates of a search.
//!
//! Phase 1 looks for the most changed candidate that passes the oracle in
//! check mode (a trivial roll), scanning largest to smallest. Phase 2, only
//! if phase 1 found nothing, looks for the least changed candidate that the
//! oracle can train against (a non-trivial roll), scanning smallest to
//! largest. A winner stays materialized on disk. If neither phase finds one,
//! the original manifest bytes are restored and verified by digest, and the
//! oracle is re-run in train mode against them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::candidate::RollCandidate;
use crate::domain::{Manifest, RollError, RollResult};
use crate::obs;
use crate::oracle::{Oracle, OracleMode, OracleOutcome};
use crate::store::{manifest_digest, ManifestStore};

/// Where the selector is (or ended up) in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    NoCandidates,
    SearchingTrivial,
    FoundTrivial,
    SearchingNontrivial,
    FoundNontrivial,
    Failed,
    Restoring,
    Restored,
}

impl SelectorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SelectorState::NoCandidates
                | SelectorState::FoundTrivial
                | SelectorState::FoundNontrivial
                | SelectorState::Restored
        )
    }
}

/// One oracle run against a materialized candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleAttempt {
    pub phase: OracleMode,
    /// Index into the good candidate list.
    pub candidate: usize,
    pub manifest_text: String,
    pub outcome: OracleOutcome,
}

/// What happened when the original manifest was put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub digest: String,
    pub train: OracleOutcome,
}

/// Result of a selection run.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub state: SelectorState,
    pub picked: Option<usize>,
    /// `None` unless a candidate was picked.
    pub trivial: Option<bool>,
    pub attempts: Vec<OracleAttempt>,
    pub restore: Option<RestoreRecord>,
    pub transitions: Vec<SelectorState>,
}

impl Selection {
    pub fn success(&self) -> bool {
        self.picked.is_some()
    }

    /// The attempt that produced the winner.
    pub fn winning_attempt(&self) -> Option<&OracleAttempt> {
        let picked = self.picked?;
        let phase = if self.trivial? {
            OracleMode::Check
        } else {
            OracleMode::Train
        };
        self.attempts
            .iter()
            .rev()
            .find(|a| a.candidate == picked && a.phase == phase)
    }

    fn enter(&mut self, state: SelectorState) {
        debug!(from = ?self.state, to = ?state, "selector transition");
        self.state = state;
        self.transitions.push(state);
    }
}

/// Drives candidates through the oracle via a manifest store.
pub struct RollSelector<'a> {
    store: &'a dyn ManifestStore,
    oracle: &'a dyn Oracle,
}

impl<'a> RollSelector<'a> {
    pub fn new(store: &'a dyn ManifestStore, oracle: &'a dyn Oracle) -> Self {
        Self { store, oracle }
    }

    /// Pick a winner from `good` (least to most changed).
    ///
    /// When no candidate passes, or a store failure interrupts the scan, the
    /// original bytes are written back and the oracle is re-run in train
    /// mode against them. On the error path that restore is best effort and
    /// the scan error is returned.
    pub async fn select(&self, good: &[RollCandidate]) -> RollResult<Selection> {
        let mut sel = Selection {
            state: SelectorState::NoCandidates,
            picked: None,
            trivial: None,
            attempts: Vec::new(),
            restore: None,
            transitions: Vec::new(),
        };
        if good.is_empty() {
            sel.transitions.push(SelectorState::NoCandidates);
            info!("no good candidates, nothing to roll");
            return Ok(sel);
        }

        let original = self.store.read_raw()?;
        let original_digest = manifest_digest(&original);
        let original_manifest = Manifest::from_json(&original)?;

        match self.scan(good, &mut sel).await {
            Ok(true) => return Ok(sel),
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "selector interrupted, restoring original manifest");
                if let Err(restore_err) = self
                    .restore(&original, &original_digest, &original_manifest)
                    .await
                {
                    warn!(error = %restore_err, "best-effort restore failed");
                }
                return Err(e);
            }
        }

        sel.enter(SelectorState::Failed);
        sel.enter(SelectorState::Restoring);
        let record = self
            .restore(&original, &original_digest, &original_manifest)
            .await?;
        sel.restore = Some(record);
        sel.enter(SelectorState::Restored);
        Ok(sel)
    }

    /// Write `original` back, verify its digest, then retrain against it.
    async fn restore(
        &self,
        original: &[u8],
        digest: &str,
        manifest: &Manifest,
    ) -> RollResult<RestoreRecord> {
        self.store.write_raw(original)?;
        let actual = manifest_digest(&self.store.read_raw()?);
        if actual != digest {
            return Err(RollError::RestoreMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        let train = self.invoke(OracleMode::Train, manifest, None).await;
        obs::emit_selector_restored(digest, train.exit_code);
        Ok(RestoreRecord {
            digest: digest.to_string(),
            train,
        })
    }

    /// Both phases. `Ok(true)` when a winner was found.
    async fn scan(&self, good: &[RollCandidate], sel: &mut Selection) -> RollResult<bool> {
        sel.enter(SelectorState::SearchingTrivial);
        for idx in (0..good.len()).rev() {
            if self.attempt(OracleMode::Check, idx, &good[idx], sel).await? {
                sel.picked = Some(idx);
                sel.trivial = Some(true);
                sel.enter(SelectorState::FoundTrivial);
                obs::emit_selector_picked(idx, true);
                return Ok(true);
            }
        }

        sel.enter(SelectorState::SearchingNontrivial);
        for (idx, candidate) in good.iter().enumerate() {
            if self.attempt(OracleMode::Train, idx, candidate, sel).await? {
                sel.picked = Some(idx);
                sel.trivial = Some(false);
                sel.enter(SelectorState::FoundNontrivial);
                obs::emit_selector_picked(idx, false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn attempt(
        &self,
        mode: OracleMode,
        idx: usize,
        candidate: &RollCandidate,
        sel: &mut Selection,
    ) -> RollResult<bool> {
        let text = candidate.render()?;
        self.store.write_raw(text.as_bytes())?;
        let outcome = self.invoke(mode, candidate.manifest(), Some(idx)).await;
        let passed = outcome.passed();
        sel.attempts.push(OracleAttempt {
            phase: mode,
            candidate: idx,
            manifest_text: text,
            outcome,
        });
        Ok(passed)
    }

    async fn invoke(&self, mode: OracleMode, manifest: &Manifest, idx: Option<usize>) -> OracleOutcome {
        let outcome = match self.oracle.run(mode, manifest).await {
            Ok(o) => o,
            Err(e) => {
                warn!(mode = %mode, error = %e, "oracle could not run");
                OracleOutcome::unrunnable(e)
            }
        };
        obs::emit_oracle_invoked(mode.as_str(), idx, outcome.exit_code);
        outcome
    }
}

/// Rejected candidates that move or conflict over any of `interested`
/// relative to `original`. An empty set keeps everything.
pub fn filter_rejected<'c>(
    bad: &'c [RollCandidate],
    original: &Manifest,
    interested: &BTreeSet<String>,
) -> Vec<&'c RollCandidate> {
    bad.iter()
        .filter(|c| interested.is_empty() || c.touches(original, interested))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DepSpec;
    use crate::fakes::{MemoryManifestStore, ScriptedOracle};

    fn root() -> Manifest {
        Manifest::new("build").with_dep("a", DepSpec::new("u", "a0"))
    }

    fn candidates(revs: &[&str]) -> Vec<RollCandidate> {
        revs.iter()
            .map(|r| {
                RollCandidate::new(
                    root().with_revisions(&[("a".to_string(), r.to_string())].into()),
                    vec![],
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_candidates_leaves_manifest_alone() {
        let store = MemoryManifestStore::with_manifest(&root()).unwrap();
        let before = store.read_raw().unwrap();
        let oracle = ScriptedOracle::passing();
        let sel = RollSelector::new(&store, &oracle).select(&[]).await.unwrap();
        assert_eq!(sel.state, SelectorState::NoCandidates);
        assert!(!sel.success());
        assert_eq!(oracle.calls().len(), 0);
        assert_eq!(store.read_raw().unwrap(), before);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_trivial_scan_starts_from_most_changed() {
        let store = MemoryManifestStore::with_manifest(&root()).unwrap();
        let oracle = ScriptedOracle::passing();
        let good = candidates(&["a1", "a2", "a3"]);
        let sel = RollSelector::new(&store, &oracle).select(&good).await.unwrap();
        assert_eq!(sel.state, SelectorState::FoundTrivial);
        assert_eq!(sel.picked, Some(2));
        assert_eq!(sel.trivial, Some(true));
        assert_eq!(store.load().unwrap().revision_of("a"), Some("a3"));
        assert_eq!(sel.winning_attempt().unwrap().candidate, 2);
    }

    #[tokio::test]
    async fn test_oracle_error_is_recorded_and_scan_continues() {
        let store = MemoryManifestStore::with_manifest(&root()).unwrap();
        let oracle = ScriptedOracle::new(|mode, m| match (mode, m.revision_of("a")) {
            (OracleMode::Check, Some("a2")) => Err(RollError::Oracle("spawn failed".into())),
            (OracleMode::Check, Some("a1")) => Ok(0),
            _ => Ok(1),
        });
        let good = candidates(&["a1", "a2"]);
        let sel = RollSelector::new(&store, &oracle).select(&good).await.unwrap();
        assert_eq!(sel.picked, Some(0));
        assert_eq!(sel.attempts[0].outcome.exit_code, -1);
        assert_eq!(sel.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_total_failure_restores_and_trains_original() {
        let store = MemoryManifestStore::with_manifest(&root()).unwrap();
        let before = store.read_raw().unwrap();
        let oracle = ScriptedOracle::failing();
        let good = candidates(&["a1", "a2"]);
        let sel = RollSelector::new(&store, &oracle).select(&good).await.unwrap();
        assert_eq!(sel.state, SelectorState::Restored);
        assert_eq!(
            sel.transitions,
            vec![
                SelectorState::SearchingTrivial,
                SelectorState::SearchingNontrivial,
                SelectorState::Failed,
                SelectorState::Restoring,
                SelectorState::Restored,
            ]
        );
        assert_eq!(store.read_raw().unwrap(), before);
        assert_eq!(sel.trivial, None);
        let calls = oracle.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[4].0, OracleMode::Train);
        assert_eq!(calls[4].1["a"], "a0");
        assert!(sel.restore.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_mid_scan_restores_and_trains_original() {
        // Writes: a2 (check), a1 (check), a1 (train), then a2 (train) fails.
        let store = MemoryManifestStore::with_manifest(&root())
            .unwrap()
            .failing_on_write(4);
        let before = store.read_raw().unwrap();
        let oracle = ScriptedOracle::failing();
        let good = candidates(&["a1", "a2"]);

        let err = RollSelector::new(&store, &oracle)
            .select(&good)
            .await
            .unwrap_err();
        assert!(matches!(err, RollError::Io(_)));

        assert_eq!(store.read_raw().unwrap(), before);
        let calls = oracle.calls();
        let modes: Vec<OracleMode> = calls.iter().map(|(m, _)| *m).collect();
        assert_eq!(
            modes,
            vec![
                OracleMode::Check,
                OracleMode::Check,
                OracleMode::Train,
                OracleMode::Train,
            ]
        );
        assert_eq!(calls[2].1["a"], "a1");
        assert_eq!(calls[3].1["a"], "a0", "last run retrains the original");
    }

    #[tokio::test]
    async fn test_failed_restore_write_skips_retraining() {
        // The scan fails on its first write and so does the restore.
        struct BrokenStore(Vec<u8>);
        impl ManifestStore for BrokenStore {
            fn read_raw(&self) -> RollResult<Vec<u8>> {
                Ok(self.0.clone())
            }
            fn write_raw(&self, _: &[u8]) -> RollResult<()> {
                Err(RollError::Io(std::io::Error::other("read-only")))
            }
        }
        let store = BrokenStore(root().to_json_pretty().unwrap().into_bytes());
        let oracle = ScriptedOracle::passing();
        let result = RollSelector::new(&store, &oracle)
            .select(&candidates(&["a1"]))
            .await;
        assert!(matches!(result, Err(RollError::Io(_))));
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn test_filter_rejected_by_interest() {
        let original = Manifest::new("build")
            .with_dep("a", DepSpec::new("u", "a0"))
            .with_dep("b", DepSpec::new("u", "b0"));
        let moved_a = RollCandidate::new(
            original.with_revisions(&[("a".to_string(), "a1".to_string())].into()),
            vec![],
        );
        let moved_b = RollCandidate::new(
            original.with_revisions(&[("b".to_string(), "b1".to_string())].into()),
            vec![],
        );
        let bad = vec![moved_a, moved_b];
        let only_b = filter_rejected(&bad, &original, &BTreeSet::from(["b".to_string()]));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].manifest().revision_of("b"), Some("b1"));
        assert_eq!(filter_rejected(&bad, &original, &BTreeSet::new()).len(), 2);
    }
}
