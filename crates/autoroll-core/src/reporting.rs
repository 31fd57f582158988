use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

use crate::candidate::{Changelist, Conflict, RollCandidate};
use crate::domain::{CommitSummary, Manifest, RevisionChange, ROLL_MARKER};
use crate::oracle::{OracleMode, OracleOutcome};
use crate::search::{SearchOutcome, StopReason};
use crate::selector::{filter_rejected, OracleAttempt, RestoreRecord, SelectorState, Selection};

pub const ROLL_REPORT_SCHEMA_VERSION: &str = "1.0";

/// Diagnostics for one oracle attempt against one candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateDiagnostics {
    pub phase: OracleMode,
    pub candidate: usize,
    pub manifest_text: String,
    pub diff: BTreeMap<String, RevisionChange>,
    pub changelist: BTreeMap<String, Vec<CommitSummary>>,
    pub exit_code: i32,
    pub output: String,
}

/// A candidate the search rejected as inconsistent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedSummary {
    pub revisions: BTreeMap<String, String>,
    pub conflicts: Vec<Conflict>,
}

/// Canonical roll report written after every attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollReport {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub attempt_id: Uuid,
    pub project_id: String,
    pub success: bool,
    /// `None` when nothing was rolled.
    pub trivial: Option<bool>,
    /// Set when the manifest disables rolling.
    pub disabled: Option<String>,
    pub stop: Option<StopReason>,
    pub state: Option<SelectorState>,
    pub candidate_diagnostics: Vec<CandidateDiagnostics>,
    pub picked: Option<CandidateDiagnostics>,
    pub rejected: Vec<RejectedSummary>,
    pub restore: Option<RestoreRecord>,
    pub commit_message: Option<String>,
}

impl RollReport {
    /// Assemble the report of a completed search and selection.
    ///
    /// Rejected candidates are limited to those touching `interested`; an
    /// empty set keeps them all.
    pub fn build(
        attempt_id: Uuid,
        original: &Manifest,
        outcome: &SearchOutcome,
        selection: &Selection,
        interested: &BTreeSet<String>,
    ) -> Self {
        let candidate_diagnostics: Vec<CandidateDiagnostics> = selection
            .attempts
            .iter()
            .filter_map(|a| diagnose(a, original, outcome))
            .collect();
        let picked = selection
            .winning_attempt()
            .and_then(|a| diagnose(a, original, outcome));
        let commit_message = match (selection.picked, selection.trivial) {
            (Some(idx), Some(trivial)) => outcome
                .good
                .get(idx)
                .map(|c| commit_message(trivial, &c.changelist(&outcome.repos))),
            _ => None,
        };
        let rejected = filter_rejected(&outcome.bad, original, interested)
            .into_iter()
            .map(|c| RejectedSummary {
                revisions: c.revisions(),
                conflicts: c.conflicts().to_vec(),
            })
            .collect();

        Self {
            schema_version: ROLL_REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            attempt_id,
            project_id: original.project_id.clone(),
            success: selection.success(),
            trivial: selection.trivial,
            disabled: None,
            stop: Some(outcome.stop.clone()),
            state: Some(selection.state),
            candidate_diagnostics,
            picked,
            rejected,
            restore: selection.restore.clone(),
            commit_message,
        }
    }

    /// Report for a manifest whose roll options disable rolling.
    pub fn disabled(attempt_id: Uuid, original: &Manifest, reason: &str) -> Self {
        Self {
            schema_version: ROLL_REPORT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            attempt_id,
            project_id: original.project_id.clone(),
            success: false,
            trivial: None,
            disabled: Some(reason.to_string()),
            stop: None,
            state: None,
            candidate_diagnostics: Vec::new(),
            picked: None,
            rejected: Vec::new(),
            restore: None,
            commit_message: None,
        }
    }
}

fn diagnose(
    attempt: &OracleAttempt,
    original: &Manifest,
    outcome: &SearchOutcome,
) -> Option<CandidateDiagnostics> {
    let candidate: &RollCandidate = outcome.good.get(attempt.candidate)?;
    let changelist = candidate
        .changelist(&outcome.repos)
        .into_iter()
        .map(|(dep, commits)| (dep, commits.into_iter().map(|c| c.summary()).collect()))
        .collect();
    let OracleOutcome { exit_code, output } = attempt.outcome.clone();
    Some(CandidateDiagnostics {
        phase: attempt.phase,
        candidate: attempt.candidate,
        manifest_text: attempt.manifest_text.clone(),
        diff: original.diff(candidate.manifest()),
        changelist,
        exit_code,
        output,
    })
}

/// Commit message for a roll: a marker title, then one section per rolled
/// dependency listing its new commits.
pub fn commit_message(trivial: bool, changelist: &Changelist<'_>) -> String {
    let kind = if trivial { "trivial" } else { "nontrivial" };
    let mut out = format!("{ROLL_MARKER} ({kind}).\n");
    for (dep_id, commits) in changelist {
        out.push_str(&format!("\n{dep_id}:\n"));
        for c in commits {
            out.push_str(&format!(
                "  {} {} {}\n",
                c.short_revision(),
                c.author,
                c.first_line()
            ));
        }
    }
    out
}

/// Write the roll report in pretty JSON format.
pub fn write_roll_report_json(path: &Path, report: &RollReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize roll report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a markdown summary of a roll report.
pub fn render_roll_summary_md(report: &RollReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Roll Summary: {}\n\n", report.project_id));

    let verdict = match (report.success, report.trivial) {
        (true, Some(true)) => "rolled (trivial)",
        (true, _) => "rolled (nontrivial)",
        (false, _) if report.disabled.is_some() => "disabled",
        (false, _) => "no roll",
    };
    out.push_str(&format!("- result: {verdict}\n"));
    if let Some(reason) = &report.disabled {
        out.push_str(&format!("- disable reason: {reason}\n"));
    }
    if let Some(stop) = &report.stop {
        out.push_str(&format!("- search stopped: {stop}\n"));
    }
    out.push_str(&format!(
        "- oracle attempts: {}\n- rejected candidates: {}\n\n",
        report.candidate_diagnostics.len(),
        report.rejected.len()
    ));

    if let Some(picked) = &report.picked {
        out.push_str("## Picked\n");
        for (dep, change) in &picked.diff {
            out.push_str(&format!(
                "- `{}`: {} -> {}\n",
                dep,
                change.old.as_deref().unwrap_or("(none)"),
                change.new.as_deref().unwrap_or("(none)")
            ));
        }
        out.push('\n');
    }

    if !report.candidate_diagnostics.is_empty() {
        out.push_str("## Attempts\n");
        for d in &report.candidate_diagnostics {
            out.push_str(&format!(
                "- #{} {}: exit {}\n",
                d.candidate,
                d.phase,
                d.exit_code
            ));
        }
        out.push('\n');
    }

    if !report.rejected.is_empty() {
        out.push_str("## Rejected\n");
        for r in &report.rejected {
            let conflicts: Vec<String> = r
                .conflicts
                .iter()
                .map(|c| format!("{} pins {} at {} (snapshot {})", c.declared_by, c.dependency, c.declared, c.pinned))
                .collect();
            out.push_str(&format!("- {}\n", conflicts.join("; ")));
        }
        out.push('\n');
    }

    if let Some(restore) = &report.restore {
        out.push_str(&format!(
            "Original manifest restored (sha256 `{}`), train exit {}.\n",
            restore.digest, restore.train.exit_code
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_list::CommitList;
    use crate::domain::{CommitMetadata, DepSpec};
    use crate::selector::SelectorState;

    fn outcome() -> (Manifest, SearchOutcome) {
        let original = Manifest::new("build").with_dep("a", DepSpec::new("u", "a0"));
        let list = CommitList::new(
            "a",
            DepSpec::new("u", "a0"),
            CommitMetadata::new("a0").message("base"),
            vec![CommitMetadata::new("a1aaaaaaaaaaaaaaaa")
                .authored_by("alice@example.com")
                .message("Teach frobnicator\n\ndetails")],
        );
        let good = vec![RollCandidate::new(
            original.with_revisions(&[("a".to_string(), "a1aaaaaaaaaaaaaaaa".to_string())].into()),
            vec![],
        )];
        let out = SearchOutcome {
            good,
            bad: vec![],
            stop: StopReason::Exhausted,
            steps: 1,
            repos: [("a".to_string(), list)].into(),
        };
        (original, out)
    }

    fn picked_selection() -> Selection {
        Selection {
            state: SelectorState::FoundTrivial,
            picked: Some(0),
            trivial: Some(true),
            attempts: vec![OracleAttempt {
                phase: OracleMode::Check,
                candidate: 0,
                manifest_text: "{}".to_string(),
                outcome: OracleOutcome::new(0, "ok"),
            }],
            restore: None,
            transitions: vec![SelectorState::SearchingTrivial, SelectorState::FoundTrivial],
        }
    }

    #[test]
    fn test_commit_message_lists_new_commits() {
        let (_, out) = outcome();
        let msg = commit_message(true, &out.good[0].changelist(&out.repos));
        assert_eq!(
            msg,
            "Roll dependencies (trivial).\n\na:\n  a1aaaaaaaaaa alice@example.com Teach frobnicator\n"
        );
        assert!(commit_message(false, &BTreeMap::new()).starts_with("Roll dependencies (nontrivial)."));
    }

    #[test]
    fn test_build_report_for_pick() {
        let (original, out) = outcome();
        let report = RollReport::build(Uuid::new_v4(), &original, &out, &picked_selection(), &BTreeSet::new());
        assert!(report.success);
        assert_eq!(report.trivial, Some(true));
        let picked = report.picked.as_ref().unwrap();
        assert_eq!(picked.diff["a"].new.as_deref(), Some("a1aaaaaaaaaaaaaaaa"));
        assert_eq!(picked.changelist["a"].len(), 1);
        assert!(report.commit_message.as_deref().unwrap().contains("Teach frobnicator"));
    }

    #[test]
    fn test_write_report_json_roundtrip() {
        let (original, out) = outcome();
        let report = RollReport::build(Uuid::new_v4(), &original, &out, &picked_selection(), &BTreeSet::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/roll_report.json");
        write_roll_report_json(&path, &report).unwrap();
        let back: RollReport = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_render_summary_for_disabled_manifest() {
        let original = Manifest::new("build");
        let report = RollReport::disabled(Uuid::new_v4(), &original, "tree closed");
        let md = render_roll_summary_md(&report);
        assert!(md.contains("# Roll Summary: build"));
        assert!(md.contains("- result: disabled"));
        assert!(md.contains("tree closed"));
    }

    #[test]
    fn test_render_summary_for_pick() {
        let (original, out) = outcome();
        let report = RollReport::build(Uuid::new_v4(), &original, &out, &picked_selection(), &BTreeSet::new());
        let md = render_roll_summary_md(&report);
        assert!(md.contains("rolled (trivial)"));
        assert!(md.contains("- `a`: a0 -> a1aaaaaaaaaaaaaaaa"));
        assert!(md.contains("- #0 check: exit 0"));
    }
}
