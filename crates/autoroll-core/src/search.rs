//! Candidate search: walk every tracked dependency forward one roll
//! candidate at a time and record each resulting manifest snapshot.
//!
//! The search is a sequential fixpoint over the cursors of an owned
//! registry of [`CommitList`]s. Each step moves the repository whose next
//! roll candidate is cheapest to accommodate, cascades the pins it declares
//! into the other tracked repositories, and classifies the snapshot as good
//! (consistent) or bad. Since cursors only move forward, successive
//! candidates are monotonically more changed.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::candidate::{find_conflicts, RollCandidate};
use crate::commit_list::CommitList;
use crate::domain::{DepSpec, Manifest, RollError, RollResult};
use crate::obs;
use crate::vcs::CommitSource;

/// Score of one tracked repository's next roll candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevScore {
    pub repo_id: String,
    pub revision: String,
    pub score: usize,
    pub commit_timestamp: i64,
}

/// Score every tracked repository that still has a roll candidate ahead of
/// its cursor. Lower scores are cheaper to accommodate.
///
/// The score of a candidate commit in repository R is the number of
/// positions R moves, plus the distance every tracked dependency it declares
/// must move to reach the declared pin, plus the distance every other
/// tracked repository must move before it is compatible with R at the
/// candidate revision.
pub fn score_candidates(repos: &BTreeMap<String, CommitList>) -> Vec<RevScore> {
    let mut scores = Vec::new();
    for (repo_id, list) in repos {
        let Some(step) = list.next_roll_candidate() else {
            continue;
        };
        let commit = step.commit;
        let mut score = step.movement_score;

        for (dep_id, spec) in commit.deps() {
            if dep_id == repo_id {
                continue;
            }
            if let Some(dep_list) = repos.get(dep_id) {
                score += dep_list.dist_to(&spec.revision);
            }
        }

        let declared = commit.manifest.as_ref().map(|m| &m.deps);
        for (other_id, other) in repos {
            if other_id == repo_id || declared.is_some_and(|d| d.contains_key(other_id)) {
                continue;
            }
            score += other.dist_compatible_with(repo_id, &commit.revision);
        }

        scores.push(RevScore {
            repo_id: repo_id.clone(),
            revision: commit.revision.clone(),
            score,
            commit_timestamp: commit.commit_timestamp,
        });
    }
    scores
}

/// The tracked repository whose next roll candidate should be taken next.
///
/// Ranked by score, then commit timestamp (best effort: the clocks of
/// independent repositories are not comparable), then repository id.
pub fn find_best_rev(repos: &BTreeMap<String, CommitList>) -> Option<String> {
    score_candidates(repos)
        .into_iter()
        .min_by(|a, b| {
            (a.score, a.commit_timestamp, &a.repo_id).cmp(&(b.score, b.commit_timestamp, &b.repo_id))
        })
        .map(|s| s.repo_id)
}

/// Why the search stopped producing candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// No tracked repository has a roll candidate left.
    Exhausted,
    /// The chosen repository could not advance.
    AdvanceFailed { repo: String },
    /// A dependency pinned by the newly advanced commit is not reachable.
    CascadeFailed {
        repo: String,
        dependency: String,
        revision: String,
    },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => write!(f, "exhausted"),
            StopReason::AdvanceFailed { repo } => write!(f, "advance of {repo} failed"),
            StopReason::CascadeFailed {
                repo,
                dependency,
                revision,
            } => write!(f, "{repo} pins {dependency} at unreachable {revision}"),
        }
    }
}

/// Everything the search produced.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Consistent candidates, least to most changed.
    pub good: Vec<RollCandidate>,
    /// Inconsistent candidates, kept for operator visibility.
    pub bad: Vec<RollCandidate>,
    pub stop: StopReason,
    pub steps: usize,
    /// The registry at the end of the search, including discovered repos.
    pub repos: BTreeMap<String, CommitList>,
}

/// Load the commit list of every dependency of `root`.
pub fn load_registry(
    root: &Manifest,
    source: &dyn CommitSource,
) -> RollResult<BTreeMap<String, CommitList>> {
    let mut repos = BTreeMap::new();
    for (dep_id, dep) in &root.deps {
        repos.insert(dep_id.clone(), source.load(dep_id, dep)?);
    }
    Ok(repos)
}

/// Enumerate the roll candidates reachable from `root`.
pub fn get_roll_candidates(root: &Manifest, source: &dyn CommitSource) -> RollResult<SearchOutcome> {
    root.validate()?;
    let repos = load_registry(root, source)?;
    search_from(root, repos, source)
}

/// Run the search over an already loaded registry. `source` is only used
/// for repositories discovered along the way.
pub fn search_from(
    root: &Manifest,
    mut repos: BTreeMap<String, CommitList>,
    source: &dyn CommitSource,
) -> RollResult<SearchOutcome> {
    let mut good = Vec::new();
    let mut bad = Vec::new();
    let mut steps = 0;

    let stop = loop {
        let Some(winner) = find_best_rev(&repos) else {
            break StopReason::Exhausted;
        };
        steps += 1;

        let Some(list) = repos.get_mut(&winner) else {
            break StopReason::AdvanceFailed { repo: winner };
        };
        let (revision, declared) = match list.advance() {
            Ok(commit) => (commit.revision.clone(), commit.manifest.as_ref().map(|m| m.revisions())),
            Err(e) => {
                warn!(repo = %winner, error = %e, "advance failed");
                break StopReason::AdvanceFailed { repo: winner };
            }
        };
        debug!(step = steps, repo = %winner, revision = %revision, "advanced");

        if let Some(failure) = cascade(&winner, declared.unwrap_or_default(), &mut repos) {
            warn!(reason = %failure, "cascade failed, stopping search");
            break failure;
        }

        let (snapshot, discovered) = compose_snapshot(root, &repos)?;
        let conflicts = find_conflicts(&snapshot, &repos);
        let consistent = conflicts.is_empty();
        obs::emit_search_step(steps, &winner, &revision, consistent);

        let candidate = RollCandidate::new(snapshot, conflicts);
        if consistent {
            for (dep_id, dep) in discovered {
                if !repos.contains_key(&dep_id) {
                    debug!(repo = %dep_id, revision = %dep.revision, "tracking discovered repo");
                    let list = source.load(&dep_id, &dep)?;
                    repos.insert(dep_id, list);
                }
            }
            good.push(candidate);
        } else {
            debug!(conflicts = candidate.conflicts().len(), "inconsistent candidate");
            bad.push(candidate);
        }
    };

    obs::emit_search_finished(steps, good.len(), bad.len(), &stop);
    info!(good = good.len(), bad = bad.len(), "search finished");
    Ok(SearchOutcome {
        good,
        bad,
        stop,
        steps,
        repos,
    })
}

/// Move every tracked dependency declared by `repo_id`'s new commit to the
/// declared revision.
fn cascade(
    repo_id: &str,
    declared: BTreeMap<String, String>,
    repos: &mut BTreeMap<String, CommitList>,
) -> Option<StopReason> {
    for (dep_id, revision) in declared {
        if dep_id == repo_id {
            continue;
        }
        let Some(dep_list) = repos.get_mut(&dep_id) else {
            continue;
        };
        if let Err(e) = dep_list.advance_to(&revision) {
            debug!(error = %e, "cascade target unreachable");
            return Some(StopReason::CascadeFailed {
                repo: repo_id.to_string(),
                dependency: dep_id,
                revision,
            });
        }
    }
    None
}

/// Snapshot of `root` pinned at every tracked cursor, plus one copy of each
/// further dependency the snapshot's repositories declare. Returns the
/// snapshot and the copied-forward entries.
fn compose_snapshot(
    root: &Manifest,
    repos: &BTreeMap<String, CommitList>,
) -> RollResult<(Manifest, BTreeMap<String, DepSpec>)> {
    let mut deps = root.deps.clone();
    for (repo_id, list) in repos {
        deps.insert(repo_id.clone(), list.pinned_spec());
    }

    let mut discovered = BTreeMap::new();
    for (repo_id, list) in repos {
        if !deps.contains_key(repo_id) {
            continue;
        }
        for (dep_id, spec) in list.current().deps() {
            if dep_id == &root.project_id {
                return Err(RollError::DependencyCycle {
                    project: root.project_id.clone(),
                    via: repo_id.clone(),
                });
            }
            if !deps.contains_key(dep_id) && !discovered.contains_key(dep_id) {
                discovered.insert(dep_id.clone(), spec.clone());
            }
        }
    }
    deps.extend(discovered.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok((root.with_deps(deps), discovered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CommitMetadata;

    fn list(id: &str, commits: Vec<CommitMetadata>) -> CommitList {
        let mut iter = commits.into_iter();
        let baseline = iter.next().unwrap();
        CommitList::new(
            id,
            DepSpec::new(format!("https://example.com/{id}.git"), baseline.revision.clone()),
            baseline,
            iter.collect(),
        )
    }

    fn at(rev: &str, ts: i64, m: Manifest) -> CommitMetadata {
        CommitMetadata::new(rev).at(ts).with_manifest(m)
    }

    #[test]
    fn test_find_best_rev_none_when_exhausted() {
        let repos = BTreeMap::from([(
            "a".to_string(),
            list("a", vec![at("a0", 0, Manifest::new("a"))]),
        )]);
        assert!(find_best_rev(&repos).is_none());
    }

    #[test]
    fn test_find_best_rev_prefers_lower_score() {
        let repos = BTreeMap::from([
            (
                "a".to_string(),
                list(
                    "a",
                    vec![
                        at("a0", 0, Manifest::new("a")),
                        at("a1", 50, Manifest::new("a")).roll_candidate(false),
                        at("a2", 60, Manifest::new("a")),
                    ],
                ),
            ),
            (
                "b".to_string(),
                list(
                    "b",
                    vec![at("b0", 0, Manifest::new("b")), at("b1", 99, Manifest::new("b"))],
                ),
            ),
        ]);
        let scores = score_candidates(&repos);
        assert_eq!(scores[0].score, 2);
        assert_eq!(scores[1].score, 1);
        assert_eq!(find_best_rev(&repos).as_deref(), Some("b"));
    }

    #[test]
    fn test_find_best_rev_tie_breaks_on_timestamp_then_id() {
        let mk = |id: &str, ts: i64| {
            (
                id.to_string(),
                list(
                    id,
                    vec![at(&format!("{id}0"), 0, Manifest::new(id)), at(&format!("{id}1"), ts, Manifest::new(id))],
                ),
            )
        };
        let repos = BTreeMap::from([mk("a", 20), mk("b", 10)]);
        assert_eq!(find_best_rev(&repos).as_deref(), Some("b"));

        let repos = BTreeMap::from([mk("a", 10), mk("b", 10)]);
        assert_eq!(find_best_rev(&repos).as_deref(), Some("a"));
    }

    #[test]
    fn test_score_counts_dependency_movement() {
        let b_on = |rev: &str| Manifest::new("b").with_dep("a", DepSpec::new("u", rev));
        let repos = BTreeMap::from([
            (
                "a".to_string(),
                list(
                    "a",
                    vec![
                        at("a0", 0, Manifest::new("a")),
                        at("a1", 0, Manifest::new("a")).roll_candidate(false),
                        at("a2", 0, Manifest::new("a")).roll_candidate(false),
                    ],
                ),
            ),
            (
                "b".to_string(),
                list("b", vec![at("b0", 0, b_on("a0")), at("b1", 0, b_on("a2"))]),
            ),
        ]);
        let scores = score_candidates(&repos);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].repo_id, "b");
        assert_eq!(scores[0].score, 1 + 2);
    }

    #[test]
    fn test_score_counts_dependee_catch_up() {
        let b_on = |rev: &str| Manifest::new("b").with_dep("a", DepSpec::new("u", rev));
        let repos = BTreeMap::from([
            (
                "a".to_string(),
                list("a", vec![at("a0", 0, Manifest::new("a")), at("a1", 0, Manifest::new("a"))]),
            ),
            (
                "b".to_string(),
                list(
                    "b",
                    vec![
                        at("b0", 0, b_on("a0")),
                        at("b1", 0, b_on("a0")).roll_candidate(false),
                        at("b2", 0, b_on("a0")).roll_candidate(false),
                        at("b3", 0, b_on("a1")),
                    ],
                ),
            ),
        ]);
        let scores = score_candidates(&repos);
        let a = scores.iter().find(|s| s.repo_id == "a").unwrap();
        assert_eq!(a.revision, "a1");
        // One step for a, three for b to stop pinning a0.
        assert_eq!(a.score, 1 + 3);
    }

    #[test]
    fn test_dependee_catch_up_changes_winner() {
        let b_on = |rev: &str| Manifest::new("b").with_dep("a", DepSpec::new("u", rev));
        let repos = BTreeMap::from([
            (
                "a".to_string(),
                list("a", vec![at("a0", 0, Manifest::new("a")), at("a1", 10, Manifest::new("a"))]),
            ),
            (
                "b".to_string(),
                list(
                    "b",
                    vec![
                        at("b0", 0, b_on("a0")),
                        at("b1", 0, b_on("a0")).roll_candidate(false),
                        at("b2", 0, b_on("a1")).roll_candidate(false),
                    ],
                ),
            ),
            (
                "c".to_string(),
                list("c", vec![at("c0", 0, Manifest::new("c")), at("c1", 20, Manifest::new("c"))]),
            ),
        ]);
        let scores = score_candidates(&repos);
        let score_of = |id: &str| scores.iter().find(|s| s.repo_id == id).unwrap().score;
        assert_eq!(score_of("a"), 1 + 2);
        assert_eq!(score_of("c"), 1);
        assert!(scores.iter().all(|s| s.repo_id != "b"));
        // a is older and would win a movement-only tie.
        assert_eq!(find_best_rev(&repos).as_deref(), Some("c"));
    }

    #[test]
    fn test_compose_snapshot_copies_forward_once() {
        let b = Manifest::new("b").with_dep("x", DepSpec::new("u", "x1"));
        let c = Manifest::new("c").with_dep("x", DepSpec::new("u", "x2"));
        let repos = BTreeMap::from([
            ("b".to_string(), list("b", vec![at("b0", 0, b)])),
            ("c".to_string(), list("c", vec![at("c0", 0, c)])),
        ]);
        let root = Manifest::new("root")
            .with_dep("b", DepSpec::new("u", "b0"))
            .with_dep("c", DepSpec::new("u", "c0"));
        let (snapshot, discovered) = compose_snapshot(&root, &repos).unwrap();
        assert_eq!(snapshot.revision_of("x"), Some("x1"), "first in sorted order wins");
        assert_eq!(discovered.len(), 1);
    }

    #[test]
    fn test_compose_snapshot_rejects_cycle_through_root() {
        let b = Manifest::new("b").with_dep("root", DepSpec::new("u", "r1"));
        let repos = BTreeMap::from([("b".to_string(), list("b", vec![at("b0", 0, b)]))]);
        let root = Manifest::new("root").with_dep("b", DepSpec::new("u", "b0"));
        assert!(matches!(
            compose_snapshot(&root, &repos),
            Err(RollError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_stop_reason_display() {
        let s = StopReason::CascadeFailed {
            repo: "b".to_string(),
            dependency: "a".to_string(),
            revision: "a9".to_string(),
        };
        assert_eq!(s.to_string(), "b pins a at unreachable a9");
        assert_eq!(StopReason::Exhausted.to_string(), "exhausted");
    }
}
