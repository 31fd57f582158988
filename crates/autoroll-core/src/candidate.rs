//! Roll candidates and the graph consistency predicate.
//!
//! A [`RollCandidate`] is one prospective manifest snapshot produced by the
//! search. It is immutable once created and shares its manifest through an
//! `Arc`, so later cursor movement in the search can never alias it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::commit_list::CommitList;
use crate::domain::{CommitMetadata, Manifest, ManifestError};

/// A tracked repository pins a dependency at a different revision than the
/// snapshot does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The dependency both sides pin.
    pub dependency: String,
    /// Revision pinned in the snapshot.
    pub pinned: String,
    /// Tracked repository whose manifest disagrees.
    pub declared_by: String,
    /// Revision that repository declares.
    pub declared: String,
}

/// All disagreements between `snapshot` and the manifests of the tracked
/// repositories at their cursors. Empty means consistent.
pub fn find_conflicts(snapshot: &Manifest, repos: &BTreeMap<String, CommitList>) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (repo_id, list) in repos {
        for (dep_id, dep) in list.current().deps() {
            if dep_id == repo_id {
                continue;
            }
            if let Some(pinned) = snapshot.revision_of(dep_id) {
                if pinned != dep.revision {
                    conflicts.push(Conflict {
                        dependency: dep_id.clone(),
                        pinned: pinned.to_string(),
                        declared_by: repo_id.clone(),
                        declared: dep.revision.clone(),
                    });
                }
            }
        }
    }
    conflicts
}

/// Whether every tracked repository agrees with every pin in `snapshot`.
pub fn is_consistent(snapshot: &Manifest, repos: &BTreeMap<String, CommitList>) -> bool {
    find_conflicts(snapshot, repos).is_empty()
}

/// Commits introduced by a candidate, per dependency.
pub type Changelist<'a> = BTreeMap<String, Vec<&'a CommitMetadata>>;

/// One prospective manifest snapshot.
#[derive(Debug, Clone)]
pub struct RollCandidate {
    manifest: Arc<Manifest>,
    conflicts: Vec<Conflict>,
}

impl RollCandidate {
    pub fn new(manifest: Manifest, conflicts: Vec<Conflict>) -> Self {
        Self {
            manifest: Arc::new(manifest),
            conflicts,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn shared_manifest(&self) -> Arc<Manifest> {
        Arc::clone(&self.manifest)
    }

    pub fn revisions(&self) -> BTreeMap<String, String> {
        self.manifest.revisions()
    }

    pub fn is_consistent(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Pretty JSON of the candidate manifest.
    pub fn render(&self) -> Result<String, ManifestError> {
        self.manifest.to_json_pretty()
    }

    /// Commits this candidate introduces for each dependency.
    ///
    /// The baseline commit of each list and commits authored by the
    /// autoroller are excluded. Dependencies with nothing left are omitted.
    pub fn changelist<'a>(&self, repos: &'a BTreeMap<String, CommitList>) -> Changelist<'a> {
        let mut out = BTreeMap::new();
        for (dep_id, spec) in &self.manifest.deps {
            let Some(range) = repos
                .get(dep_id)
                .and_then(|list| list.commits_through(&spec.revision))
            else {
                continue;
            };
            let commits: Vec<&CommitMetadata> = range
                .iter()
                .skip(1)
                .filter(|c| !c.is_roll_commit())
                .collect();
            if !commits.is_empty() {
                out.insert(dep_id.clone(), commits);
            }
        }
        out
    }

    /// Whether this candidate moves, or conflicts over, any of `projects`
    /// relative to `original`.
    pub fn touches(&self, original: &Manifest, projects: &BTreeSet<String>) -> bool {
        original
            .diff(&self.manifest)
            .keys()
            .any(|id| projects.contains(id))
            || self
                .conflicts
                .iter()
                .any(|c| projects.contains(&c.dependency) || projects.contains(&c.declared_by))
    }
}
