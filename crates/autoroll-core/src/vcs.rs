//! VCS seam: raw history access and commit-list loading.
//!
//! [`Vcs`] is the minimal backend contract (resolve a ref, list a revision
//! range, describe a revision, read a file at a revision). [`CommitSource`]
//! is what the search actually consumes; [`VcsCommitSource`] composes the two
//! by parsing each revision's manifest and classifying roll candidates.
//!
//! Every backend failure is fatal to the roll attempt.

use tracing::debug;

use crate::commit_list::CommitList;
use crate::domain::{CommitMetadata, DepSpec, Manifest, ManifestError, RollError, RollResult};

/// Default location of a repository's manifest, relative to its root.
pub const DEFAULT_MANIFEST_PATH: &str = "infra/config/deps.json";

/// One commit as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub revision: String,
    pub author: String,
    pub timestamp: i64,
    pub message_lines: Vec<String>,
    /// Paths changed relative to the first parent.
    pub changed_paths: Vec<String>,
}

/// Raw history access for one backend.
///
/// `repo_id` identifies the repository for caching; `url` locates it.
pub trait Vcs: Send + Sync {
    /// Resolve `reference` (branch, tag, or revision) to an absolute revision.
    fn resolve_ref(&self, repo_id: &str, url: &str, reference: &str) -> RollResult<String>;

    /// Commits in `(from, to]` along first-parent ancestry, oldest first.
    fn log_range(&self, repo_id: &str, url: &str, from: &str, to: &str)
        -> RollResult<Vec<RawCommit>>;

    /// Metadata of a single revision.
    fn describe(&self, repo_id: &str, url: &str, revision: &str) -> RollResult<RawCommit>;

    /// Content of `path` at `revision`; `None` if the path does not exist.
    fn read_file(
        &self,
        repo_id: &str,
        url: &str,
        revision: &str,
        path: &str,
    ) -> RollResult<Option<Vec<u8>>>;
}

/// Loads the [`CommitList`] for a dependency entry.
pub trait CommitSource {
    fn load(&self, dep_id: &str, dep: &DepSpec) -> RollResult<CommitList>;
}

/// [`CommitSource`] backed by a [`Vcs`].
pub struct VcsCommitSource<V> {
    vcs: V,
    manifest_path: String,
}

impl<V: Vcs> VcsCommitSource<V> {
    pub fn new(vcs: V) -> Self {
        Self {
            vcs,
            manifest_path: DEFAULT_MANIFEST_PATH.to_string(),
        }
    }

    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = path.into();
        self
    }

    pub fn vcs(&self) -> &V {
        &self.vcs
    }
}

impl<V: Vcs> CommitSource for VcsCommitSource<V> {
    fn load(&self, dep_id: &str, dep: &DepSpec) -> RollResult<CommitList> {
        load_commit_list(&self.vcs, dep_id, dep, &self.manifest_path)
    }
}

/// Build the [`CommitList`] of `dep_id` from its pinned revision to the tip
/// of its tracked branch.
///
/// Each revision's manifest is read from `dep.path_override`, falling back to
/// `manifest_path`. Unparsable manifests become `None`; a manifest that
/// declares its own project is fatal.
pub fn load_commit_list<V: Vcs + ?Sized>(
    vcs: &V,
    dep_id: &str,
    dep: &DepSpec,
    manifest_path: &str,
) -> RollResult<CommitList> {
    let manifest_file = dep.path_override.as_deref().unwrap_or(manifest_path);
    let tip = vcs.resolve_ref(dep_id, &dep.url, &dep.branch)?;
    let baseline_raw = vcs.describe(dep_id, &dep.url, &dep.revision)?;
    if baseline_raw.revision != dep.revision {
        return Err(RollError::Vcs(format!(
            "{dep_id} is pinned at {}, which is not a full revision (resolves to {})",
            dep.revision, baseline_raw.revision
        )));
    }
    let baseline = to_metadata(vcs, dep_id, dep, manifest_file, baseline_raw, "")?;

    let mut source_path = baseline
        .manifest
        .as_ref()
        .map(|m| m.source_path.clone())
        .unwrap_or_default();
    let mut ahead = Vec::new();
    if tip != dep.revision {
        for raw in vcs.log_range(dep_id, &dep.url, &dep.revision, &tip)? {
            let commit = to_metadata(vcs, dep_id, dep, manifest_file, raw, &source_path)?;
            if let Some(m) = &commit.manifest {
                source_path = m.source_path.clone();
            }
            ahead.push(commit);
        }
        if ahead.last().map(|c| c.revision.as_str()) != Some(tip.as_str()) {
            return Err(RollError::Vcs(format!(
                "history of {dep_id} from {} does not reach {tip}",
                dep.revision
            )));
        }
    }

    debug!(
        repo = %dep_id,
        baseline = %dep.revision,
        tip = %tip,
        commits = ahead.len(),
        "loaded commit list"
    );
    Ok(CommitList::new(dep_id, dep.clone(), baseline, ahead))
}

fn manifest_at<V: Vcs + ?Sized>(
    vcs: &V,
    dep_id: &str,
    dep: &DepSpec,
    manifest_file: &str,
    revision: &str,
) -> RollResult<Option<Manifest>> {
    let Some(bytes) = vcs.read_file(dep_id, &dep.url, revision, manifest_file)? else {
        debug!(repo = %dep_id, revision = %revision, path = %manifest_file, "manifest absent");
        return Ok(None);
    };
    match Manifest::from_json(&bytes) {
        Ok(m) => Ok(Some(m)),
        Err(e @ ManifestError::SelfDependency { .. }) => Err(e.into()),
        Err(e) => {
            debug!(repo = %dep_id, revision = %revision, error = %e, "unparsable manifest");
            Ok(None)
        }
    }
}

fn to_metadata<V: Vcs + ?Sized>(
    vcs: &V,
    dep_id: &str,
    dep: &DepSpec,
    manifest_file: &str,
    raw: RawCommit,
    fallback_source_path: &str,
) -> RollResult<CommitMetadata> {
    let manifest = manifest_at(vcs, dep_id, dep, manifest_file, &raw.revision)?;
    let source_path = manifest
        .as_ref()
        .map(|m| m.source_path.as_str())
        .unwrap_or(fallback_source_path);
    let is_roll_candidate = touches_consumed_paths(&raw.changed_paths, manifest_file, source_path);
    Ok(CommitMetadata {
        revision: raw.revision,
        author: raw.author,
        commit_timestamp: raw.timestamp,
        message_lines: raw.message_lines,
        manifest,
        is_roll_candidate,
    })
}

/// Whether any changed path is the manifest file or lies under the consumed
/// subtree. An empty subtree means the whole repository is consumed.
pub fn touches_consumed_paths(changed: &[String], manifest_file: &str, source_path: &str) -> bool {
    let subtree = source_path.trim_matches('/');
    changed.iter().any(|p| {
        p == manifest_file
            || subtree.is_empty()
            || p == subtree
            || p.strip_prefix(subtree)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}
