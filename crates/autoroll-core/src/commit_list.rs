//! Per-dependency commit history with a forward-only cursor.
//!
//! A [`CommitList`] holds the pinned (baseline) commit followed by every
//! commit after it up to the latest known revision, oldest first. The
//! cursor starts on the baseline and only ever moves forward.

use crate::domain::{CommitMetadata, CursorError, DepSpec};

/// The next roll-candidate commit after a cursor and how far away it is.
#[derive(Debug, Clone, Copy)]
pub struct RollStep<'a> {
    pub commit: &'a CommitMetadata,
    /// Number of positions the cursor would move to reach `commit`.
    pub movement_score: usize,
}

/// Ordered commit history of one tracked repository.
#[derive(Debug, Clone)]
pub struct CommitList {
    repo_id: String,
    dep: DepSpec,
    /// `commits[0]` is the baseline revision the search started from.
    commits: Vec<CommitMetadata>,
    cursor: usize,
}

impl CommitList {
    /// Build a list from the dependency entry it was loaded for, the pinned
    /// baseline commit, and the commits after it (oldest first).
    pub fn new(
        repo_id: impl Into<String>,
        dep: DepSpec,
        baseline: CommitMetadata,
        ahead: Vec<CommitMetadata>,
    ) -> Self {
        let mut commits = Vec::with_capacity(ahead.len() + 1);
        commits.push(baseline);
        commits.extend(ahead);
        Self {
            repo_id: repo_id.into(),
            dep,
            commits,
            cursor: 0,
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// The dependency entry pinned at the cursor's revision.
    pub fn pinned_spec(&self) -> DepSpec {
        self.dep.pinned_at(self.current().revision.clone())
    }

    pub fn current(&self) -> &CommitMetadata {
        &self.commits[self.cursor]
    }

    pub fn baseline(&self) -> &CommitMetadata {
        &self.commits[0]
    }

    pub fn latest(&self) -> &CommitMetadata {
        &self.commits[self.commits.len() - 1]
    }

    /// Cursor position; 0 is the baseline.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Commits strictly after the cursor.
    pub fn remaining(&self) -> &[CommitMetadata] {
        &self.commits[self.cursor + 1..]
    }

    /// The baseline through `revision`, inclusive. `None` if `revision` is
    /// not in this list.
    pub fn commits_through(&self, revision: &str) -> Option<&[CommitMetadata]> {
        self.index_of(revision).map(|idx| &self.commits[..=idx])
    }

    /// Next commit after the cursor that is a roll candidate.
    pub fn next_roll_candidate(&self) -> Option<RollStep<'_>> {
        self.remaining()
            .iter()
            .enumerate()
            .find(|(_, c)| c.is_roll_candidate)
            .map(|(i, commit)| RollStep {
                commit,
                movement_score: i + 1,
            })
    }

    /// Positions between the cursor and `revision`. A revision that is not
    /// at or ahead of the cursor costs one more than moving to the end.
    pub fn dist_to(&self, revision: &str) -> usize {
        self.commits[self.cursor..]
            .iter()
            .position(|c| c.revision == revision)
            .unwrap_or(self.unreachable_cost())
    }

    /// Positions this list must move until its manifest is compatible with
    /// `other_id` pinned at `revision`.
    ///
    /// A commit is compatible when its manifest either pins `other_id` at
    /// `revision` or does not depend on `other_id` at all. Commits with an
    /// unparsable manifest are never compatible.
    pub fn dist_compatible_with(&self, other_id: &str, revision: &str) -> usize {
        self.commits[self.cursor..]
            .iter()
            .position(|c| match &c.manifest {
                Some(m) => m.revision_of(other_id).map_or(true, |r| r == revision),
                None => false,
            })
            .unwrap_or(self.unreachable_cost())
    }

    fn unreachable_cost(&self) -> usize {
        self.commits.len() - self.cursor
    }

    /// Move the cursor to the next roll candidate.
    pub fn advance(&mut self) -> Result<&CommitMetadata, CursorError> {
        let step = self
            .next_roll_candidate()
            .map(|s| s.movement_score)
            .ok_or_else(|| CursorError::Exhausted {
                repo: self.repo_id.clone(),
            })?;
        self.cursor += step;
        Ok(self.current())
    }

    /// Move the cursor exactly to `revision`. Moving to the revision already
    /// under the cursor is a zero-step move; anything behind it or absent
    /// from the list is unreachable.
    pub fn advance_to(&mut self, revision: &str) -> Result<&CommitMetadata, CursorError> {
        let offset = self.commits[self.cursor..]
            .iter()
            .position(|c| c.revision == revision)
            .ok_or_else(|| CursorError::Unreachable {
                repo: self.repo_id.clone(),
                revision: revision.to_string(),
            })?;
        self.cursor += offset;
        Ok(self.current())
    }

    fn index_of(&self, revision: &str) -> Option<usize> {
        self.commits.iter().position(|c| c.revision == revision)
    }
}
