//! Immutable per-commit metadata observed in a dependency's history.

use serde::{Deserialize, Serialize};

use super::manifest::{DepSpec, Manifest};

/// First-line prefix of commits authored by the autoroller itself.
pub const ROLL_MARKER: &str = "Roll dependencies";

/// One observed commit of a tracked repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMetadata {
    /// Opaque VCS revision token.
    pub revision: String,
    pub author: String,
    /// Seconds since the Unix epoch.
    pub commit_timestamp: i64,
    pub message_lines: Vec<String>,
    /// The repository's manifest at this revision; `None` if it could not be
    /// parsed at this point in history.
    pub manifest: Option<Manifest>,
    /// Whether this commit touched the manifest or the declared subtree.
    pub is_roll_candidate: bool,
}

impl CommitMetadata {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            author: String::new(),
            commit_timestamp: 0,
            message_lines: Vec::new(),
            manifest: None,
            is_roll_candidate: true,
        }
    }

    pub fn authored_by(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.commit_timestamp = timestamp;
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message_lines = message.lines().map(str::to_string).collect();
        self
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn roll_candidate(mut self, candidate: bool) -> Self {
        self.is_roll_candidate = candidate;
        self
    }

    pub fn first_line(&self) -> &str {
        self.message_lines.first().map(String::as_str).unwrap_or("")
    }

    /// Whether this commit was authored by the autoroller.
    pub fn is_roll_commit(&self) -> bool {
        self.first_line().starts_with(ROLL_MARKER)
    }

    pub fn short_revision(&self) -> &str {
        let end = self
            .revision
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.revision.len());
        &self.revision[..end]
    }

    /// Dependencies declared at this revision. Empty when the manifest is
    /// unparsable.
    pub fn deps(&self) -> impl Iterator<Item = (&String, &DepSpec)> {
        self.manifest.iter().flat_map(|m| m.deps.iter())
    }

    /// Revision of `dep_id` declared at this commit, if any.
    pub fn declared_revision(&self, dep_id: &str) -> Option<&str> {
        self.manifest.as_ref().and_then(|m| m.revision_of(dep_id))
    }

    pub fn summary(&self) -> CommitSummary {
        CommitSummary {
            revision: self.revision.clone(),
            author: self.author.clone(),
            commit_timestamp: self.commit_timestamp,
            message: self.first_line().to_string(),
        }
    }
}

/// Report-friendly view of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub revision: String,
    pub author: String,
    pub commit_timestamp: i64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_marker_checks_first_line_only() {
        let roll = CommitMetadata::new("a").message("Roll dependencies (trivial).\n\nbody");
        assert!(roll.is_roll_commit());

        let human = CommitMetadata::new("b").message("Fix thing\n\nRoll dependencies later");
        assert!(!human.is_roll_commit());

        let empty = CommitMetadata::new("c");
        assert!(!empty.is_roll_commit());
        assert_eq!(empty.first_line(), "");
    }

    #[test]
    fn test_deps_empty_without_manifest() {
        let c = CommitMetadata::new("a");
        assert_eq!(c.deps().count(), 0);
        assert!(c.declared_revision("x").is_none());
    }

    #[test]
    fn test_declared_revision_reads_manifest() {
        let m = Manifest::new("b").with_dep("a", DepSpec::new("u", "a1"));
        let c = CommitMetadata::new("b1").with_manifest(m);
        assert_eq!(c.declared_revision("a"), Some("a1"));
        assert_eq!(c.deps().count(), 1);
    }

    #[test]
    fn test_short_revision() {
        let c = CommitMetadata::new("0123456789abcdef0123");
        assert_eq!(c.short_revision(), "0123456789ab");
        assert_eq!(CommitMetadata::new("abc").short_revision(), "abc");
    }
}
