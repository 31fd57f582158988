//! Pinned dependency manifest for one repository.
//!
//! A [`Manifest`] names the project, the subtree of the repository that
//! matters to consumers, and one [`DepSpec`] per dependency pinned at an
//! exact revision. Dependencies are kept in a `BTreeMap` so that rendering
//! is deterministic and a manifest written back to disk is byte-stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ManifestError;

/// Manifest schema version understood by this crate.
pub const MANIFEST_API_VERSION: u32 = 1;

fn default_api_version() -> u32 {
    MANIFEST_API_VERSION
}

fn default_branch() -> String {
    "main".to_string()
}

/// One pinned dependency entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepSpec {
    /// Source locator (clone URL or local path).
    pub url: String,
    /// Branch (or any ref) tracked for new revisions.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Exact pinned revision.
    pub revision: String,
    /// Location of the dependency's own manifest inside its repository, when
    /// it differs from the default manifest path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_override: Option<String>,
    /// Keys this crate does not interpret, written back unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DepSpec {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: default_branch(),
            revision: revision.into(),
            path_override: None,
            extra: Map::new(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_path_override(mut self, path: impl Into<String>) -> Self {
        self.path_override = Some(path.into());
        self
    }

    /// Same entry, pinned at `revision`.
    pub fn pinned_at(&self, revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            ..self.clone()
        }
    }
}

/// Per-repository roll options carried in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutorollOptions {
    /// When set and non-empty, this repository must not be rolled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_reason: Option<String>,
}

impl AutorollOptions {
    pub fn is_empty(&self) -> bool {
        self.disable_reason.is_none()
    }

    /// The disable reason, if rolling is disabled.
    pub fn disabled(&self) -> Option<&str> {
        self.disable_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}

/// Change of one dependency pin between two manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// The pinned dependency specification of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    pub project_id: String,
    /// Subtree of the repository consumed by dependents. Empty means the
    /// whole repository.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_path: String,
    #[serde(default)]
    pub deps: BTreeMap<String, DepSpec>,
    #[serde(default, skip_serializing_if = "AutorollOptions::is_empty")]
    pub autoroll_options: AutorollOptions,
    /// Keys this crate does not interpret. Kept so that a materialized
    /// candidate carries everything the manifest on disk did.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Create a manifest with no dependencies.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            api_version: MANIFEST_API_VERSION,
            project_id: project_id.into(),
            source_path: String::new(),
            deps: BTreeMap::new(),
            autoroll_options: AutorollOptions::default(),
            extra: Map::new(),
        }
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Add (or replace) a dependency entry.
    pub fn with_dep(mut self, dep_id: impl Into<String>, spec: DepSpec) -> Self {
        self.deps.insert(dep_id.into(), spec);
        self
    }

    /// Parse and validate a manifest from its JSON encoding.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Pretty JSON encoding with a trailing newline.
    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Check structural invariants.
    ///
    /// A project declaring itself as a dependency is always fatal.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.api_version != MANIFEST_API_VERSION {
            return Err(ManifestError::UnsupportedApiVersion(self.api_version));
        }
        if self.project_id.trim().is_empty() {
            return Err(ManifestError::EmptyProjectId);
        }
        for (dep_id, spec) in &self.deps {
            if dep_id == &self.project_id {
                return Err(ManifestError::SelfDependency {
                    project: self.project_id.clone(),
                });
            }
            if spec.url.trim().is_empty() {
                return Err(self.missing(dep_id, "url"));
            }
            if spec.revision.trim().is_empty() {
                return Err(self.missing(dep_id, "revision"));
            }
        }
        Ok(())
    }

    fn missing(&self, dep_id: &str, field: &'static str) -> ManifestError {
        ManifestError::MissingDepField {
            project: self.project_id.clone(),
            dep: dep_id.to_string(),
            field,
        }
    }

    /// Pinned revision of `dep_id`, if declared.
    pub fn revision_of(&self, dep_id: &str) -> Option<&str> {
        self.deps.get(dep_id).map(|d| d.revision.as_str())
    }

    /// `dep_id -> revision` for every declared dependency.
    pub fn revisions(&self) -> BTreeMap<String, String> {
        self.deps
            .iter()
            .map(|(id, d)| (id.clone(), d.revision.clone()))
            .collect()
    }

    /// Copy of this manifest with the dependency set replaced.
    pub fn with_deps(&self, deps: BTreeMap<String, DepSpec>) -> Self {
        Self {
            deps,
            ..self.clone()
        }
    }

    /// Copy of this manifest with pins updated from `revisions`. Entries in
    /// `revisions` that are not declared here are ignored.
    pub fn with_revisions(&self, revisions: &BTreeMap<String, String>) -> Self {
        let deps = self
            .deps
            .iter()
            .map(|(id, spec)| match revisions.get(id) {
                Some(rev) => (id.clone(), spec.pinned_at(rev.clone())),
                None => (id.clone(), spec.clone()),
            })
            .collect();
        self.with_deps(deps)
    }

    /// Per-dependency pin changes from `self` to `other`. Unchanged
    /// dependencies are omitted.
    pub fn diff(&self, other: &Manifest) -> BTreeMap<String, RevisionChange> {
        let mut out = BTreeMap::new();
        for (id, spec) in &self.deps {
            let new = other.revision_of(id);
            if new != Some(spec.revision.as_str()) {
                out.insert(
                    id.clone(),
                    RevisionChange {
                        old: Some(spec.revision.clone()),
                        new: new.map(str::to_string),
                    },
                );
            }
        }
        for (id, spec) in &other.deps {
            if !self.deps.contains_key(id) {
                out.insert(
                    id.clone(),
                    RevisionChange {
                        old: None,
                        new: Some(spec.revision.clone()),
                    },
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest::new("build")
            .with_source_path("recipes")
            .with_dep("recipe_engine", DepSpec::new("https://example.com/re.git", "aaa"))
            .with_dep("depot_tools", DepSpec::new("https://example.com/dt.git", "bbb"))
    }

    #[test]
    fn test_json_roundtrip_is_byte_stable() {
        let m = sample();
        let text = m.to_json_pretty().unwrap();
        let back = Manifest::from_json(text.as_bytes()).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.to_json_pretty().unwrap(), text);
    }

    #[test]
    fn test_defaults_applied_on_parse() {
        let raw = r#"{"project_id":"build","deps":{"re":{"url":"u","revision":"r"}}}"#;
        let m = Manifest::from_json(raw.as_bytes()).unwrap();
        assert_eq!(m.api_version, MANIFEST_API_VERSION);
        assert_eq!(m.deps["re"].branch, "main");
        assert!(m.source_path.is_empty());
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let m = Manifest::new("build").with_dep("build", DepSpec::new("u", "r"));
        assert!(matches!(
            m.validate(),
            Err(ManifestError::SelfDependency { .. })
        ));
    }

    #[test]
    fn test_missing_revision_is_rejected() {
        let m = Manifest::new("build").with_dep("re", DepSpec::new("u", ""));
        match m.validate() {
            Err(ManifestError::MissingDepField { dep, field, .. }) => {
                assert_eq!(dep, "re");
                assert_eq!(field, "revision");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_api_version_is_rejected() {
        let raw = r#"{"api_version":7,"project_id":"build"}"#;
        assert!(matches!(
            Manifest::from_json(raw.as_bytes()),
            Err(ManifestError::UnsupportedApiVersion(7))
        ));
    }

    #[test]
    fn test_with_revisions_ignores_unknown_ids() {
        let m = sample();
        let mut revs = BTreeMap::new();
        revs.insert("recipe_engine".to_string(), "ccc".to_string());
        revs.insert("unknown".to_string(), "zzz".to_string());
        let rolled = m.with_revisions(&revs);
        assert_eq!(rolled.revision_of("recipe_engine"), Some("ccc"));
        assert_eq!(rolled.revision_of("depot_tools"), Some("bbb"));
        assert!(rolled.revision_of("unknown").is_none());
    }

    #[test]
    fn test_diff_reports_changed_and_added() {
        let old = sample();
        let new = old
            .with_revisions(&BTreeMap::from([("depot_tools".to_string(), "b2".to_string())]))
            .with_dep("infra", DepSpec::new("u", "i1"));
        let diff = old.diff(&new);
        assert_eq!(diff.len(), 2);
        assert_eq!(diff["depot_tools"].old.as_deref(), Some("bbb"));
        assert_eq!(diff["depot_tools"].new.as_deref(), Some("b2"));
        assert_eq!(diff["infra"].old, None);
        assert!(!diff.contains_key("recipe_engine"));
    }

    #[test]
    fn test_disable_reason_blank_is_not_disabled() {
        let mut opts = AutorollOptions::default();
        assert!(opts.disabled().is_none());
        opts.disable_reason = Some("  ".to_string());
        assert!(opts.disabled().is_none());
        opts.disable_reason = Some("tree closed".to_string());
        assert_eq!(opts.disabled(), Some("tree closed"));
    }

    #[test]
    fn test_unknown_keys_survive_a_roll() {
        let text = br#"{
            "project_id": "build",
            "recipes_path": "recipes",
            "deps": {
                "a": {"url": "u", "revision": "a0", "repo_type": "GITILES"}
            }
        }"#;
        let m = Manifest::from_json(text).unwrap();
        assert_eq!(m.extra["recipes_path"], "recipes");
        assert_eq!(m.deps["a"].extra["repo_type"], "GITILES");

        let rolled = m.with_revisions(&[("a".to_string(), "a1".to_string())].into());
        let reparsed = Manifest::from_json(rolled.to_json_pretty().unwrap().as_bytes()).unwrap();
        assert_eq!(reparsed.revision_of("a"), Some("a1"));
        assert_eq!(reparsed.extra, m.extra);
        assert_eq!(reparsed.deps["a"].extra, m.deps["a"].extra);
    }

    #[test]
    fn test_known_manifest_renders_without_extra_keys() {
        let text = sample().to_json_pretty().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let mut keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["api_version", "deps", "project_id", "source_path"]);
    }
}
