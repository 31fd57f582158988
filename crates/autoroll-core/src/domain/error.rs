//! Domain-level error taxonomy for the autoroller.

/// Errors produced while composing or validating a [`Manifest`](super::Manifest).
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest project id must not be empty")]
    EmptyProjectId,

    #[error("project {project} declares itself as a dependency")]
    SelfDependency { project: String },

    #[error("dependency {dep} of {project} is missing required field: {field}")]
    MissingDepField {
        project: String,
        dep: String,
        field: &'static str,
    },

    #[error("unsupported manifest api_version: {0}")]
    UnsupportedApiVersion(u32),

    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A cursor could not move to the requested position.
///
/// Both variants mean "the requested state is unreachable", which callers
/// must be able to tell apart from "nothing left to do".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("no roll candidates remain for {repo}")]
    Exhausted { repo: String },

    #[error("revision {revision} is not at or ahead of the cursor for {repo}")]
    Unreachable { repo: String, revision: String },
}

/// Errors that abort a whole roll attempt.
#[derive(Debug, thiserror::Error)]
pub enum RollError {
    #[error("vcs error: {0}")]
    Vcs(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("dependency cycle: {project} is declared as a dependency by {via}")]
    DependencyCycle { project: String, via: String },

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("restored manifest digest mismatch: expected {expected}, got {actual}")]
    RestoreMismatch { expected: String, actual: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for roll operations.
pub type RollResult<T> = std::result::Result<T, RollError>;
