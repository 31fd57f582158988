//! Autoroll Core Library
//!
//! Roll-candidate search and trivial/non-trivial selection for repositories
//! that pin other repositories at exact revisions.

pub mod candidate;
pub mod commit_list;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod git;
pub mod obs;
pub mod oracle;
pub mod reporting;
pub mod roll;
pub mod search;
pub mod selector;
pub mod store;
pub mod telemetry;
pub mod vcs;

pub use candidate::{find_conflicts, is_consistent, Changelist, Conflict, RollCandidate};
pub use commit_list::{CommitList, RollStep};
pub use config::{ConfigOverrides, RollerConfig};
pub use domain::{
    AutorollOptions, CommitMetadata, CommitSummary, CursorError, DepSpec, Manifest, ManifestError,
    RevisionChange, RollError, RollResult, MANIFEST_API_VERSION, ROLL_MARKER,
};
pub use git::GitBackend;
pub use oracle::{Oracle, OracleMode, OracleOutcome};
pub use reporting::{
    commit_message, render_roll_summary_md, write_roll_report_json, CandidateDiagnostics,
    RejectedSummary, RollReport,
};
pub use roll::run_attempt;
pub use search::{
    find_best_rev, get_roll_candidates, score_candidates, RevScore, SearchOutcome, StopReason,
};
pub use selector::{filter_rejected, OracleAttempt, RollSelector, SelectorState, Selection};
pub use store::{manifest_digest, FileManifestStore, ManifestStore};
pub use vcs::{load_commit_list, CommitSource, RawCommit, Vcs, VcsCommitSource};
