//! Domain models for the autoroller.
//!
//! Canonical definitions for the core entities:
//! - `Manifest` / `DepSpec`: pinned dependency specification of one repository
//! - `CommitMetadata`: immutable metadata of one observed dependency commit

pub mod commit;
pub mod error;
pub mod manifest;

pub use commit::{CommitMetadata, CommitSummary, ROLL_MARKER};
pub use error::{CursorError, ManifestError, RollError, RollResult};
pub use manifest::{AutorollOptions, DepSpec, Manifest, RevisionChange, MANIFEST_API_VERSION};
