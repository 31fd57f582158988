//! The external judge of a materialized manifest.
//!
//! An oracle runs the consuming repository's checks against whatever
//! manifest is currently on disk. A non-zero exit code is a verdict, not an
//! error; `Err` is reserved for invocations that could not run at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Manifest, RollResult};

/// How the oracle is asked to judge the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleMode {
    /// Verify against existing expectations without changing them.
    Check,
    /// Regenerate expectations, succeeding if that is possible.
    Train,
}

impl OracleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleMode::Check => "check",
            OracleMode::Train => "train",
        }
    }
}

impl std::fmt::Display for OracleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit code recorded for an invocation that could not run.
pub const UNRUNNABLE_EXIT_CODE: i32 = -1;

/// Verdict of one oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleOutcome {
    pub exit_code: i32,
    /// Captured stdout followed by stderr.
    pub output: String,
}

impl OracleOutcome {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Outcome recorded when the oracle itself failed to run.
    pub fn unrunnable(reason: impl std::fmt::Display) -> Self {
        Self::new(UNRUNNABLE_EXIT_CODE, reason.to_string())
    }
}

/// Runs checks against the manifest currently materialized on disk.
///
/// `manifest` is the parsed form of what was just written, for oracles that
/// want to inspect it without re-reading the file.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn run(&self, mode: OracleMode, manifest: &Manifest) -> RollResult<OracleOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&OracleMode::Train).unwrap(), "\"train\"");
        assert_eq!(OracleMode::Check.to_string(), "check");
    }

    #[test]
    fn test_unrunnable_outcome_fails() {
        let o = OracleOutcome::unrunnable("timed out after 5s");
        assert!(!o.passed());
        assert_eq!(o.exit_code, UNRUNNABLE_EXIT_CODE);
        assert!(o.output.contains("timed out"));
    }
}
