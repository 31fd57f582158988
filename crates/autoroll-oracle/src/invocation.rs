//! How the oracle command is invoked in each mode.

use std::path::PathBuf;
use std::time::Duration;

use autoroll_core::{OracleMode, RollerConfig};
use serde::{Deserialize, Serialize};

/// Command line and environment of an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleInvocation {
    /// Executable followed by its fixed arguments.
    pub command: Vec<String>,

    /// Arguments appended in check mode.
    pub check_args: Vec<String>,

    /// Arguments appended in train mode.
    pub train_args: Vec<String>,

    /// Working directory (the consuming repository's root).
    pub workdir: PathBuf,

    /// Timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl OracleInvocation {
    /// An invocation with no mode arguments and no timeout.
    pub fn custom(command: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            check_args: Vec::new(),
            train_args: Vec::new(),
            workdir: workdir.into(),
            timeout_secs: 0,
        }
    }

    pub fn from_config(config: &RollerConfig) -> Self {
        Self {
            command: config.command.clone(),
            check_args: config.check_args.clone(),
            train_args: config.train_args.clone(),
            workdir: config.repo_root.clone(),
            timeout_secs: config.oracle_timeout_secs,
        }
    }

    pub fn with_mode_args(mut self, check: Vec<String>, train: Vec<String>) -> Self {
        self.check_args = check;
        self.train_args = train;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Full argv for `mode`.
    pub fn argv(&self, mode: OracleMode) -> Vec<String> {
        let extra = match mode {
            OracleMode::Check => &self.check_args,
            OracleMode::Train => &self.train_args,
        };
        self.command.iter().chain(extra).cloned().collect()
    }
}
