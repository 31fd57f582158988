//! Roller configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional JSON config file, `AUTOROLL_*` environment variables, and
//! command-line flags. The last two are resolved by the CLI and applied
//! through [`ConfigOverrides`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{RollError, RollResult};
use crate::vcs::DEFAULT_MANIFEST_PATH;

/// Default manifest cache directory, relative to the repository root.
pub const DEFAULT_CHECKOUT_DIR: &str = ".autoroll/checkouts";

/// Everything a roll attempt needs to know about its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollerConfig {
    /// Root of the consuming repository.
    pub repo_root: PathBuf,
    /// Manifest location relative to `repo_root`.
    pub manifest_path: String,
    /// Mirror cache location relative to `repo_root` (or absolute).
    pub checkout_dir: PathBuf,
    /// Oracle argv; the mode's extra arguments are appended.
    pub command: Vec<String>,
    pub check_args: Vec<String>,
    pub train_args: Vec<String>,
    /// 0 disables the timeout.
    pub oracle_timeout_secs: u64,
    /// Projects whose rejected candidates are reported. Empty means all.
    pub interested_projects: Vec<String>,
}

impl Default for RollerConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            manifest_path: DEFAULT_MANIFEST_PATH.to_string(),
            checkout_dir: PathBuf::from(DEFAULT_CHECKOUT_DIR),
            command: Vec::new(),
            check_args: vec!["test".to_string(), "run".to_string()],
            train_args: vec!["test".to_string(), "train".to_string()],
            oracle_timeout_secs: 0,
            interested_projects: Vec::new(),
        }
    }
}

impl RollerConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> RollResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn validate(&self) -> RollResult<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(RollError::Config("oracle command must not be empty".to_string()));
        }
        if self.manifest_path.trim().is_empty() {
            return Err(RollError::Config("manifest_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.repo_root.join(&self.manifest_path)
    }

    pub fn checkout_path(&self) -> PathBuf {
        self.repo_root.join(&self.checkout_dir)
    }

    pub fn oracle_timeout(&self) -> Option<Duration> {
        (self.oracle_timeout_secs > 0).then(|| Duration::from_secs(self.oracle_timeout_secs))
    }

    pub fn interested(&self) -> BTreeSet<String> {
        self.interested_projects.iter().cloned().collect()
    }

    /// Apply higher-precedence values on top of this config.
    pub fn with_overrides(mut self, o: ConfigOverrides) -> Self {
        if let Some(v) = o.repo_root {
            self.repo_root = v;
        }
        if let Some(v) = o.manifest_path {
            self.manifest_path = v;
        }
        if let Some(v) = o.checkout_dir {
            self.checkout_dir = v;
        }
        if let Some(v) = o.command {
            self.command = v;
        }
        if let Some(v) = o.oracle_timeout_secs {
            self.oracle_timeout_secs = v;
        }
        if let Some(v) = o.interested_projects {
            self.interested_projects = v;
        }
        self
    }
}

/// Values resolved from flags or the environment. `None` keeps the
/// underlying value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub repo_root: Option<PathBuf>,
    pub manifest_path: Option<String>,
    pub checkout_dir: Option<PathBuf>,
    pub command: Option<Vec<String>>,
    pub oracle_timeout_secs: Option<u64>,
    pub interested_projects: Option<Vec<String>>,
}
