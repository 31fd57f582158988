//! In-memory fakes for the collaborator traits (testing only).
//!
//! Provides `MemoryVcs`, `MemoryManifestStore`, and `ScriptedOracle` that
//! satisfy the trait contracts without git, a filesystem, or subprocesses.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::domain::{Manifest, RollError, RollResult};
use crate::oracle::{Oracle, OracleMode, OracleOutcome};
use crate::store::ManifestStore;
use crate::vcs::{RawCommit, Vcs, DEFAULT_MANIFEST_PATH};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryVcs
// ---------------------------------------------------------------------------

/// Linear per-repository histories. The last pushed commit is the tip of
/// `main`.
#[derive(Debug, Default)]
pub struct MemoryVcs {
    histories: HashMap<String, Vec<RawCommit>>,
    files: HashMap<(String, String, String), Vec<u8>>,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit to `repo_id`. When `manifest` is given it is stored
    /// at the default manifest path for that revision.
    pub fn push(&mut self, repo_id: &str, commit: RawCommit, manifest: Option<&Manifest>) -> &mut Self {
        if let Some(m) = manifest {
            let bytes = serde_json::to_vec_pretty(m).unwrap_or_default();
            self.put_file(repo_id, &commit.revision, DEFAULT_MANIFEST_PATH, bytes);
        }
        self.histories
            .entry(repo_id.to_string())
            .or_default()
            .push(commit);
        self
    }

    /// Store arbitrary file content at a revision.
    pub fn put_file(&mut self, repo_id: &str, revision: &str, path: &str, bytes: Vec<u8>) -> &mut Self {
        self.files.insert(
            (repo_id.to_string(), revision.to_string(), path.to_string()),
            bytes,
        );
        self
    }

    fn history(&self, repo_id: &str) -> RollResult<&[RawCommit]> {
        self.histories
            .get(repo_id)
            .map(Vec::as_slice)
            .ok_or_else(|| RollError::Vcs(format!("unknown repository {repo_id}")))
    }

    fn index(&self, repo_id: &str, revision: &str) -> RollResult<usize> {
        self.history(repo_id)?
            .iter()
            .position(|c| c.revision == revision)
            .ok_or_else(|| RollError::Vcs(format!("unknown revision {revision} in {repo_id}")))
    }
}

/// A commit that changes the default manifest file, so it is a roll candidate.
pub fn manifest_commit(revision: &str, timestamp: i64, message: &str) -> RawCommit {
    RawCommit {
        revision: revision.to_string(),
        author: "dev@example.com".to_string(),
        timestamp,
        message_lines: message.lines().map(str::to_string).collect(),
        changed_paths: vec![DEFAULT_MANIFEST_PATH.to_string()],
    }
}

impl Vcs for MemoryVcs {
    fn resolve_ref(&self, repo_id: &str, _url: &str, reference: &str) -> RollResult<String> {
        let history = self.history(repo_id)?;
        if reference == "main" {
            return history
                .last()
                .map(|c| c.revision.clone())
                .ok_or_else(|| RollError::Vcs(format!("{repo_id} has no commits")));
        }
        self.index(repo_id, reference)
            .map(|i| history[i].revision.clone())
    }

    fn log_range(&self, repo_id: &str, _url: &str, from: &str, to: &str) -> RollResult<Vec<RawCommit>> {
        let (f, t) = (self.index(repo_id, from)?, self.index(repo_id, to)?);
        if t < f {
            return Err(RollError::Vcs(format!("{to} is not a descendant of {from}")));
        }
        Ok(self.history(repo_id)?[f + 1..=t].to_vec())
    }

    fn describe(&self, repo_id: &str, _url: &str, revision: &str) -> RollResult<RawCommit> {
        let i = self.index(repo_id, revision)?;
        Ok(self.history(repo_id)?[i].clone())
    }

    fn read_file(&self, repo_id: &str, _url: &str, revision: &str, path: &str) -> RollResult<Option<Vec<u8>>> {
        self.index(repo_id, revision)?;
        Ok(self
            .files
            .get(&(repo_id.to_string(), revision.to_string(), path.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryManifestStore
// ---------------------------------------------------------------------------

/// Manifest bytes held in memory, with a write counter.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    bytes: Mutex<Vec<u8>>,
    writes: Mutex<usize>,
    fail_on_write: Option<usize>,
}

impl MemoryManifestStore {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
            writes: Mutex::new(0),
            fail_on_write: None,
        }
    }

    /// Make the `n`th `write_raw` call (1-based) fail without writing.
    pub fn failing_on_write(mut self, n: usize) -> Self {
        self.fail_on_write = Some(n);
        self
    }

    pub fn with_manifest(manifest: &Manifest) -> RollResult<Self> {
        Ok(Self::from_bytes(manifest.to_json_pretty()?.into_bytes()))
    }

    /// Number of `write_raw` calls so far.
    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }
}

impl ManifestStore for MemoryManifestStore {
    fn read_raw(&self) -> RollResult<Vec<u8>> {
        Ok(lock(&self.bytes).clone())
    }

    fn write_raw(&self, bytes: &[u8]) -> RollResult<()> {
        let mut writes = lock(&self.writes);
        *writes += 1;
        if self.fail_on_write == Some(*writes) {
            return Err(RollError::Io(std::io::Error::other("injected write failure")));
        }
        *lock(&self.bytes) = bytes.to_vec();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedOracle
// ---------------------------------------------------------------------------

type Script = dyn Fn(OracleMode, &Manifest) -> RollResult<i32> + Send + Sync;

/// Oracle whose verdict is computed by a closure over the mode and the
/// materialized manifest. Every call is recorded.
pub struct ScriptedOracle {
    script: Box<Script>,
    calls: Mutex<Vec<(OracleMode, BTreeMap<String, String>)>>,
}

impl ScriptedOracle {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(OracleMode, &Manifest) -> RollResult<i32> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always exits 0.
    pub fn passing() -> Self {
        Self::new(|_, _| Ok(0))
    }

    /// Always exits 1.
    pub fn failing() -> Self {
        Self::new(|_, _| Ok(1))
    }

    /// `(mode, dep revisions)` of every invocation, in order.
    pub fn calls(&self) -> Vec<(OracleMode, BTreeMap<String, String>)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn run(&self, mode: OracleMode, manifest: &Manifest) -> RollResult<OracleOutcome> {
        lock(&self.calls).push((mode, manifest.revisions()));
        let code = (self.script)(mode, manifest)?;
        Ok(OracleOutcome::new(code, format!("{mode}: exit {code}")))
    }
}
