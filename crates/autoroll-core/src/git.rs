//! Git backend for the [`Vcs`] seam.
//!
//! Every tracked repository is kept as a bare mirror under a checkout cache
//! directory. A mirror is cloned on first use and fetched once per backend
//! instance; all queries then run against the local mirror.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Mutex, PoisonError};

use regex::Regex;
use tracing::debug;

use crate::domain::{RollError, RollResult};
use crate::vcs::{RawCommit, Vcs};

/// Full SHA-1 or SHA-256 object name. Abbreviations are rejected so that a
/// pinned revision compares equal to what git reports for it.
const REVISION_PATTERN: &str = r"^([0-9a-f]{40}|[0-9a-f]{64})$";

/// Reject anything git could mistake for an option.
fn check_ref(reference: &str) -> RollResult<()> {
    if reference.is_empty() || reference.starts_with('-') || reference.contains("..") {
        return Err(RollError::Vcs(format!("invalid ref: {reference:?}")));
    }
    Ok(())
}

fn check_revision(revision: &str) -> RollResult<()> {
    let re = Regex::new(REVISION_PATTERN).map_err(|e| RollError::Vcs(e.to_string()))?;
    if !re.is_match(revision) {
        return Err(RollError::Vcs(format!("invalid revision: {revision:?}")));
    }
    Ok(())
}

/// [`Vcs`] over bare git mirrors.
#[derive(Debug)]
pub struct GitBackend {
    checkout_dir: PathBuf,
    fetched: Mutex<HashSet<String>>,
}

impl GitBackend {
    pub fn new(checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkout_dir: checkout_dir.into(),
            fetched: Mutex::new(HashSet::new()),
        }
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    fn mirror_path(&self, repo_id: &str) -> PathBuf {
        let name: String = repo_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.checkout_dir.join(format!("{name}.git"))
    }

    /// Clone or refresh the mirror of `repo_id`, at most once per instance.
    fn mirror(&self, repo_id: &str, url: &str) -> RollResult<PathBuf> {
        let path = self.mirror_path(repo_id);
        let mut fetched = self.fetched.lock().unwrap_or_else(PoisonError::into_inner);
        if fetched.contains(repo_id) {
            return Ok(path);
        }
        if path.exists() {
            debug!(repo = %repo_id, "fetching mirror");
            run_git(&path, &["fetch", "--prune", "--quiet", "origin"])?;
        } else {
            debug!(repo = %repo_id, url = %url, "cloning mirror");
            std::fs::create_dir_all(&self.checkout_dir)?;
            let target = path.to_string_lossy().into_owned();
            run_git(
                Path::new("."),
                &["clone", "--mirror", "--quiet", "--", url, &target],
            )?;
        }
        fetched.insert(repo_id.to_string());
        Ok(path)
    }

    /// Paths changed against the first parent; merges included.
    fn changed_paths(&self, git_dir: &Path, revision: &str) -> RollResult<Vec<String>> {
        let out = run_git(git_dir, &["rev-list", "--parents", "-n", "1", revision])?;
        let parents = String::from_utf8_lossy(&out);
        let out = match parents.split_whitespace().nth(1) {
            Some(first_parent) => run_git(
                git_dir,
                &["diff-tree", "--no-commit-id", "--name-only", "-r", first_parent, revision],
            )?,
            None => run_git(
                git_dir,
                &["diff-tree", "--no-commit-id", "--name-only", "-r", "--root", revision],
            )?,
        };
        Ok(lines(&out))
    }
}

impl Vcs for GitBackend {
    fn resolve_ref(&self, repo_id: &str, url: &str, reference: &str) -> RollResult<String> {
        check_ref(reference)?;
        let git_dir = self.mirror(repo_id, url)?;
        let spec = format!("{reference}^{{commit}}");
        let out = run_git(&git_dir, &["rev-parse", "--verify", "--quiet", &spec])?;
        let sha = String::from_utf8_lossy(&out).trim().to_string();
        if sha.is_empty() {
            return Err(RollError::Vcs(format!("{repo_id}: {reference} resolved to nothing")));
        }
        Ok(sha)
    }

    fn log_range(&self, repo_id: &str, url: &str, from: &str, to: &str) -> RollResult<Vec<RawCommit>> {
        check_revision(from)?;
        check_revision(to)?;
        let git_dir = self.mirror(repo_id, url)?;
        let range = format!("{from}..{to}");
        let out = run_git(&git_dir, &["rev-list", "--first-parent", "--reverse", &range])?;
        lines(&out)
            .iter()
            .map(|rev| self.describe(repo_id, url, rev))
            .collect()
    }

    fn describe(&self, repo_id: &str, url: &str, revision: &str) -> RollResult<RawCommit> {
        check_revision(revision)?;
        let git_dir = self.mirror(repo_id, url)?;
        let out = run_git(
            &git_dir,
            &["show", "-s", "--format=%H%x00%ae%x00%ct%x00%B", revision],
        )?;
        let text = String::from_utf8_lossy(&out);
        let mut fields = text.splitn(4, '\0');
        let (Some(sha), Some(author), Some(ts), Some(body)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(RollError::Vcs(format!("{repo_id}: unexpected git show output for {revision}")));
        };
        let timestamp = ts
            .trim()
            .parse::<i64>()
            .map_err(|e| RollError::Vcs(format!("{repo_id}: bad commit timestamp {ts:?}: {e}")))?;
        let revision = sha.trim().to_string();
        let changed_paths = self.changed_paths(&git_dir, &revision)?;
        Ok(RawCommit {
            revision,
            author: author.to_string(),
            timestamp,
            message_lines: body.trim_end().lines().map(str::to_string).collect(),
            changed_paths,
        })
    }

    fn read_file(&self, repo_id: &str, url: &str, revision: &str, path: &str) -> RollResult<Option<Vec<u8>>> {
        check_revision(revision)?;
        let git_dir = self.mirror(repo_id, url)?;
        let object = format!("{revision}:{path}");
        let exists = git(&git_dir, &["cat-file", "-e", &object])?;
        if !exists.status.success() {
            return Ok(None);
        }
        run_git(&git_dir, &["show", &object]).map(Some)
    }
}

fn git(dir: &Path, args: &[&str]) -> RollResult<Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| RollError::Vcs(format!("failed to run git: {e}")))
}

/// Run git in `dir` and return stdout, failing on a non-zero exit.
fn run_git(dir: &Path, args: &[&str]) -> RollResult<Vec<u8>> {
    let output = git(dir, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RollError::Vcs(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

fn lines(out: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(out)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
