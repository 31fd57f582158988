//! Subprocess execution of the oracle.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use autoroll_core::{Manifest, Oracle, OracleMode, OracleOutcome, RollError, RollResult};
use tokio::process::Command;
use tracing::debug;

use crate::invocation::OracleInvocation;

/// Environment variable telling the oracle which mode it runs in.
pub const MODE_ENV: &str = "AUTOROLL_ORACLE_MODE";

/// Failures that prevent the oracle from producing a verdict.
#[derive(Debug, thiserror::Error)]
pub enum OracleRunError {
    #[error("oracle command is empty")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("oracle timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("failed to collect oracle output: {0}")]
    Wait(#[from] std::io::Error),
}

/// Result of one oracle process.
#[derive(Debug, Clone)]
pub struct OracleRun {
    pub mode: OracleMode,

    /// Exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,
}

impl OracleRun {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Verdict with stdout and stderr concatenated.
    pub fn into_outcome(self) -> OracleOutcome {
        let mut output = self.stdout;
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        OracleOutcome::new(self.exit_code, output)
    }
}

/// Oracle that runs a configured command in the repository root.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    invocation: OracleInvocation,
}

impl CommandOracle {
    pub fn new(invocation: OracleInvocation) -> Self {
        Self { invocation }
    }

    pub fn invocation(&self) -> &OracleInvocation {
        &self.invocation
    }

    /// Run the command for `mode` and capture its output.
    pub async fn execute(&self, mode: OracleMode) -> Result<OracleRun, OracleRunError> {
        let start = Instant::now();
        let argv = self.invocation.argv(mode);
        let (exe, args) = argv.split_first().ok_or(OracleRunError::EmptyCommand)?;

        debug!(mode = %mode, argv = ?argv, "spawning oracle");
        let child = Command::new(exe)
            .args(args)
            .current_dir(&self.invocation.workdir)
            .env(MODE_ENV, mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OracleRunError::Spawn {
                program: exe.clone(),
                source,
            })?;

        let output = match self.invocation.timeout() {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| OracleRunError::Timeout {
                    secs: self.invocation.timeout_secs,
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(OracleRun {
            mode,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn run(&self, mode: OracleMode, _manifest: &Manifest) -> RollResult<OracleOutcome> {
        let run = self
            .execute(mode)
            .await
            .map_err(|e| RollError::Oracle(e.to_string()))?;
        debug!(mode = %mode, exit_code = run.exit_code, duration_ms = run.duration_ms, "oracle finished");
        Ok(run.into_outcome())
    }
}
