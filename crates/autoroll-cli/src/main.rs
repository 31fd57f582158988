//! Autoroll - dependency roller CLI
//!
//! The `autoroll` command advances the pinned dependency revisions of a
//! repository to the newest consistent snapshot its tests accept.
//!
//! ## Commands
//!
//! - `roll`: search, try candidates with the oracle, and write the winner
//! - `candidates`: list the consistent and inconsistent snapshots only
//! - `check`: run the oracle once against the manifest as it is

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};

use autoroll_core::obs::RollSpan;
use autoroll_core::{
    get_roll_candidates, render_roll_summary_md, run_attempt, write_roll_report_json,
    ConfigOverrides, FileManifestStore, GitBackend, Manifest, ManifestStore, Oracle, OracleMode,
    RevisionChange, RollReport, RollerConfig, SearchOutcome, SelectorState, VcsCommitSource,
};
use autoroll_oracle::{CommandOracle, OracleInvocation};

#[derive(Parser)]
#[command(name = "autoroll")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Roll pinned dependencies to the newest revisions that pass", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file
    #[arg(short, long, global = true, env = "AUTOROLL_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    settings: SettingsArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Per-field settings; each one overrides the config file.
#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Root of the repository being rolled
    #[arg(long, global = true, env = "AUTOROLL_REPO_ROOT")]
    repo_root: Option<PathBuf>,

    /// Manifest path relative to the repository root
    #[arg(long, global = true, env = "AUTOROLL_MANIFEST_PATH")]
    manifest_path: Option<String>,

    /// Directory for mirrored dependency repositories
    #[arg(long, global = true, env = "AUTOROLL_CHECKOUT_DIR")]
    checkout_dir: Option<PathBuf>,

    /// Oracle command line, split on spaces
    #[arg(long, global = true, env = "AUTOROLL_ORACLE_COMMAND", value_delimiter = ' ')]
    oracle_command: Option<Vec<String>>,

    /// Oracle timeout in seconds (0 disables it)
    #[arg(long, global = true, env = "AUTOROLL_ORACLE_TIMEOUT")]
    oracle_timeout: Option<u64>,

    /// Comma-separated projects whose rejected candidates are reported
    #[arg(long, global = true, env = "AUTOROLL_INTERESTED_PROJECTS", value_delimiter = ',')]
    interested: Option<Vec<String>>,
}

impl SettingsArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            repo_root: self.repo_root,
            manifest_path: self.manifest_path,
            checkout_dir: self.checkout_dir,
            command: self.oracle_command,
            oracle_timeout_secs: self.oracle_timeout,
            interested_projects: self.interested,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Roll dependencies and write the winning manifest
    Roll {
        /// Write the JSON roll report to this path
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Output format for the summary on stdout
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List roll candidates without running the oracle
    Candidates {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run the oracle against the current manifest
    Check {
        /// Run in train mode instead of check mode
        #[arg(long)]
        train: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autoroll_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.settings.into_overrides())?;

    match cli.command {
        Commands::Roll { report, format } => cmd_roll(&config, report.as_deref(), format).await,
        Commands::Candidates { format } => cmd_candidates(&config, format),
        Commands::Check { train } => {
            let mode = if train {
                OracleMode::Train
            } else {
                OracleMode::Check
            };
            cmd_check(&config, mode).await
        }
    }
}

/// Defaults, then the config file, then environment and flags.
fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<RollerConfig> {
    let base = match path {
        Some(path) => RollerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RollerConfig::default(),
    };
    Ok(base.with_overrides(overrides))
}

fn commit_source(config: &RollerConfig) -> VcsCommitSource<GitBackend> {
    VcsCommitSource::new(GitBackend::new(config.checkout_path()))
        .with_manifest_path(config.manifest_path.clone())
}

/// Search, select, and report one roll attempt
async fn cmd_roll(config: &RollerConfig, report_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    config.validate().context("Invalid roller configuration")?;

    let store = FileManifestStore::new(config.manifest_file());
    let source = commit_source(config);
    let oracle = CommandOracle::new(OracleInvocation::from_config(config));

    let report = run_attempt(&store, &source, &oracle, &config.interested())
        .await
        .context("Roll attempt failed")?;

    if let Some(path) = report_path {
        write_roll_report_json(path, &report)?;
        info!(path = %path.display(), "wrote roll report");
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            print!("{}", render_roll_summary_md(&report));
            if let Some(message) = &report.commit_message {
                println!("\n{message}");
            }
        }
    }

    roll_verdict(&report)
}

/// Only a restored manifest is a failure; having nothing to roll is not.
fn roll_verdict(report: &RollReport) -> Result<()> {
    match report.state {
        Some(SelectorState::Restored) | Some(SelectorState::Failed) => {
            bail!("No roll candidate passed; the original manifest was restored")
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Serialize)]
struct CandidateView {
    index: usize,
    consistent: bool,
    changes: std::collections::BTreeMap<String, RevisionChange>,
    conflicts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CandidatesOutput {
    project_id: String,
    stop: String,
    steps: usize,
    good: Vec<CandidateView>,
    bad: Vec<CandidateView>,
}

impl CandidatesOutput {
    fn new(original: &Manifest, outcome: &SearchOutcome) -> Self {
        let view = |(index, c): (usize, &autoroll_core::RollCandidate)| CandidateView {
            index,
            consistent: c.is_consistent(),
            changes: original.diff(c.manifest()),
            conflicts: c
                .conflicts()
                .iter()
                .map(|x| {
                    format!(
                        "{} pins {} at {} but the snapshot has {}",
                        x.declared_by, x.dependency, x.declared, x.pinned
                    )
                })
                .collect(),
        };
        Self {
            project_id: original.project_id.clone(),
            stop: outcome.stop.to_string(),
            steps: outcome.steps,
            good: outcome.good.iter().enumerate().map(view).collect(),
            bad: outcome.bad.iter().enumerate().map(view).collect(),
        }
    }

    fn render_text(&self) -> String {
        let mut out = format!(
            "{}: {} good, {} bad after {} steps ({})\n",
            self.project_id,
            self.good.len(),
            self.bad.len(),
            self.steps,
            self.stop
        );
        for (label, views) in [("good", &self.good), ("bad", &self.bad)] {
            for v in views {
                let changes: Vec<String> = v
                    .changes
                    .iter()
                    .map(|(dep, c)| {
                        format!(
                            "{}={}",
                            dep,
                            c.new.as_deref().unwrap_or("(none)")
                        )
                    })
                    .collect();
                out.push_str(&format!("  {label} #{}: {}\n", v.index, changes.join(" ")));
                for conflict in &v.conflicts {
                    out.push_str(&format!("    conflict: {conflict}\n"));
                }
            }
        }
        out
    }
}

/// Enumerate roll candidates without touching the manifest
fn cmd_candidates(config: &RollerConfig, format: OutputFormat) -> Result<()> {
    let store = FileManifestStore::new(config.manifest_file());
    let original = store
        .load()
        .with_context(|| format!("Failed to load manifest {}", config.manifest_file().display()))?;

    let _span = RollSpan::enter(&format!("candidates-{}", original.project_id));
    let outcome = get_roll_candidates(&original, &commit_source(config))
        .context("Candidate search failed")?;
    let output = CandidatesOutput::new(&original, &outcome);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => print!("{}", output.render_text()),
    }
    Ok(())
}

/// Run the oracle once against the manifest on disk
async fn cmd_check(config: &RollerConfig, mode: OracleMode) -> Result<()> {
    config.validate().context("Invalid roller configuration")?;

    let manifest = FileManifestStore::new(config.manifest_file())
        .load()
        .context("Failed to load manifest")?;
    let oracle = CommandOracle::new(OracleInvocation::from_config(config));
    let outcome = oracle
        .run(mode, &manifest)
        .await
        .context("Failed to run oracle")?;

    print!("{}", outcome.output);
    println!("Oracle ({mode}) exit code: {}", outcome.exit_code);
    if !outcome.passed() {
        bail!("Oracle failed in {mode} mode");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoroll_core::{DepSpec, RollCandidate, StopReason};
    use clap::CommandFactory;
    use std::collections::BTreeMap;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_roll_with_overrides() {
        let cli = Cli::try_parse_from([
            "autoroll",
            "roll",
            "--report",
            "out/report.json",
            "--oracle-command",
            "./recipes.py --package infra/config/recipes.cfg",
            "--interested",
            "build,recipe_engine",
            "--oracle-timeout",
            "30",
        ])
        .unwrap();

        match &cli.command {
            Commands::Roll { report, format } => {
                assert_eq!(report.as_deref(), Some(Path::new("out/report.json")));
                assert_eq!(*format, OutputFormat::Text);
            }
            _ => panic!("expected roll"),
        }

        let overrides = cli.settings.into_overrides();
        assert_eq!(
            overrides.command,
            Some(vec![
                "./recipes.py".to_string(),
                "--package".to_string(),
                "infra/config/recipes.cfg".to_string(),
            ])
        );
        assert_eq!(
            overrides.interested_projects,
            Some(vec!["build".to_string(), "recipe_engine".to_string()])
        );
        assert_eq!(overrides.oracle_timeout_secs, Some(30));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autoroll.json");
        std::fs::write(
            &path,
            r#"{"command": ["./run_tests"], "oracle_timeout_secs": 5, "manifest_path": "deps.json"}"#,
        )
        .unwrap();

        let overrides = ConfigOverrides {
            oracle_timeout_secs: Some(60),
            ..Default::default()
        };
        let cfg = load_config(Some(&path), overrides).unwrap();
        assert_eq!(cfg.command, vec!["./run_tests"]);
        assert_eq!(cfg.manifest_path, "deps.json");
        assert_eq!(cfg.oracle_timeout_secs, 60);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let err = load_config(Some(Path::new("/nonexistent/autoroll.json")), ConfigOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_candidates_output_lists_changes_and_conflicts() {
        let original = Manifest::new("build").with_dep("a", DepSpec::new("u", "a0"));
        let good = RollCandidate::new(
            Manifest::new("build").with_dep("a", DepSpec::new("u", "a1")),
            vec![],
        );
        let outcome = SearchOutcome {
            good: vec![good],
            bad: vec![],
            stop: StopReason::Exhausted,
            steps: 1,
            repos: BTreeMap::new(),
        };

        let output = CandidatesOutput::new(&original, &outcome);
        assert_eq!(output.good.len(), 1);
        assert!(output.good[0].consistent);
        assert_eq!(output.good[0].changes["a"].new.as_deref(), Some("a1"));

        let text = output.render_text();
        assert!(text.contains("1 good, 0 bad"));
        assert!(text.contains("good #0: a=a1"));
    }

    #[tokio::test]
    async fn test_check_runs_oracle_in_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileManifestStore::new(dir.path().join("infra/config/deps.json"));
        store.store(&Manifest::new("build")).unwrap();

        let pass = RollerConfig {
            repo_root: dir.path().to_path_buf(),
            command: vec!["test".to_string(), "-f".to_string(), "infra/config/deps.json".to_string()],
            check_args: vec![],
            train_args: vec![],
            ..Default::default()
        };
        assert!(cmd_check(&pass, OracleMode::Check).await.is_ok());

        let fail = RollerConfig {
            command: vec!["false".to_string()],
            ..pass
        };
        assert!(cmd_check(&fail, OracleMode::Train).await.is_err());
    }
}
