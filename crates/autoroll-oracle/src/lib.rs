//! Autoroll Oracle - subprocess judge for materialized manifests
//!
//! Runs the consuming repository's own test command against the manifest
//! currently on disk:
//! - `check` mode verifies existing expectations
//! - `train` mode regenerates them
//!
//! A non-zero exit is a verdict. Spawn failures and timeouts are errors.

pub mod invocation;
pub mod runner;

pub use invocation::OracleInvocation;
pub use runner::{CommandOracle, OracleRun, OracleRunError, MODE_ENV};
