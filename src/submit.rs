//! Command execution and cluster submission.
//!
//! The [`Runner`] trait is the seam between command construction and
//! command execution: the dispatch stage builds argv vectors, and a runner
//! carries them out. The production implementation shells out with
//! [`std::process::Command`]; tests substitute a recording mock.
//!
//! [`Submitter`] layers the execution policy on top of a runner:
//!
//! - **Direct mode** runs each command to completion, in order.
//! - **Cluster mode** wraps each command with `fsl_sub`, passing resource
//!   requests and job dependencies, and returns the scheduler's job ID so
//!   later steps can depend on earlier ones.
//! - **Dry-run mode** prints what would run and executes nothing.
//!
//! The job ID is recovered from the submitter's stdout as a structured
//! integer token rather than by substring matching, so a change in the
//! submitter's chatter fails loudly instead of yielding a wrong ID.

use std::fmt;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ClusterConfig;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot execute an empty command")]
    EmptyCommand,
    #[error("{program} failed with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not parse a job ID from submitter output: {0:?}")]
    JobId(String),
}

/// A cluster scheduler job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Trait for command execution backends.
///
/// Implementations run one argv to completion and return its stdout.
pub trait Runner {
    fn run(&self, argv: &[String]) -> Result<String, SubmitError>;
}

/// Production runner: executes the argv as a child process.
pub struct ProcessRunner;

impl Runner for ProcessRunner {
    fn run(&self, argv: &[String]) -> Result<String, SubmitError> {
        let (program, args) = argv.split_first().ok_or(SubmitError::EmptyCommand)?;
        debug!(command = %argv.join(" "), "executing");
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(SubmitError::CommandFailed {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(stdout = %stdout.trim_end(), "command finished");
        Ok(stdout)
    }
}

/// Execution policy: direct, cluster-wrapped, or dry-run.
pub struct Submitter<'a> {
    runner: &'a dyn Runner,
    cluster: Option<&'a ClusterConfig>,
    dry_run: bool,
}

impl<'a> Submitter<'a> {
    pub fn new(runner: &'a dyn Runner, cluster: Option<&'a ClusterConfig>, dry_run: bool) -> Self {
        Self {
            runner,
            cluster,
            dry_run,
        }
    }

    /// Whether commands are wrapped for cluster submission.
    pub fn cluster_mode(&self) -> bool {
        self.cluster.is_some()
    }

    /// Submit one command with the configured cluster resources.
    ///
    /// Returns the scheduler job ID in cluster mode, `None` in direct or
    /// dry-run mode.
    pub fn submit(&self, argv: &[String], deps: &[JobId]) -> Result<Option<JobId>, SubmitError> {
        let (minutes, ram_mb) = self
            .cluster
            .map(|c| (c.minutes, c.ram_mb))
            .unwrap_or_default();
        self.submit_with_resources(argv, deps, minutes, ram_mb)
    }

    /// Submit one command with explicit resource requests, overriding the
    /// configured cluster defaults (MRIQC needs this).
    pub fn submit_with_resources(
        &self,
        argv: &[String],
        deps: &[JobId],
        minutes: u32,
        ram_mb: u32,
    ) -> Result<Option<JobId>, SubmitError> {
        let command = match self.cluster {
            Some(_) => wrap_cluster(argv, minutes, ram_mb, deps),
            None => argv.to_vec(),
        };

        if self.dry_run {
            info!(command = %command.join(" "), "dry run");
            println!("{}", command.join(" "));
            return Ok(None);
        }

        info!(command = %command.join(" "), "submitting");
        let stdout = self.runner.run(&command)?;
        if self.cluster.is_some() {
            parse_job_id(&stdout).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Wrap an argv for cluster submission via `fsl_sub`.
fn wrap_cluster(argv: &[String], minutes: u32, ram_mb: u32, deps: &[JobId]) -> Vec<String> {
    let mut wrapped = vec![
        "fsl_sub".to_string(),
        "-T".to_string(),
        minutes.to_string(),
        "-R".to_string(),
        ram_mb.to_string(),
    ];
    if !deps.is_empty() {
        let joined = deps
            .iter()
            .map(JobId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        wrapped.push("-j".to_string());
        wrapped.push(joined);
    }
    wrapped.extend(argv.iter().cloned());
    wrapped
}

/// Recover the job ID from submitter stdout: the last whitespace token of
/// the last non-empty line that parses as an integer.
fn parse_job_id(stdout: &str) -> Result<JobId, SubmitError> {
    stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().last())
        .and_then(|token| token.parse().ok())
        .map(JobId)
        .ok_or_else(|| SubmitError::JobId(stdout.to_string()))
}
