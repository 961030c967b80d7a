//! Git subprocess execution.
//!
//! Everything the pipeline asks of git goes through [`GitRunner`], so only
//! exit status, stdout, and stderr cross the boundary.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sage_core::SageError;
use tokio::process::Command;

/// Captured result of one git invocation.
///
/// # Examples
///
/// ```
/// use sage_gitfetch::runner::GitOutput;
///
/// let out = GitOutput { exit_code: 128, stdout: String::new(), stderr: "fatal".into() };
/// assert!(!out.success());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    /// Process exit code (`-1` when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs git subcommands.
///
/// A non-zero exit is a normal [`GitOutput`], not an error. Errors are
/// reserved for failing to start git ([`SageError::GitInfra`]) and for
/// exceeding `limit` ([`SageError::GitTimeout`]).
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, dir: &Path, args: &[String], limit: Duration)
        -> Result<GitOutput, SageError>;
}

/// [`GitRunner`] backed by the installed `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl GitRunner for GitCli {
    async fn run(
        &self,
        dir: &Path,
        args: &[String],
        limit: Duration,
    ) -> Result<GitOutput, SageError> {
        let operation = args.first().cloned().unwrap_or_default();
        let start = Instant::now();

        let child = Command::new(&self.binary)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SageError::GitInfra(format!("failed to run {}: {e}", self.binary)))?;

        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| SageError::GitTimeout {
                operation: operation.clone(),
                limit,
            })?
            .map_err(|e| SageError::GitInfra(format!("git {operation} did not complete: {e}")))?;

        let result = GitOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            %operation,
            exit_code = result.exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "git finished"
        );
        Ok(result)
    }
}

/// Build an owned argument vector from string slices.
pub(crate) fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts.into_iter().map(|s| s.as_ref().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_runs_successfully() {
        let git = GitCli::default();
        let dir = tempfile::tempdir().unwrap();
        let out = git
            .run(dir.path(), &args(["--version"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(out.success());
        assert!(out.stdout.starts_with("git version"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let git = GitCli::default();
        let dir = tempfile::tempdir().unwrap();
        let out = git
            .run(dir.path(), &args(["rev-parse", "HEAD"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!out.success());
        assert!(!out.stderr.is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_infra_error() {
        let git = GitCli::new("definitely-not-a-git-binary");
        let dir = tempfile::tempdir().unwrap();
        let err = git
            .run(dir.path(), &args(["--version"]), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SageError::GitInfra(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        // `sleep` stands in for a hung fetch.
        let slow = GitCli::new("sleep");
        let dir = tempfile::tempdir().unwrap();
        let err = slow
            .run(dir.path(), &args(["5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SageError::GitTimeout { .. }));
    }
}
