//! Fetch stage: bring exactly two revisions into a mirror.
//!
//! Tiers, each tried only when the one before failed:
//! 1. both revisions as tags, shallow, one round trip
//! 2. each revision as a generic refspec (branch or SHA), shallow
//! 3. each revision as a generic refspec, full history
//!
//! Tiers 2 and 3 bind a local alias tag to the fetched head so the diff stage
//! has an unambiguous name to fall back on.

use std::time::{Duration, Instant};

use sage_core::text::truncate_chars;
use sage_core::{ProgressSink, SageError, Stage};

use crate::differ::{alias_for, RevisionDiffer};
use crate::mirror::RepositoryMirror;
use crate::runner::args;

/// One fetch strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttempt {
    /// `fetch --depth=1 origin tag <from> tag <to>`
    Tags { from: String, to: String },
    /// `fetch --depth=1 origin <revision>`
    Shallow(String),
    /// `fetch origin <revision>`
    Full(String),
}

impl FetchAttempt {
    /// Git arguments for this attempt against `remote`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_gitfetch::fetch::FetchAttempt;
    ///
    /// let attempt = FetchAttempt::Shallow("main".into());
    /// assert_eq!(attempt.git_args("origin"), vec!["fetch", "--depth=1", "origin", "main"]);
    /// ```
    pub fn git_args(&self, remote: &str) -> Vec<String> {
        match self {
            FetchAttempt::Tags { from, to } if from == to => {
                args(["fetch", "--depth=1", remote, "tag", from.as_str()])
            }
            FetchAttempt::Tags { from, to } => args([
                "fetch",
                "--depth=1",
                remote,
                "tag",
                from.as_str(),
                "tag",
                to.as_str(),
            ]),
            FetchAttempt::Shallow(rev) => args(["fetch", "--depth=1", remote, rev.as_str()]),
            FetchAttempt::Full(rev) => args(["fetch", remote, rev.as_str()]),
        }
    }

    /// Whether a success leaves refs that need a local alias.
    fn needs_alias(&self) -> bool {
        !matches!(self, FetchAttempt::Tags { .. })
    }
}

/// Tagged result of running one [`FetchAttempt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { stderr: String },
}

/// How the revisions ended up in the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Both revisions fetched as tags; their names resolve directly.
    Tags,
    /// Revisions fetched by refspec and bound to [`alias_for`] names.
    Aliased,
}

/// Result of a completed fetch stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub mode: FetchMode,
    pub elapsed: Duration,
}

impl RevisionDiffer {
    /// Fetch `from` and `to` into `mirror`, falling through the tiers.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Git`] when every tier failed for a revision, and
    /// [`SageError::GitTimeout`] when any single attempt exceeds its deadline.
    pub async fn fetch(
        &self,
        mirror: &RepositoryMirror,
        from: &str,
        to: &str,
        progress: &ProgressSink,
    ) -> Result<FetchOutcome, SageError> {
        progress.emit(
            Stage::Fetch,
            format!("\u{2b07}\u{fe0f}  Fetching {from} and {to} (shallow) \u{2026}"),
        );
        tracing::info!(%from, %to, "fetching revisions");
        let start = Instant::now();

        let tags = FetchAttempt::Tags {
            from: from.to_string(),
            to: to.to_string(),
        };
        let mode = match self.attempt(mirror, &tags).await? {
            AttemptOutcome::Succeeded => FetchMode::Tags,
            AttemptOutcome::Failed { stderr } => {
                tracing::info!(
                    stderr = %mirror.redact(stderr.trim()),
                    "tag fetch failed, trying generic refspecs"
                );
                progress.emit(
                    Stage::Fetch,
                    "\u{1f500} Not tags \u{2013} fetching as branches/SHAs \u{2026}",
                );
                self.fetch_revision(mirror, from, progress).await?;
                if to != from {
                    self.fetch_revision(mirror, to, progress).await?;
                }
                FetchMode::Aliased
            }
        };

        let elapsed = start.elapsed();
        progress.emit(
            Stage::Fetch,
            format!("\u{2705} Refs fetched ({:.1}s)", elapsed.as_secs_f64()),
        );
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, ?mode, "fetch done");
        Ok(FetchOutcome { mode, elapsed })
    }

    async fn fetch_revision(
        &self,
        mirror: &RepositoryMirror,
        revision: &str,
        progress: &ProgressSink,
    ) -> Result<(), SageError> {
        let chain = [
            FetchAttempt::Shallow(revision.to_string()),
            FetchAttempt::Full(revision.to_string()),
        ];

        let mut last_stderr = String::new();
        for attempt in &chain {
            if matches!(attempt, FetchAttempt::Full(_)) {
                progress.emit(
                    Stage::Fetch,
                    format!(
                        "\u{26a0}\u{fe0f}  Shallow fetch failed for {revision}, trying full fetch \u{2026}"
                    ),
                );
            }
            match self.attempt(mirror, attempt).await? {
                AttemptOutcome::Succeeded => {
                    if attempt.needs_alias() {
                        self.bind_alias(mirror, revision).await?;
                    }
                    return Ok(());
                }
                AttemptOutcome::Failed { stderr } => {
                    tracing::debug!(
                        ?attempt,
                        stderr = %mirror.redact(stderr.trim()),
                        "fetch attempt failed"
                    );
                    last_stderr = stderr;
                }
            }
        }

        Err(SageError::Git(format!(
            "could not fetch revision {revision}: {}",
            mirror.redact(truncate_chars(last_stderr.trim(), 500))
        )))
    }

    async fn attempt(
        &self,
        mirror: &RepositoryMirror,
        attempt: &FetchAttempt,
    ) -> Result<AttemptOutcome, SageError> {
        let output = self
            .runner
            .run(
                mirror.git_dir(),
                &attempt.git_args(mirror.remote()),
                self.config.network_timeout(),
            )
            .await?;
        if output.success() {
            Ok(AttemptOutcome::Succeeded)
        } else {
            Ok(AttemptOutcome::Failed {
                stderr: output.stderr,
            })
        }
    }

    /// Point [`alias_for`]`(revision)` at whatever the last fetch stored in
    /// `FETCH_HEAD`.
    async fn bind_alias(&self, mirror: &RepositoryMirror, revision: &str) -> Result<(), SageError> {
        let limit = self.config.local_timeout();
        let head = self
            .runner
            .run(mirror.git_dir(), &args(["rev-parse", "FETCH_HEAD"]), limit)
            .await?;
        let sha = head.stdout.trim();
        if !head.success() || sha.is_empty() {
            return Err(SageError::Git(format!(
                "could not resolve fetched head for {revision}: {}",
                truncate_chars(head.stderr.trim(), 500)
            )));
        }

        let alias = alias_for(revision);
        let tag = self
            .runner
            .run(mirror.git_dir(), &args(["tag", "-f", alias.as_str(), sha]), limit)
            .await?;
        if !tag.success() {
            return Err(SageError::Git(format!(
                "could not create alias {alias}: {}",
                truncate_chars(tag.stderr.trim(), 500)
            )));
        }
        tracing::debug!(%revision, %alias, %sha, "alias bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sage_core::{GitConfig, PipelineEvent};

    use super::*;
    use crate::fake::ScriptedGit;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    async fn run_fetch(
        git: Arc<ScriptedGit>,
        from: &str,
        to: &str,
    ) -> (Result<FetchOutcome, SageError>, Vec<String>) {
        let (sink, mut rx) = ProgressSink::channel();
        let mirror = RepositoryMirror::acquire(
            git.as_ref(),
            &GitConfig::default(),
            "https://example.com/r",
            None,
            &sink,
        )
        .await
        .unwrap();
        let differ = RevisionDiffer::new(git, GitConfig::default());
        let result = differ.fetch(&mirror, from, to, &sink).await;
        drop(sink);

        let mut messages = Vec::new();
        while let Some(event) = rx.recv().await {
            if let PipelineEvent::Progress(p) = event {
                if p.stage == Stage::Fetch {
                    messages.push(p.message);
                }
            }
        }
        (result, messages)
    }

    fn position(calls: &[Vec<String>], wanted: &[&str]) -> Option<usize> {
        calls.iter().position(|c| c == wanted)
    }

    #[test]
    fn tag_args_deduplicate_identical_revisions() {
        let attempt = FetchAttempt::Tags {
            from: "v1".into(),
            to: "v1".into(),
        };
        assert_eq!(
            attempt.git_args("origin"),
            vec!["fetch", "--depth=1", "origin", "tag", "v1"]
        );
    }

    #[tokio::test]
    async fn tag_fetch_success_needs_no_alias() {
        let git = Arc::new(ScriptedGit::succeeding());
        let (result, messages) = run_fetch(git.clone(), "v1.0.0", "v1.1.0").await;

        assert_eq!(result.unwrap().mode, FetchMode::Tags);
        let calls = git.calls();
        assert!(position(
            &calls,
            &["fetch", "--depth=1", "origin", "tag", "v1.0.0", "tag", "v1.1.0"]
        )
        .is_some());
        assert!(!calls.iter().any(|c| c[0] == "tag"));
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("Refs fetched"));
    }

    #[tokio::test]
    async fn branch_name_falls_back_to_shallow_refspec_before_full() {
        let git = Arc::new(ScriptedGit::new(|args| match args {
            [cmd, _, _, kind, ..] if cmd == "fetch" && kind == "tag" => {
                ScriptedGit::fail("fatal: couldn't find remote ref refs/tags/main")
            }
            [cmd, ..] if cmd == "rev-parse" => ScriptedGit::ok(&format!("{SHA}\n")),
            _ => ScriptedGit::ok(""),
        }));
        let (result, messages) = run_fetch(git.clone(), "v1.0.0", "main").await;

        assert_eq!(result.unwrap().mode, FetchMode::Aliased);
        let calls = git.calls();
        let shallow_main = position(&calls, &["fetch", "--depth=1", "origin", "main"]).unwrap();
        let tag_fetch = calls
            .iter()
            .position(|c| c.get(3).map(String::as_str) == Some("tag"))
            .unwrap();
        assert!(tag_fetch < shallow_main);
        assert!(position(&calls, &["fetch", "origin", "main"]).is_none());
        assert!(position(&calls, &["tag", "-f", "sage-alias/main", SHA]).is_some());
        assert!(position(&calls, &["tag", "-f", "sage-alias/v1.0.0", SHA]).is_some());
        assert!(messages.iter().any(|m| m.contains("Not tags")));
        assert!(!messages.iter().any(|m| m.contains("full fetch")));
    }

    #[tokio::test]
    async fn shallow_failure_falls_back_to_full_fetch() {
        let git = Arc::new(ScriptedGit::new(|args| {
            let joined = args.join(" ");
            if joined.starts_with("fetch --depth=1") {
                ScriptedGit::fail("fatal: shallow fetch rejected")
            } else if joined.starts_with("rev-parse") {
                ScriptedGit::ok(SHA)
            } else {
                ScriptedGit::ok("")
            }
        }));
        let (result, messages) = run_fetch(git.clone(), "abc1234", "def5678").await;

        assert!(result.is_ok());
        let calls = git.calls();
        let shallow = position(&calls, &["fetch", "--depth=1", "origin", "abc1234"]).unwrap();
        let full = position(&calls, &["fetch", "origin", "abc1234"]).unwrap();
        assert!(shallow < full);
        assert!(position(&calls, &["fetch", "origin", "def5678"]).is_some());
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.contains("trying full fetch"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn exhausted_tiers_are_a_git_error() {
        let git = Arc::new(ScriptedGit::new(|args| {
            if args[0] == "fetch" {
                ScriptedGit::fail("fatal: couldn't find remote ref nope")
            } else {
                ScriptedGit::ok("")
            }
        }));
        let (result, _) = run_fetch(git.clone(), "nope", "v1").await;

        let err = result.unwrap_err();
        assert!(matches!(err, SageError::Git(_)));
        assert!(err.to_string().contains("nope"));
        // The second revision is never attempted once the first is exhausted.
        assert!(position(&git.calls(), &["fetch", "--depth=1", "origin", "v1"]).is_none());
    }

    #[tokio::test]
    async fn unresolvable_fetch_head_is_a_git_error() {
        let git = Arc::new(ScriptedGit::new(|args| match args[0].as_str() {
            "fetch" if args.len() > 4 => ScriptedGit::fail("no tags"),
            "rev-parse" => ScriptedGit::fail("fatal: ambiguous argument 'FETCH_HEAD'"),
            _ => ScriptedGit::ok(""),
        }));
        let (result, _) = run_fetch(git, "main", "dev").await;
        assert!(matches!(result, Err(SageError::Git(_))));
    }
}
