//! Diff stage: unified diff between two fetched revisions.

use std::time::Instant;

use sage_core::text::{group_thousands, truncate_chars};
use sage_core::{ProgressSink, SageError, Stage};

use crate::differ::{alias_for, RevisionDiffer};
use crate::mirror::RepositoryMirror;
use crate::runner::{args, GitOutput};

/// Context lines around each change.
pub const CONTEXT_LINES: u32 = 5;

/// Unified diff text plus size metrics.
///
/// `text` is never empty: when git produced no output it holds a placeholder
/// and `identical` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub text: String,
    /// Newline count of the raw diff.
    pub line_count: usize,
    /// Character count of the raw diff.
    pub char_count: usize,
    /// Git produced no output (same commit, or effectively equal trees).
    pub identical: bool,
}

impl DiffResult {
    /// Wrap raw `git diff` output, substituting the placeholder when empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_gitfetch::diff::DiffResult;
    ///
    /// let result = DiffResult::from_output("+a\n-b\n", "");
    /// assert_eq!(result.line_count, 2);
    /// assert!(!result.identical);
    ///
    /// let empty = DiffResult::from_output("", "");
    /// assert!(empty.identical);
    /// assert!(empty.text.starts_with("(no diff output"));
    /// ```
    pub fn from_output(stdout: &str, stderr: &str) -> Self {
        if stdout.is_empty() {
            return Self {
                text: placeholder(stderr),
                line_count: 0,
                char_count: 0,
                identical: true,
            };
        }
        Self {
            text: stdout.to_string(),
            line_count: stdout.matches('\n').count(),
            char_count: stdout.chars().count(),
            identical: false,
        }
    }
}

fn placeholder(stderr: &str) -> String {
    format!(
        "(no diff output \u{2013} refs may be identical or invalid. stderr: {})",
        truncate_chars(stderr.trim(), 200)
    )
}

impl RevisionDiffer {
    /// Diff `from` against `to`, retrying with the local aliases when the
    /// names do not resolve directly.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Git`] when both the direct and the aliased diff
    /// exit non-zero, and [`SageError::GitTimeout`] when a diff exceeds its
    /// deadline.
    pub async fn diff(
        &self,
        mirror: &RepositoryMirror,
        from: &str,
        to: &str,
        progress: &ProgressSink,
    ) -> Result<DiffResult, SageError> {
        progress.emit(
            Stage::Diff,
            format!("\u{1f4dd} Computing diff {from}..{to} \u{2026}"),
        );
        let start = Instant::now();

        let direct = self.run_diff(mirror, from, to).await?;
        let output = if direct.success() {
            direct
        } else {
            tracing::info!(
                stderr = %truncate_chars(direct.stderr.trim(), 200),
                "direct diff failed, trying local aliases"
            );
            let aliased = self
                .run_diff(mirror, &alias_for(from), &alias_for(to))
                .await?;
            if !aliased.success() {
                return Err(SageError::Git(format!(
                    "could not diff {from}..{to}: {}",
                    truncate_chars(aliased.stderr.trim(), 500)
                )));
            }
            aliased
        };

        let result = DiffResult::from_output(&output.stdout, &output.stderr);
        let elapsed = start.elapsed().as_secs_f64();
        if result.identical {
            progress.emit(
                Stage::Diff,
                format!(
                    "\u{26a0}\u{fe0f}  No diff output ({elapsed:.1}s) \u{2013} refs may point to the same commit"
                ),
            );
        } else {
            progress.emit(
                Stage::Diff,
                format!(
                    "\u{2705} Diff ready \u{2013} {} lines, {} chars ({elapsed:.1}s)",
                    group_thousands(result.line_count),
                    group_thousands(result.char_count),
                ),
            );
        }
        tracing::info!(
            lines = result.line_count,
            chars = result.char_count,
            identical = result.identical,
            "diff computed"
        );
        Ok(result)
    }

    async fn run_diff(
        &self,
        mirror: &RepositoryMirror,
        from: &str,
        to: &str,
    ) -> Result<GitOutput, SageError> {
        let unified = format!("--unified={CONTEXT_LINES}");
        self.runner
            .run(
                mirror.git_dir(),
                &args(["diff", unified.as_str(), from, to]),
                self.config.diff_timeout(),
            )
            .await
    }
}
