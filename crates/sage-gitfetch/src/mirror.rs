//! Ephemeral bare repositories holding only the revisions under analysis.

use std::path::{Path, PathBuf};

use sage_core::text::truncate_chars;
use sage_core::{GitConfig, ProgressSink, SageError, Stage};
use tempfile::TempDir;

use crate::runner::{args, GitRunner};

const DIR_PREFIX: &str = "upgradesage_";
const REPO_DIR: &str = "repo.git";
const REMOTE: &str = "origin";

/// A bare, no-checkout object store in a private temporary directory.
///
/// The directory is removed by [`RepositoryMirror::release`] or, on any other
/// exit path, when the mirror is dropped.
#[derive(Debug)]
pub struct RepositoryMirror {
    dir: TempDir,
    git_dir: PathBuf,
    secret: Option<String>,
}

impl RepositoryMirror {
    /// Create the store and register `repository_url` as `origin`.
    ///
    /// When `access_token` is set and the URL is an `https://` GitHub URL, the
    /// token is placed in the URL's credential slot. Emits one [`Stage::Init`]
    /// event before the remote is registered.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::GitInfra`] if the directory or store cannot be
    /// created, or [`SageError::GitTimeout`] if git hangs.
    pub async fn acquire(
        runner: &dyn GitRunner,
        config: &GitConfig,
        repository_url: &str,
        access_token: Option<&str>,
        progress: &ProgressSink,
    ) -> Result<Self, SageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);
        let dir = match &config.mirror_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| SageError::GitInfra(format!("failed to create mirror directory: {e}")))?;

        let git_dir = dir.path().join(REPO_DIR);
        let remote_url = authenticated_url(repository_url, access_token);
        let mirror = Self {
            dir,
            git_dir,
            secret: access_token
                .filter(|_| remote_url != repository_url)
                .map(str::to_string),
        };

        progress.emit(
            Stage::Init,
            format!("\u{1f4e6} Initializing local repo for {repository_url} \u{2026}"),
        );
        tracing::info!(
            repository = %repository_url,
            path = %mirror.path().display(),
            "initializing mirror"
        );

        let git_dir_arg = mirror.git_dir.to_string_lossy().into_owned();
        let init = runner
            .run(
                mirror.path(),
                &args(["init", "--bare", "-q", git_dir_arg.as_str()]),
                config.local_timeout(),
            )
            .await?;
        if !init.success() {
            return Err(SageError::GitInfra(format!(
                "git init failed: {}",
                truncate_chars(init.stderr.trim(), 500)
            )));
        }

        let remote = runner
            .run(
                &mirror.git_dir,
                &args(["remote", "add", REMOTE, remote_url.as_str()]),
                config.local_timeout(),
            )
            .await?;
        if !remote.success() {
            return Err(SageError::GitInfra(format!(
                "git remote add failed: {}",
                mirror.redact(truncate_chars(remote.stderr.trim(), 500))
            )));
        }

        Ok(mirror)
    }

    /// Root of the temporary directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The bare repository inside [`RepositoryMirror::path`].
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Name of the registered remote.
    pub fn remote(&self) -> &str {
        REMOTE
    }

    /// Replace the injected credential in `text`, if any.
    pub fn redact(&self, text: &str) -> String {
        match &self.secret {
            Some(secret) if !secret.is_empty() => text.replace(secret.as_str(), "***"),
            _ => text.to_string(),
        }
    }

    /// Remove the directory.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Io`] if removal fails.
    pub fn release(self) -> Result<(), SageError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        tracing::debug!(path = %path.display(), "mirror released");
        Ok(())
    }
}

/// `repository_url` with `token` in the credential slot, for `https://` URLs
/// on `github.com`. Any other URL is returned unchanged.
///
/// # Examples
///
/// ```
/// use sage_gitfetch::mirror::authenticated_url;
///
/// assert_eq!(
///     authenticated_url("https://github.com/o/r.git", Some("ghp_x")),
///     "https://ghp_x@github.com/o/r.git"
/// );
/// assert_eq!(
///     authenticated_url("https://gitlab.com/o/r.git", Some("ghp_x")),
///     "https://gitlab.com/o/r.git"
/// );
/// ```
pub fn authenticated_url(repository_url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return repository_url.to_string();
    };
    let Some(rest) = repository_url.strip_prefix("https://") else {
        return repository_url.to_string();
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.contains('@') {
        return repository_url.to_string();
    }
    let host = authority
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if host == "github.com" || host.ends_with(".github.com") {
        format!("https://{token}@{rest}")
    } else {
        repository_url.to_string()
    }
}
