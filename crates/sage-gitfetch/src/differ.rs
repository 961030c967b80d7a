use std::sync::Arc;

use sage_core::GitConfig;

use crate::runner::GitRunner;

/// Prefix of the local tags bound to revisions fetched by name.
pub const ALIAS_PREFIX: &str = "sage-alias/";

/// Fetches two revisions into a [`RepositoryMirror`](crate::mirror::RepositoryMirror)
/// and diffs them.
///
/// The fetch stage lives in [`crate::fetch`], the diff stage in [`crate::diff`].
#[derive(Clone)]
pub struct RevisionDiffer {
    pub(crate) runner: Arc<dyn GitRunner>,
    pub(crate) config: GitConfig,
}

impl RevisionDiffer {
    pub fn new(runner: Arc<dyn GitRunner>, config: GitConfig) -> Self {
        Self { runner, config }
    }

    pub fn runner(&self) -> &dyn GitRunner {
        self.runner.as_ref()
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }
}

/// Local alias for `revision`, stable regardless of what kind of ref the
/// remote name resolved to.
///
/// # Examples
///
/// ```
/// use sage_gitfetch::differ::alias_for;
///
/// assert_eq!(alias_for("main"), "sage-alias/main");
/// ```
pub fn alias_for(revision: &str) -> String {
    format!("{ALIAS_PREFIX}{revision}")
}
