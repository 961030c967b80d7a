//! Revision fetching and diffing against ephemeral git mirrors.
//!
//! A [`RepositoryMirror`] is a bare, no-checkout repository in a temporary
//! directory. [`RevisionDiffer`] brings two revisions into it with a tiered
//! fetch strategy and produces their unified diff. All git access goes
//! through the [`GitRunner`] trait.

pub mod diff;
pub mod differ;
pub mod fetch;
pub mod mirror;
pub mod runner;

#[cfg(test)]
mod fake;

pub use diff::DiffResult;
pub use differ::{alias_for, RevisionDiffer, ALIAS_PREFIX};
pub use fetch::{FetchAttempt, FetchMode, FetchOutcome};
pub use mirror::RepositoryMirror;
pub use runner::{GitCli, GitOutput, GitRunner};
