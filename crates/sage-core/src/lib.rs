//! Core types, configuration, and error handling for UpgradeSage.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`SageError`]: unified error type using `thiserror` and `miette`
//! - [`SageConfig`]: configuration loaded from `.upgradesage.toml`
//! - Shared types: [`AnalysisRequest`], [`AnalysisResult`], [`ModelVerdict`],
//!   [`TokenUsage`], [`OutputFormat`]
//! - Progress reporting: [`Stage`], [`ProgressEvent`], [`PipelineEvent`], [`ProgressSink`]

mod config;
mod error;
mod progress;
pub mod text;
mod types;

pub use config::{
    process_env, AnalysisConfig, GitConfig, GithubConfig, LlmConfig, LlmProvider, SageConfig,
    UsageConfig, CONFIG_FILE_NAME,
};
pub use error::SageError;
pub use progress::{PipelineEvent, ProgressEvent, ProgressSink, Stage};
pub use types::{
    AnalysisRequest, AnalysisResult, BreakingChange, ModelVerdict, OutputFormat, TokenUsage,
    UNPARSEABLE_RISK_SCORE,
};

/// A convenience `Result` type for UpgradeSage operations.
pub type Result<T> = std::result::Result<T, SageError>;
