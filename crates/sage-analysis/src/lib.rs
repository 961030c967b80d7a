//! Upgrade analysis: prompt construction, the LLM client, token accounting,
//! and the pipeline that ties them to the git layer.

pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod usage;

pub use pipeline::Analyzer;
pub use usage::{ThresholdAlert, UsageTracker};
