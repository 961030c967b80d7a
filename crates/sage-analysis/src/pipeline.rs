use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sage_core::text::group_thousands;
use sage_core::{
    AnalysisRequest, ModelVerdict, PipelineEvent, ProgressSink, SageConfig, SageError, Stage,
};
use sage_gitfetch::{DiffResult, GitRunner, RepositoryMirror, RevisionDiffer};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::llm::AnalysisClient;
use crate::prompt::{PromptBuilder, MAX_DIFF_CHARS};
use crate::usage::UsageTracker;

/// Drives one analysis from request to verdict.
///
/// Cheap to clone; every clone shares the same [`UsageTracker`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use sage_analysis::pipeline::Analyzer;
/// use sage_analysis::usage::UsageTracker;
/// use sage_core::{AnalysisRequest, PipelineEvent, SageConfig};
/// use sage_gitfetch::GitCli;
///
/// # async fn run() -> Result<(), sage_core::SageError> {
/// let analyzer = Analyzer::new(
///     Arc::new(SageConfig::default()),
///     Arc::new(UsageTracker::new()),
///     Arc::new(GitCli::default()),
/// );
/// let request = AnalysisRequest::new("https://github.com/serde-rs/serde", "v1.0.200", "v1.0.201", None)?;
/// let mut events = analyzer.analyze(request);
/// while let Some(event) = events.recv().await {
///     if let PipelineEvent::Progress(p) = &event {
///         println!("{}", p.message);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Analyzer {
    config: Arc<SageConfig>,
    usage: Arc<UsageTracker>,
    runner: Arc<dyn GitRunner>,
    config_source: Option<PathBuf>,
}

impl Analyzer {
    pub fn new(
        config: Arc<SageConfig>,
        usage: Arc<UsageTracker>,
        runner: Arc<dyn GitRunner>,
    ) -> Self {
        Self {
            config,
            usage,
            runner,
            config_source: None,
        }
    }

    /// Record which file the configuration came from, for the startup line.
    pub fn with_config_source(mut self, path: Option<PathBuf>) -> Self {
        self.config_source = path;
        self
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    /// Start an analysis on a background task and return its event stream.
    ///
    /// The stream carries progress events followed by exactly one terminal
    /// [`PipelineEvent::Result`] or [`PipelineEvent::Error`], then closes.
    /// A panic inside the pipeline is reported as an error event.
    pub fn analyze(&self, request: AnalysisRequest) -> UnboundedReceiver<PipelineEvent> {
        let (sink, events) = ProgressSink::channel();
        let analyzer = self.clone();
        let progress = sink.clone();
        let task = tokio::spawn(async move { analyzer.run(request, &progress).await });
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(verdict)) => sink.finish(verdict),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "analysis failed");
                    sink.fail(error_message(&e));
                }
                Err(e) => {
                    tracing::error!(error = %e, "analysis task aborted");
                    sink.fail(format!("\u{1f4a5} analysis task aborted: {e}"));
                }
            }
        });
        events
    }

    /// Run the pipeline inline, reporting progress to `progress`.
    ///
    /// Terminal events are left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Config`] when the LLM endpoint is not configured,
    /// before any git or network activity. Git and LLM failures are returned
    /// as their respective variants; the mirror is removed in every case.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        progress: &ProgressSink,
    ) -> Result<ModelVerdict, SageError> {
        let started = Instant::now();
        let config = self.config.as_ref();
        let request = request.with_fallback_token(config.github.token.as_deref());

        if config.show_startup_check {
            let source = match &self.config_source {
                Some(path) => path.display().to_string(),
                None => "defaults (no config file)".to_string(),
            };
            progress.emit(Stage::Init, format!("\u{2699}\u{fe0f}  Config: {source}"));
        }
        progress.emit(
            Stage::Init,
            format!(
                "\u{1f680} Starting analysis: {}  {} \u{2192} {}",
                request.repository_url(),
                request.from_revision(),
                request.to_revision()
            ),
        );
        tracing::info!(
            repository = request.repository_url(),
            from = request.from_revision(),
            to = request.to_revision(),
            authenticated = request.access_token().is_some(),
            "analysis started"
        );

        let client = AnalysisClient::new(&config.llm)?;

        let diff = self.collect_diff(&request, progress).await?;

        let prompt = PromptBuilder::new(&config.analysis).build(&diff.text);
        progress.emit(
            Stage::Prompt,
            format!(
                "\u{1f9e9} Prompt ready \u{2013} {} diff chars",
                group_thousands(prompt.diff_chars)
            ),
        );

        let note = if prompt.truncated {
            format!(" (truncated to {}k chars)", MAX_DIFF_CHARS / 1000)
        } else {
            String::new()
        };
        progress.emit(
            Stage::Llm,
            format!("\u{1f916} Sending diff to {}{note} \u{2026}", client.model()),
        );
        let llm_started = Instant::now();
        let (verdict, delta) = client.analyze(&prompt).await?;
        progress.emit(
            Stage::Llm,
            format!(
                "\u{2705} LLM responded ({:.1}s, prompt={}, completion={})",
                llm_started.elapsed().as_secs_f64(),
                delta.prompt_tokens,
                delta.completion_tokens
            ),
        );
        if verdict.is_degraded() {
            tracing::warn!("model reply could not be parsed; returning raw output");
        }

        self.usage.record(delta.prompt_tokens, delta.completion_tokens);
        if config.usage.enable_token_monitoring {
            if let Some(alert) = self.usage.check_threshold(
                config.usage.max_tokens_per_request,
                config.usage.token_usage_threshold,
            ) {
                progress.emit(Stage::TokenAlert, format!("\u{26a0}\u{fe0f}  {}", alert.message));
            }
        }

        progress.emit(
            Stage::Done,
            format!(
                "\u{1f3c1} Analysis complete in {:.1}s",
                started.elapsed().as_secs_f64()
            ),
        );
        Ok(verdict)
    }

    async fn collect_diff(
        &self,
        request: &AnalysisRequest,
        progress: &ProgressSink,
    ) -> Result<DiffResult, SageError> {
        let git = &self.config.git;
        let mirror = RepositoryMirror::acquire(
            self.runner.as_ref(),
            git,
            request.repository_url(),
            request.access_token(),
            progress,
        )
        .await?;

        let differ = RevisionDiffer::new(self.runner.clone(), git.clone());
        let from = request.from_revision();
        let to = request.to_revision();
        let result = async {
            differ.fetch(&mirror, from, to, progress).await?;
            differ.diff(&mirror, from, to, progress).await
        }
        .await;

        if let Err(e) = mirror.release() {
            tracing::warn!(error = %e, "failed to remove mirror directory");
        }
        result
    }
}

/// User-facing text for a terminal error event.
///
/// # Examples
///
/// ```
/// use sage_analysis::pipeline::error_message;
/// use sage_core::SageError;
///
/// let msg = error_message(&SageError::Git("bad revision".into()));
/// assert!(msg.contains("bad revision"));
/// ```
pub fn error_message(error: &SageError) -> String {
    match error {
        SageError::GitTimeout { .. } => format!("\u{23f1}\u{fe0f} {error}"),
        SageError::Llm(_) => format!("\u{1f4a5} LLM call failed: {error}"),
        _ => format!("\u{1f4a5} {error}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeout_message_is_marked() {
        let msg = error_message(&SageError::GitTimeout {
            operation: "fetch".into(),
            limit: Duration::from_secs(300),
        });
        assert!(msg.starts_with('\u{23f1}'));
        assert!(msg.contains("git fetch timed out after 300s"));
    }

    #[test]
    fn llm_failure_message_is_prefixed() {
        let msg = error_message(&SageError::Llm("LLM API error 500".into()));
        assert!(msg.contains("LLM call failed"));
        assert!(msg.contains("500"));
    }
}
