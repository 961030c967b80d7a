use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SageError;

/// Risk score reported when the model reply could not be parsed.
pub const UNPARSEABLE_RISK_SCORE: i32 = -1;

/// One analysis invocation: which repository, which two revisions.
///
/// Validated on construction so that every revision is usable as a plain git
/// argument.
///
/// # Examples
///
/// ```
/// use sage_core::AnalysisRequest;
///
/// let req = AnalysisRequest::new("https://github.com/serde-rs/serde", "v1.0.0", "v1.0.1", None).unwrap();
/// assert_eq!(req.from_revision(), "v1.0.0");
/// assert!(AnalysisRequest::new("https://github.com/a/b", "--upload-pack=x", "v1", None).is_err());
/// ```
#[derive(Clone)]
pub struct AnalysisRequest {
    repository_url: String,
    from_revision: String,
    to_revision: String,
    access_token: Option<String>,
}

impl AnalysisRequest {
    /// Build a request, rejecting empty fields and option-like revisions.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Config`] if the URL or a revision is unusable.
    pub fn new(
        repository_url: impl Into<String>,
        from_revision: impl Into<String>,
        to_revision: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, SageError> {
        let repository_url = repository_url.into().trim().to_string();
        let from_revision = from_revision.into().trim().to_string();
        let to_revision = to_revision.into().trim().to_string();

        if repository_url.is_empty() {
            return Err(SageError::Config("repository URL is empty".into()));
        }
        if repository_url.starts_with('-') {
            return Err(SageError::Config(format!(
                "repository URL may not start with '-': {repository_url}"
            )));
        }
        for revision in [&from_revision, &to_revision] {
            validate_revision(revision)?;
        }

        Ok(Self {
            repository_url,
            from_revision,
            to_revision,
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn from_revision(&self) -> &str {
        &self.from_revision
    }

    pub fn to_revision(&self) -> &str {
        &self.to_revision
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Same request, with `token` used when none was supplied explicitly.
    pub fn with_fallback_token(mut self, token: Option<&str>) -> Self {
        if self.access_token.is_none() {
            self.access_token = token.map(str::to_string);
        }
        self
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("repository_url", &self.repository_url)
            .field("from_revision", &self.from_revision)
            .field("to_revision", &self.to_revision)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

fn validate_revision(revision: &str) -> Result<(), SageError> {
    if revision.is_empty() {
        return Err(SageError::Config("revision is empty".into()));
    }
    if revision.starts_with('-') {
        return Err(SageError::Config(format!(
            "revision may not start with '-': {revision}"
        )));
    }
    if revision.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SageError::Config(format!(
            "revision contains whitespace or control characters: {revision:?}"
        )));
    }
    Ok(())
}

/// A single breaking change identified by the model.
///
/// # Examples
///
/// ```
/// use sage_core::BreakingChange;
///
/// let change = BreakingChange {
///     title: "Removed `Client::connect`".into(),
///     details: "Callers must use `Client::builder()`".into(),
///     mitigations: vec!["Switch to the builder".into()],
/// };
/// assert_eq!(change.mitigations.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    /// Short title.
    pub title: String,
    /// Why the change breaks consumers.
    #[serde(default)]
    pub details: String,
    /// Ordered upgrade steps.
    #[serde(default)]
    pub mitigations: Vec<String>,
}

/// Structured findings for one upgrade.
///
/// # Examples
///
/// ```
/// use sage_core::AnalysisResult;
///
/// let result = AnalysisResult {
///     risk_score: 42,
///     breaking_changes: vec![],
///     markdown_report: "ok".into(),
/// };
/// let json = serde_json::to_value(&result).unwrap();
/// assert_eq!(json["riskScore"], 42);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// 0 (trivial) to 100 (catastrophic), or [`UNPARSEABLE_RISK_SCORE`].
    pub risk_score: i32,
    /// Breaking changes in the order the model listed them.
    #[serde(default)]
    pub breaking_changes: Vec<BreakingChange>,
    /// Human-readable Markdown report.
    #[serde(default)]
    pub markdown_report: String,
}

impl AnalysisResult {
    /// Result synthesized from a model reply that could not be parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_core::AnalysisResult;
    ///
    /// let result = AnalysisResult::degraded("sorry, I cannot help");
    /// assert_eq!(result.risk_score, -1);
    /// assert!(result.markdown_report.contains("sorry, I cannot help"));
    /// ```
    pub fn degraded(raw: &str) -> Self {
        Self {
            risk_score: UNPARSEABLE_RISK_SCORE,
            breaking_changes: Vec::new(),
            markdown_report: format!(
                "\u{26a0}\u{fe0f} LLM returned non-JSON. Raw output:\n\n```\n{raw}\n```"
            ),
        }
    }

    /// Human label for the risk score.
    pub fn risk_label(&self) -> &'static str {
        match self.risk_score {
            s if s < 0 => "unknown",
            0..=20 => "low",
            21..=50 => "moderate",
            51..=80 => "high",
            _ => "critical",
        }
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Upgrade Risk")?;
        writeln!(f, "============")?;
        if self.risk_score < 0 {
            writeln!(f, "Risk score: unavailable (model reply was not valid JSON)\n")?;
        } else {
            writeln!(f, "Risk score: {}/100 ({})\n", self.risk_score, self.risk_label())?;
        }

        if self.breaking_changes.is_empty() {
            writeln!(f, "No breaking changes reported.")?;
        } else {
            writeln!(f, "Breaking changes ({}):", self.breaking_changes.len())?;
            for (i, change) in self.breaking_changes.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, change.title)?;
                if !change.details.is_empty() {
                    writeln!(f, "     {}", change.details)?;
                }
                for step in &change.mitigations {
                    writeln!(f, "     - {step}")?;
                }
            }
        }
        Ok(())
    }
}

/// Outcome of asking the model: structured findings, or the raw reply when it
/// could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelVerdict {
    /// The reply matched the expected JSON shape.
    Parsed(AnalysisResult),
    /// The reply was not usable JSON; `raw` is the cleaned reply text.
    Degraded {
        /// Reply text after trimming and fence stripping.
        raw: String,
    },
}

impl ModelVerdict {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ModelVerdict::Degraded { .. })
    }

    /// The result to hand to a caller; degraded replies become a
    /// [`UNPARSEABLE_RISK_SCORE`] result echoing the raw text.
    pub fn into_result(self) -> AnalysisResult {
        match self {
            ModelVerdict::Parsed(result) => result,
            ModelVerdict::Degraded { raw } => AnalysisResult::degraded(&raw),
        }
    }
}

/// Cumulative token consumption.
///
/// # Examples
///
/// ```
/// use sage_core::TokenUsage;
///
/// let mut usage = TokenUsage::default();
/// usage.add(100, 20);
/// usage.add(50, 5);
/// assert_eq!(usage.total_tokens, 175);
/// assert_eq!(usage.request_count, 2);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
}

impl TokenUsage {
    /// Add one request's consumption. Counters saturate at `u64::MAX`.
    pub fn add(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(completion_tokens);
        self.total_tokens = self
            .total_tokens
            .saturating_add(prompt_tokens.saturating_add(completion_tokens));
        self.request_count = self.request_count.saturating_add(1);
    }

    /// `total_tokens` as a percentage of `budget`; `0.0` for a zero budget.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_core::TokenUsage;
    ///
    /// let usage = TokenUsage { total_tokens: 8000, ..TokenUsage::default() };
    /// assert_eq!(usage.percentage_of(10_000), 80.0);
    /// assert_eq!(usage.percentage_of(0), 0.0);
    /// ```
    pub fn percentage_of(&self, budget: u64) -> f64 {
        if budget == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / budget as f64 * 100.0
    }
}

/// Output format for command results.
///
/// # Examples
///
/// ```
/// use sage_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable plain text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
    /// GitHub-flavored Markdown.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_trims_and_keeps_fields() {
        let req = AnalysisRequest::new(" https://github.com/a/b ", "v1", " main ", None).unwrap();
        assert_eq!(req.repository_url(), "https://github.com/a/b");
        assert_eq!(req.to_revision(), "main");
        assert!(req.access_token().is_none());
    }

    #[test]
    fn request_rejects_bad_revisions() {
        assert!(AnalysisRequest::new("https://x/y", "", "v1", None).is_err());
        assert!(AnalysisRequest::new("https://x/y", "v1", "-x", None).is_err());
        assert!(AnalysisRequest::new("https://x/y", "v 1", "v2", None).is_err());
        assert!(AnalysisRequest::new("", "v1", "v2", None).is_err());
    }

    #[test]
    fn request_debug_hides_token() {
        let req = AnalysisRequest::new("https://x/y", "a", "b", Some("ghp_secret".into())).unwrap();
        let shown = format!("{req:?}");
        assert!(!shown.contains("ghp_secret"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn explicit_token_beats_fallback() {
        let req = AnalysisRequest::new("https://x/y", "a", "b", Some("explicit".into()))
            .unwrap()
            .with_fallback_token(Some("config"));
        assert_eq!(req.access_token(), Some("explicit"));

        let req = AnalysisRequest::new("https://x/y", "a", "b", Some("  ".into()))
            .unwrap()
            .with_fallback_token(Some("config"));
        assert_eq!(req.access_token(), Some("config"));
    }

    #[test]
    fn usage_accumulates_in_any_order() {
        let mut first = TokenUsage::default();
        first.add(10, 5);
        first.add(300, 40);

        let mut second = TokenUsage::default();
        second.add(300, 40);
        second.add(10, 5);

        assert_eq!(first, second);
        assert_eq!(first.total_tokens, 355);
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let mut usage = TokenUsage::default();
        usage.add(u64::MAX, 1);
        assert_eq!(usage.prompt_tokens, u64::MAX);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, u64::MAX);

        usage.add(10, 10);
        assert_eq!(usage.prompt_tokens, u64::MAX);
        assert_eq!(usage.completion_tokens, 11);
        assert_eq!(usage.total_tokens, u64::MAX);
        assert_eq!(usage.request_count, 2);
    }

    #[test]
    fn result_deserializes_with_defaults() {
        let json = r#"{"riskScore": 10, "breakingChanges": [{"title": "x"}]}"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.risk_score, 10);
        assert_eq!(result.breaking_changes[0].details, "");
        assert!(result.breaking_changes[0].mitigations.is_empty());
        assert!(result.markdown_report.is_empty());
    }

    #[test]
    fn degraded_verdict_becomes_sentinel_result() {
        let verdict = ModelVerdict::Degraded {
            raw: "not json".into(),
        };
        assert!(verdict.is_degraded());
        let result = verdict.into_result();
        assert_eq!(result.risk_score, UNPARSEABLE_RISK_SCORE);
        assert!(result.breaking_changes.is_empty());
        assert!(result.markdown_report.contains("```\nnot json\n```"));
    }

    #[test]
    fn display_lists_changes_and_mitigations() {
        let result = AnalysisResult {
            risk_score: 70,
            breaking_changes: vec![BreakingChange {
                title: "Renamed config key".into(),
                details: "`timeout` is now `timeout_ms`".into(),
                mitigations: vec!["Rename the key".into()],
            }],
            markdown_report: String::new(),
        };
        let text = result.to_string();
        assert!(text.contains("Risk score: 70/100 (high)"));
        assert!(text.contains("1. Renamed config key"));
        assert!(text.contains("- Rename the key"));
    }
}
