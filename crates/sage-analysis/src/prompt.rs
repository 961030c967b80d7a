use sage_core::text::truncate_chars;
use sage_core::{AnalysisConfig, AnalysisResult, BreakingChange, ModelVerdict};
use serde::Deserialize;

/// Largest diff, in characters, embedded in a prompt.
pub const MAX_DIFF_CHARS: usize = 120_000;

/// Appended to a diff cut at [`MAX_DIFF_CHARS`].
pub const TRUNCATION_MARKER: &str = "\n\n... [diff truncated] ...";

/// System message sent with every request.
pub const SYSTEM_PROMPT: &str =
    "You are UpgradeSage, an expert at analysing code diffs for breaking changes.";

const INSTRUCTIONS: &str = "\
You are an expert software maintainer. Here is a unified diff between two versions of a codebase.

Identify:
- All *breaking changes* that would likely break consumers.
- Describe WHY each one is breaking.
- Provide specific mitigation steps or upgrade paths for each.
- Provide a risk score 0-100 (0 = trivial, 100 = catastrophic).
";

const RESPONSE_SHAPE: &str = "
Return ONLY valid JSON (no markdown fences) with exactly this shape:
{
  \"riskScore\": <number>,
  \"breakingChanges\": [
    {
      \"title\": \"<short title>\",
      \"details\": \"<why it is breaking>\",
      \"mitigations\": [\"<step 1>\", \"<step 2>\"]
    }
  ],
  \"markdownReport\": \"<full human-readable Markdown report with headings, lists, risk badge>\"
}

Here is the full diff:

";

/// A rendered user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// The diff was cut at [`MAX_DIFF_CHARS`].
    pub truncated: bool,
    /// Characters of diff embedded, marker included.
    pub diff_chars: usize,
}

/// Renders the user prompt for a diff.
///
/// # Examples
///
/// ```
/// use sage_analysis::prompt::PromptBuilder;
/// use sage_core::AnalysisConfig;
///
/// let prompt = PromptBuilder::new(&AnalysisConfig::default()).build("+fn added() {}\n");
/// assert!(prompt.text.contains("+fn added() {}"));
/// assert!(prompt.text.contains("\"riskScore\""));
/// assert!(!prompt.truncated);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    guidance: Vec<&'static str>,
}

impl PromptBuilder {
    pub fn new(config: &AnalysisConfig) -> Self {
        let mut guidance = Vec::new();
        if config.breaking_changes_only {
            guidance.push(
                "- Report only breaking changes; leave additive and internal changes out of the report.",
            );
        }
        if config.include_migration_paths {
            guidance.push(
                "- For every breaking change, give a concrete migration path with before/after code where possible.",
            );
        }
        if config.validate_upgrade_logic {
            guidance.push(
                "- Only recommend upgrade steps that the diff supports; never invent APIs that are not in it.",
            );
        }
        Self { guidance }
    }

    /// Render the prompt for `diff`, truncating it when it exceeds
    /// [`MAX_DIFF_CHARS`] characters.
    pub fn build(&self, diff: &str) -> Prompt {
        let kept = truncate_chars(diff, MAX_DIFF_CHARS);
        let truncated = kept.len() < diff.len();

        let mut text = String::with_capacity(
            INSTRUCTIONS.len() + RESPONSE_SHAPE.len() + kept.len() + TRUNCATION_MARKER.len() + 512,
        );
        text.push_str(INSTRUCTIONS);
        for line in &self.guidance {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str(RESPONSE_SHAPE);
        text.push_str(kept);
        let mut diff_chars = kept.chars().count();
        if truncated {
            text.push_str(TRUNCATION_MARKER);
            diff_chars += TRUNCATION_MARKER.chars().count();
        }
        text.push('\n');

        Prompt {
            text,
            truncated,
            diff_chars,
        }
    }
}

/// Trim the reply and drop a leading fence line and a trailing fence line.
///
/// # Examples
///
/// ```
/// use sage_analysis::prompt::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
/// assert_eq!(strip_code_fences("  {}  "), "{}");
/// ```
pub fn strip_code_fences(reply: &str) -> &str {
    let mut text = reply.trim();
    if text.starts_with("```") {
        text = text.split_once('\n').map_or("", |(_, rest)| rest);
    }
    if text.ends_with("```") {
        text = text.rsplit_once('\n').map_or("", |(head, _)| head);
    }
    text
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    risk_score: serde_json::Value,
    #[serde(default)]
    breaking_changes: Option<Vec<RawChange>>,
    #[serde(default)]
    markdown_report: Option<String>,
}

#[derive(Deserialize)]
struct RawChange {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    mitigations: serde_json::Value,
}

/// Parse a model reply into a [`ModelVerdict`].
///
/// Never fails: anything that is not a JSON object with a numeric
/// `riskScore` becomes [`ModelVerdict::Degraded`]. Fractional or out of range
/// scores are rounded and clamped to `0..=100`.
///
/// # Examples
///
/// ```
/// use sage_analysis::prompt::parse_verdict;
///
/// let verdict = parse_verdict("```json\n{\"riskScore\": 42, \"breakingChanges\": []}\n```");
/// assert_eq!(verdict.into_result().risk_score, 42);
///
/// let verdict = parse_verdict("sorry, I cannot help");
/// assert!(verdict.is_degraded());
/// ```
pub fn parse_verdict(reply: &str) -> ModelVerdict {
    let cleaned = strip_code_fences(reply);
    let degraded = || ModelVerdict::Degraded {
        raw: cleaned.to_string(),
    };

    let raw: RawVerdict = match serde_json::from_str(cleaned) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "model reply is not the expected JSON");
            return degraded();
        }
    };
    let Some(risk_score) = score(&raw.risk_score) else {
        tracing::warn!(risk_score = %raw.risk_score, "model reply has no usable riskScore");
        return degraded();
    };

    let breaking_changes = raw
        .breaking_changes
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| {
            let title = c.title.filter(|t| !t.trim().is_empty())?;
            Some(BreakingChange {
                title,
                details: c.details.unwrap_or_default(),
                mitigations: steps(c.mitigations),
            })
        })
        .collect();

    ModelVerdict::Parsed(AnalysisResult {
        risk_score,
        breaking_changes,
        markdown_report: raw.markdown_report.unwrap_or_default(),
    })
}

fn score(value: &serde_json::Value) -> Option<i32> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, 100.0) as i32)
}

/// A single mitigation string is treated as a one-step list.
fn steps(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().filter_map(step).collect(),
        other => step(other).into_iter().collect(),
    }
}

fn step(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
        serde_json::Value::String(_) | serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(&AnalysisConfig::default())
    }

    #[test]
    fn short_diff_is_embedded_verbatim() {
        let prompt = builder().build("-old\n+new\n");
        assert!(prompt.text.ends_with("-old\n+new\n\n"));
        assert!(!prompt.truncated);
        assert_eq!(prompt.diff_chars, 10);
    }

    #[test]
    fn diff_at_limit_is_not_truncated() {
        let diff = "a".repeat(MAX_DIFF_CHARS);
        let prompt = builder().build(&diff);
        assert!(!prompt.truncated);
        assert!(!prompt.text.contains("[diff truncated]"));
        assert_eq!(prompt.diff_chars, MAX_DIFF_CHARS);
    }

    #[test]
    fn long_diff_is_cut_and_marked() {
        let diff = "a".repeat(MAX_DIFF_CHARS + 1);
        let prompt = builder().build(&diff);
        assert!(prompt.truncated);
        assert!(prompt.text.contains(TRUNCATION_MARKER));
        assert_eq!(
            prompt.diff_chars,
            MAX_DIFF_CHARS + TRUNCATION_MARKER.chars().count()
        );
        assert!(!prompt.text.contains(&"a".repeat(MAX_DIFF_CHARS + 1)));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let diff = "é".repeat(MAX_DIFF_CHARS);
        let prompt = builder().build(&diff);
        assert!(!prompt.truncated);

        let diff = "é".repeat(MAX_DIFF_CHARS + 5);
        let prompt = builder().build(&diff);
        assert!(prompt.truncated);
        assert!(prompt.text.contains(&"é".repeat(MAX_DIFF_CHARS)));
    }

    #[test]
    fn build_is_deterministic() {
        let b = builder();
        assert_eq!(b.build("+x\n"), b.build("+x\n"));
    }

    #[test]
    fn guidance_follows_analysis_config() {
        let config = AnalysisConfig {
            breaking_changes_only: true,
            include_migration_paths: false,
            validate_upgrade_logic: false,
        };
        let text = PromptBuilder::new(&config).build("+x").text;
        assert!(text.contains("Report only breaking changes"));
        assert!(!text.contains("migration path"));
        assert!(!text.contains("never invent APIs"));

        let text = builder().build("+x").text;
        assert!(!text.contains("Report only breaking changes"));
        assert!(text.contains("migration path"));
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```"), "");
    }

    #[test]
    fn fenced_json_parses() {
        let reply = r##"```json
{
  "riskScore": 42,
  "breakingChanges": [
    {"title": "Removed connect()", "details": "use builder", "mitigations": ["switch", ""]}
  ],
  "markdownReport": "# Report"
}
```"##;
        let ModelVerdict::Parsed(result) = parse_verdict(reply) else {
            panic!("expected parsed verdict");
        };
        assert_eq!(result.risk_score, 42);
        assert_eq!(result.breaking_changes.len(), 1);
        assert_eq!(result.breaking_changes[0].mitigations, vec!["switch"]);
        assert_eq!(result.markdown_report, "# Report");
    }

    #[test]
    fn prose_reply_degrades_with_raw_text() {
        let verdict = parse_verdict("sorry, I cannot help");
        assert_eq!(
            verdict,
            ModelVerdict::Degraded {
                raw: "sorry, I cannot help".into()
            }
        );
        let result = verdict.into_result();
        assert_eq!(result.risk_score, -1);
        assert!(result.breaking_changes.is_empty());
        assert!(result.markdown_report.contains("sorry, I cannot help"));
    }

    #[test]
    fn risk_score_is_rounded_and_clamped() {
        let parse = |s: &str| parse_verdict(s).into_result().risk_score;
        assert_eq!(parse(r#"{"riskScore": 41.6}"#), 42);
        assert_eq!(parse(r#"{"riskScore": "73"}"#), 73);
        assert_eq!(parse(r#"{"riskScore": 250}"#), 100);
        assert_eq!(parse(r#"{"riskScore": -5}"#), 0);
    }

    #[test]
    fn missing_or_bogus_score_degrades() {
        assert!(parse_verdict(r#"{"breakingChanges": []}"#).is_degraded());
        assert!(parse_verdict(r#"{"riskScore": "high"}"#).is_degraded());
        assert!(parse_verdict("[1, 2, 3]").is_degraded());
    }

    #[test]
    fn null_breaking_changes_keep_the_score() {
        let reply = r#"{"riskScore": 42, "breakingChanges": null, "markdownReport": "ok"}"#;
        let verdict = parse_verdict(reply);
        assert!(!verdict.is_degraded());
        let result = verdict.into_result();
        assert_eq!(result.risk_score, 42);
        assert!(result.breaking_changes.is_empty());
        assert_eq!(result.markdown_report, "ok");
    }

    #[test]
    fn mitigations_accept_a_bare_string() {
        let reply = r#"{"riskScore": 30, "breakingChanges": [
            {"title": "a", "mitigations": "pin the old version"},
            {"title": "b", "mitigations": null},
            {"title": "c", "mitigations": ""}
        ]}"#;
        let result = parse_verdict(reply).into_result();
        assert_eq!(result.risk_score, 30);
        assert_eq!(result.breaking_changes.len(), 3);
        assert_eq!(result.breaking_changes[0].mitigations, vec!["pin the old version"]);
        assert!(result.breaking_changes[1].mitigations.is_empty());
        assert!(result.breaking_changes[2].mitigations.is_empty());
    }

    #[test]
    fn untitled_changes_are_dropped() {
        let reply = r#"{"riskScore": 10, "breakingChanges": [{"details": "x"}, {"title": "kept"}]}"#;
        let result = parse_verdict(reply).into_result();
        assert_eq!(result.breaking_changes.len(), 1);
        assert_eq!(result.breaking_changes[0].title, "kept");
    }
}
