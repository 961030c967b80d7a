use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SageError;

/// File name looked up in the working directory and then in `$HOME`.
pub const CONFIG_FILE_NAME: &str = ".upgradesage.toml";

const REDACTED: &str = "***";

/// Top-level configuration loaded from `.upgradesage.toml`.
///
/// Resolution order: explicit values (request / CLI) > config file > env vars >
/// defaults. The pipeline only ever reads it.
///
/// # Examples
///
/// ```
/// use sage_core::SageConfig;
///
/// let config = SageConfig::default();
/// assert_eq!(config.usage.token_usage_threshold, 80);
/// assert!(config.show_startup_check);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SageConfig {
    /// Print the startup check line at the beginning of every analysis.
    #[serde(default = "default_true")]
    pub show_startup_check: bool,
    /// LLM endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// GitHub access settings.
    #[serde(default)]
    pub github: GithubConfig,
    /// Token monitoring settings.
    #[serde(default)]
    pub usage: UsageConfig,
    /// Prompt preferences.
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Git subprocess settings.
    #[serde(default)]
    pub git: GitConfig,
}

impl Default for SageConfig {
    fn default() -> Self {
        Self {
            show_startup_check: true,
            llm: LlmConfig::default(),
            github: GithubConfig::default(),
            usage: UsageConfig::default(),
            analysis: AnalysisConfig::default(),
            git: GitConfig::default(),
        }
    }
}

impl SageConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Io`] if the file cannot be read, or
    /// [`SageError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sage_core::SageConfig;
    /// use std::path::Path;
    ///
    /// let config = SageConfig::from_file(Path::new(".upgradesage.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, SageError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_core::SageConfig;
    ///
    /// let toml = r#"
    /// [usage]
    /// token_usage_threshold = 90
    /// "#;
    /// let config = SageConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.usage.token_usage_threshold, 90);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, SageError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Locate the config file: `cwd` first, then `home`.
    ///
    /// Returns `None` when neither directory holds a [`CONFIG_FILE_NAME`].
    pub fn discover(cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
        std::iter::once(cwd)
            .chain(home)
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Fill unset secrets and endpoints from environment variables.
    ///
    /// Values already present in the file win. `env` is injected so callers can
    /// resolve against something other than the process environment.
    ///
    /// # Examples
    ///
    /// ```
    /// use sage_core::SageConfig;
    ///
    /// let config = SageConfig::default().with_env(|name| match name {
    ///     "GITHUB_TOKEN" => Some("ghp_env".into()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.github.token.as_deref(), Some("ghp_env"));
    /// ```
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| non_blank(env(name));
        self.llm = self.llm.with_env(&env);
        self.github.token = non_blank(self.github.token.take())
            .or_else(|| env("GITHUB_TOKEN"))
            .or_else(|| env("GH_TOKEN"));
        self
    }

    /// Copy of the configuration with every secret replaced by `***`.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some(REDACTED.into());
        }
        if copy.github.token.is_some() {
            copy.github.token = Some(REDACTED.into());
        }
        copy
    }
}

/// Read a process environment variable, treating empty values as unset.
pub fn process_env(name: &str) -> Option<String> {
    non_blank(std::env::var(name).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Supported chat-completion endpoint flavors.
///
/// # Examples
///
/// ```
/// use sage_core::LlmProvider;
///
/// let p: LlmProvider = serde_json::from_str("\"openai\"").unwrap();
/// assert_eq!(p, LlmProvider::OpenAi);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Azure AI Foundry deployment (`api-key` header).
    #[default]
    Azure,
    /// Any OpenAI-compatible `/v1/chat/completions` endpoint (bearer token).
    OpenAi,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Azure => write!(f, "azure"),
            LlmProvider::OpenAi => write!(f, "openai"),
        }
    }
}

/// LLM endpoint configuration.
///
/// # Examples
///
/// ```
/// use sage_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model(), "gpt-4o");
/// assert_eq!(config.max_tokens, 4096);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoint flavor.
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model or deployment name.
    pub model: Option<String>,
    /// Endpoint base URL.
    pub base_url: Option<String>,
    /// Credential for the endpoint.
    pub api_key: Option<String>,
    /// Azure `api-version` query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Completion token cap sent with each request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

const DEFAULT_MODEL: &str = "gpt-4o";

fn default_api_version() -> String {
    "2024-12-01-preview".into()
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout_secs() -> u64 {
    180
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            base_url: None,
            api_key: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// The configured model, or `gpt-4o`.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Names of the environment variables consulted for this provider:
    /// `(endpoint, api key, model)`.
    pub fn env_vars(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self.provider {
            LlmProvider::Azure => (
                "AZURE_AI_FOUNDRY_ENDPOINT",
                "AZURE_AI_FOUNDRY_API_KEY",
                Some("AZURE_AI_FOUNDRY_MODEL"),
            ),
            LlmProvider::OpenAi => ("OPENAI_BASE_URL", "OPENAI_API_KEY", None),
        }
    }

    fn with_env<F>(mut self, env: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (endpoint_var, key_var, model_var) = self.env_vars();
        self.base_url = non_blank(self.base_url.take()).or_else(|| env(endpoint_var));
        self.api_key = non_blank(self.api_key.take()).or_else(|| env(key_var));
        self.model = non_blank(self.model.take()).or_else(|| model_var.and_then(env));
        self
    }
}

/// GitHub access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token injected into `github.com` clone URLs.
    pub token: Option<String>,
    /// Allow analysis of public repositories.
    #[serde(default = "default_true")]
    pub include_public_repos: bool,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            include_public_repos: true,
        }
    }
}

/// Token monitoring configuration.
///
/// # Examples
///
/// ```
/// use sage_core::UsageConfig;
///
/// let config = UsageConfig::default();
/// assert!(config.enable_token_monitoring);
/// assert_eq!(config.max_tokens_per_request, 120_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Track usage and emit threshold alerts.
    #[serde(default = "default_true")]
    pub enable_token_monitoring: bool,
    /// Alert threshold as a percentage of `max_tokens_per_request`.
    #[serde(default = "default_threshold")]
    pub token_usage_threshold: u32,
    /// Token budget the threshold is measured against.
    #[serde(default = "default_max_tokens_per_request")]
    pub max_tokens_per_request: u64,
}

fn default_threshold() -> u32 {
    80
}

fn default_max_tokens_per_request() -> u64 {
    120_000
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            enable_token_monitoring: true,
            token_usage_threshold: default_threshold(),
            max_tokens_per_request: default_max_tokens_per_request(),
        }
    }
}

/// Preferences folded into the analysis prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ask the model to skip non-breaking changes entirely.
    #[serde(default)]
    pub breaking_changes_only: bool,
    /// Ask for concrete migration paths per breaking change.
    #[serde(default = "default_true")]
    pub include_migration_paths: bool,
    /// Ask the model to check that suggested upgrade paths are coherent.
    #[serde(default = "default_true")]
    pub validate_upgrade_logic: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            breaking_changes_only: false,
            include_migration_paths: true,
            validate_upgrade_logic: true,
        }
    }
}

/// Git subprocess configuration.
///
/// # Examples
///
/// ```
/// use sage_core::GitConfig;
/// use std::time::Duration;
///
/// let config = GitConfig::default();
/// assert_eq!(config.network_timeout(), Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Git executable.
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Parent directory for ephemeral mirrors (default: system temp dir).
    pub mirror_root: Option<PathBuf>,
    /// Deadline for local plumbing (`init`, `remote`, `rev-parse`, `tag`).
    #[serde(default = "default_local_timeout_secs")]
    pub local_timeout_secs: u64,
    /// Deadline for each `fetch`.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// Deadline for each `diff`.
    #[serde(default = "default_diff_timeout_secs")]
    pub diff_timeout_secs: u64,
}

fn default_git_binary() -> String {
    "git".into()
}

fn default_local_timeout_secs() -> u64 {
    10
}

fn default_network_timeout_secs() -> u64 {
    300
}

fn default_diff_timeout_secs() -> u64 {
    120
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            mirror_root: None,
            local_timeout_secs: default_local_timeout_secs(),
            network_timeout_secs: default_network_timeout_secs(),
            diff_timeout_secs: default_diff_timeout_secs(),
        }
    }
}

impl GitConfig {
    pub fn local_timeout(&self) -> Duration {
        Duration::from_secs(self.local_timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn diff_timeout(&self) -> Duration {
        Duration::from_secs(self.diff_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}
