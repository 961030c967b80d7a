use std::time::Duration;

use sage_core::text::truncate_chars;
use sage_core::{LlmConfig, LlmProvider, ModelVerdict, SageError};
use serde::{Deserialize, Serialize};

use crate::prompt::{parse_verdict, Prompt, SYSTEM_PROMPT};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use sage_analysis::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Analyse this diff".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use sage_analysis::llm::Role;
///
/// assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Token counts reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Chat-completion client for the configured provider.
///
/// # Examples
///
/// ```
/// use sage_analysis::llm::AnalysisClient;
/// use sage_core::LlmConfig;
///
/// let config = LlmConfig {
///     base_url: Some("https://example.openai.azure.com".into()),
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = AnalysisClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
///
/// assert!(AnalysisClient::new(&LlmConfig::default()).is_err());
/// ```
pub struct AnalysisClient {
    client: reqwest::Client,
    config: LlmConfig,
    endpoint: String,
    api_key: String,
}

impl AnalysisClient {
    /// Create a client, checking that an endpoint and a credential are set.
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Config`] if the endpoint or API key is missing,
    /// and [`SageError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, SageError> {
        let (endpoint_var, key_var, _) = config.env_vars();
        let endpoint = config
            .base_url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                SageError::Config(format!(
                    "{} endpoint not set (llm.base_url or {endpoint_var})",
                    config.provider
                ))
            })?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SageError::Config(format!(
                    "{} API key not set (llm.api_key or {key_var})",
                    config.provider
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SageError::Llm(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: completions_url(config, endpoint),
            api_key: api_key.to_string(),
            config: config.clone(),
        })
    }

    pub fn model(&self) -> &str {
        self.config.model()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Send `prompt` and parse the reply.
    ///
    /// A reply that is not the expected JSON is not an error; it comes back as
    /// [`ModelVerdict::Degraded`].
    ///
    /// # Errors
    ///
    /// Returns [`SageError::Llm`] on transport failures, non-2xx statuses,
    /// and responses without a message.
    pub async fn analyze(&self, prompt: &Prompt) -> Result<(ModelVerdict, UsageDelta), SageError> {
        let messages = [
            ChatMessage {
                role: Role::System,
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: Role::User,
                content: prompt.text.clone(),
            },
        ];
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });
        if self.config.provider == LlmProvider::OpenAi {
            body["model"] = self.config.model().into();
        }

        tracing::info!(
            provider = %self.config.provider,
            model = self.model(),
            prompt_chars = prompt.text.len(),
            "calling LLM"
        );
        let mut request = self.client.post(&self.endpoint);
        request = match self.config.provider {
            LlmProvider::Azure => request.header("api-key", &self.api_key),
            LlmProvider::OpenAi => request.bearer_auth(&self.api_key),
        };

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| SageError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let body_text = truncate_chars(&body_text, 500);
            tracing::warn!(%status, body = body_text, "LLM endpoint returned an error");
            return Err(SageError::Llm(format!("LLM API error {status}: {body_text}")));
        }

        let response_body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SageError::Llm(format!("failed to parse response: {e}")))?;

        let usage = response_body.usage.unwrap_or_default();
        let delta = UsageDelta {
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        };
        tracing::info!(
            prompt_tokens = delta.prompt_tokens,
            completion_tokens = delta.completion_tokens,
            "LLM responded"
        );

        let content = response_body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SageError::Llm("response contained no message content".into()))?;

        Ok((parse_verdict(&content), delta))
    }
}

/// Full chat-completions URL for `config.provider` rooted at `endpoint`.
fn completions_url(config: &LlmConfig, endpoint: &str) -> String {
    match config.provider {
        LlmProvider::Azure => format!(
            "{endpoint}/openai/deployments/{}/chat/completions?api-version={}",
            config.model(),
            config.api_version
        ),
        LlmProvider::OpenAi => format!("{endpoint}/v1/chat/completions"),
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure() -> LlmConfig {
        LlmConfig {
            base_url: Some("https://foundry.example.com/".into()),
            api_key: Some("k".into()),
            model: Some("gpt-4o-mini".into()),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn missing_endpoint_is_config_error() {
        let config = LlmConfig {
            api_key: Some("k".into()),
            ..LlmConfig::default()
        };
        let err = AnalysisClient::new(&config).err().unwrap();
        assert!(matches!(err, SageError::Config(_)));
        assert!(err.to_string().contains("AZURE_AI_FOUNDRY_ENDPOINT"));
    }

    #[test]
    fn blank_key_is_config_error() {
        let config = LlmConfig {
            api_key: Some("  ".into()),
            ..azure()
        };
        let err = AnalysisClient::new(&config).err().unwrap();
        assert!(err.to_string().contains("AZURE_AI_FOUNDRY_API_KEY"));
    }

    #[test]
    fn azure_url_uses_deployment_and_api_version() {
        let client = AnalysisClient::new(&azure()).unwrap();
        assert_eq!(
            client.endpoint,
            "https://foundry.example.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-12-01-preview"
        );
    }

    #[test]
    fn openai_url_uses_v1_path() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            base_url: Some("http://localhost:11434".into()),
            ..azure()
        };
        let client = AnalysisClient::new(&config).unwrap();
        assert_eq!(client.endpoint, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage {
            role: Role::System,
            content: "hello".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }
}
