//! `OpenAI` client.

use super::{LlmHttpConfig, LlmProvider, build_http_client, send_json};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// `OpenAI` chat completions client.
///
/// Also works against compatible servers via [`OpenAiClient::with_endpoint`].
pub struct OpenAiClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    /// Creates a new `OpenAI` client, reading `OPENAI_API_KEY` if set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().map(SecretString::from),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            client: build_http_client(LlmHttpConfig::default()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the completion length cap.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets HTTP client timeouts for LLM requests.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Returns true if an API key is configured.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Reasoning models take `max_completion_tokens` instead of `max_tokens`.
    fn uses_completion_tokens(&self) -> bool {
        ["gpt-5", "o1", "o3", "o4"]
            .iter()
            .any(|prefix| self.model.starts_with(prefix))
    }

    fn request(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::generation("openai_request", "OPENAI_API_KEY not set"))?;

        tracing::debug!(provider = "openai", model = %self.model, "Making LLM request");

        let (max_tokens, max_completion_tokens) = if self.uses_completion_tokens() {
            (None, Some(self.max_tokens))
        } else {
            (Some(self.max_tokens), None)
        };
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            max_completion_tokens,
        };

        let response: ChatCompletionResponse = send_json(
            "openai",
            &self.model,
            self.client
                .post(format!("{}/chat/completions", self.endpoint))
                .bearer_auth(api_key.expose_secret())
                .json(&request),
        )?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::generation("openai_response", "no choices in response"))
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ])
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("gpt-4o-mini", false ; "classic model")]
    #[test_case("gpt-5-mini", true ; "gpt5 family")]
    #[test_case("o3-mini", true ; "reasoning model")]
    fn test_token_parameter(model: &str, expected: bool) {
        let client = OpenAiClient::new().with_model(model);
        assert_eq!(client.uses_completion_tokens(), expected);
    }

    #[test]
    fn test_missing_key_is_generation_error() {
        let mut client = OpenAiClient::new();
        client.api_key = None;
        let err = client.complete("hello").unwrap_err();
        assert!(matches!(err, Error::Generation { .. }));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"The end."}}]}"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref(),
            Some("The end.")
        );
    }
}
