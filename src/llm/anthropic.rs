//! Anthropic Claude client.

use super::{LlmHttpConfig, LlmProvider, build_http_client, send_json};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Anthropic Claude LLM client.
pub struct AnthropicClient {
    api_key: Option<SecretString>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    /// Creates a new Anthropic client, reading `ANTHROPIC_API_KEY` if set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .map(SecretString::from),
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

    fn request(&self, system: Option<&str>, user: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::generation("anthropic_request", "ANTHROPIC_API_KEY not set"))?;

        tracing::debug!(provider = "anthropic", model = %self.model, "Making LLM request");

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let response: MessagesResponse = send_json(
            "anthropic",
            &self.model,
            self.client
                .post(format!("{}/messages", self.endpoint))
                .header("x-api-key", api_key.expose_secret())
                .header("anthropic-version", "2023-06-01")
                .json(&request),
        )?;

        let text: String = response
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(Error::generation(
                "anthropic_response",
                "no text content in response",
            ));
        }
        Ok(text)
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.request(None, prompt)
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.request(Some(system), user)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_configuration() {
        let client = AnthropicClient::new()
            .with_api_key(SecretString::from("sk-ant-test"))
            .with_endpoint("https://proxy.example/v1/")
            .with_model("claude-test")
            .with_max_tokens(64);
        assert_eq!(client.name(), "anthropic");
        assert_eq!(client.endpoint, "https://proxy.example/v1");
        assert_eq!(client.model, "claude-test");
        assert_eq!(client.max_tokens, 64);
        assert!(client.has_api_key());
    }

    #[test]
    fn test_request_serialization() {
        let request = MessagesRequest {
            model: "m",
            max_tokens: 10,
            system: None,
            messages: vec![Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"content":[{"type":"text","text":"Once"},{"type":"text","text":" upon"}]}"#;
        let response: MessagesResponse = serde_json::from_str(raw).unwrap();
        let text: String = response.content.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(text, "Once upon");
    }
}
