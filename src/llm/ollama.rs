//! Ollama (local) client.

use super::{LlmHttpConfig, LlmProvider, build_http_client, send_json};
use crate::Result;
use serde::{Deserialize, Serialize};

/// Ollama local LLM client.
pub struct OllamaClient {
    endpoint: String,
    model: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "llama3.2";

    /// Creates a new Ollama client, honouring `OLLAMA_HOST` if set.
    #[must_use]
    pub fn new() -> Self {
        let endpoint = std::env::var("OLLAMA_HOST")
            .unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::default()),
        }
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

    /// Sets HTTP client timeouts for LLM requests.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Checks if the Ollama server answers.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .is_ok_and(|r| r.status().is_success())
    }

    fn chat(&self, messages: Vec<ChatMessage<'_>>) -> Result<String> {
        tracing::debug!(provider = "ollama", model = %self.model, "Making LLM request");
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };
        let response: ChatResponse = send_json(
            "ollama",
            &self.model,
            self.client
                .post(format!("{}/api/chat", self.endpoint))
                .json(&request),
        )?;
        Ok(response.message.content)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage {
            role: "user",
            content: prompt,
        }])
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![
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
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}
