//! LLM client abstraction.
//!
//! Text generation for summaries. Every provider is optional: with none
//! configured, or when a call fails, the summarizer falls back to its
//! deterministic template generator.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Trait for LLM providers.
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Providers should override this to use native system prompt support.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Generation`] if the completion fails.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\n{user}");
        self.complete(&combined)
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Takes timeouts from the LLM config section.
    #[must_use]
    pub const fn from_config(config: &LlmConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            connect_timeout_ms: config.connect_timeout_ms,
        }
    }
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Builds the configured provider, or `None` when no provider is configured.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if a hosted provider is selected without
/// an API key.
pub fn provider_from_config(config: &LlmConfig) -> Result<Option<Arc<dyn LlmProvider>>> {
    let http = LlmHttpConfig::from_config(config);
    let provider: Arc<dyn LlmProvider> = match config.provider {
        LlmProviderKind::None => return Ok(None),
        LlmProviderKind::Anthropic => {
            let mut client = AnthropicClient::new()
                .with_http_config(http)
                .with_max_tokens(config.max_tokens);
            if let Some(key) = &config.api_key {
                client = client.with_api_key(key.clone());
            }
            if let Some(model) = &config.model {
                client = client.with_model(model);
            }
            if let Some(url) = &config.base_url {
                client = client.with_endpoint(url);
            }
            if !client.has_api_key() {
                return Err(Error::InvalidInput(
                    "anthropic provider needs an API key (ANTHROPIC_API_KEY)".to_string(),
                ));
            }
            Arc::new(client)
        },
        LlmProviderKind::OpenAi => {
            let mut client = OpenAiClient::new()
                .with_http_config(http)
                .with_max_tokens(config.max_tokens);
            if let Some(key) = &config.api_key {
                client = client.with_api_key(key.clone());
            }
            if let Some(model) = &config.model {
                client = client.with_model(model);
            }
            if let Some(url) = &config.base_url {
                client = client.with_endpoint(url);
            }
            if !client.has_api_key() {
                return Err(Error::InvalidInput(
                    "openai provider needs an API key (OPENAI_API_KEY)".to_string(),
                ));
            }
            Arc::new(client)
        },
        LlmProviderKind::Ollama => {
            let mut client = OllamaClient::new().with_http_config(http);
            if let Some(model) = &config.model {
                client = client.with_model(model);
            }
            if let Some(url) = &config.base_url {
                client = client.with_endpoint(url);
            }
            Arc::new(client)
        },
    };
    tracing::info!(provider = provider.name(), "LLM provider configured");
    Ok(Some(provider))
}

/// Sends a JSON request and decodes a JSON response, mapping every failure
/// to [`Error::Generation`].
pub(crate) fn send_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    model: &str,
    request: reqwest::blocking::RequestBuilder,
) -> Result<T> {
    let operation = format!("{provider}_request");
    let response = request.send().map_err(|e| {
        let error_kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_request() {
            "request"
        } else {
            "unknown"
        };
        tracing::error!(
            provider,
            model,
            error = %e,
            error_kind,
            "LLM request failed"
        );
        Error::generation(&operation, format!("{error_kind} error: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        tracing::error!(provider, model, status = %status, body = %body, "LLM API returned error status");
        return Err(Error::generation(
            &operation,
            format!("API returned status: {status} - {body}"),
        ));
    }

    response.json().map_err(|e| {
        tracing::error!(provider, model, error = %e, "Failed to parse LLM response");
        Error::generation(format!("{provider}_response"), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_no_provider_configured() {
        assert!(provider_from_config(&LlmConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = LlmConfig {
            provider: LlmProviderKind::Ollama,
            model: Some("llama3.2".to_string()),
            ..LlmConfig::default()
        };
        let provider = provider_from_config(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_hosted_provider_with_key() {
        let config = LlmConfig {
            provider: LlmProviderKind::OpenAi,
            api_key: Some(SecretString::from("sk-test-key")),
            ..LlmConfig::default()
        };
        let provider = provider_from_config(&config).unwrap().unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_http_config_from_llm_config() {
        let config = LlmConfig {
            timeout_ms: 5,
            connect_timeout_ms: 0,
            ..LlmConfig::default()
        };
        let http = LlmHttpConfig::from_config(&config);
        assert_eq!(http.timeout_ms, 5);
        assert_eq!(http.connect_timeout_ms, 0);
        let _client = build_http_client(http);
    }
}
