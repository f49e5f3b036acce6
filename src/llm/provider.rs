use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use super::{
    AnthropicClient, AnthropicConfig, CompletionClient, DEFAULT_OLLAMA_BASE_URL,
    DEFAULT_OPENAI_BASE_URL, OllamaClient, OllamaConfig, OpenAiClient, OpenAiConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Ollama,
}

impl Provider {
    /// Unknown provider names select the OpenAI-compatible client
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Provider::Anthropic,
            "ollama" => Provider::Ollama,
            _ => Provider::OpenAi,
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Ollama => "llama3:8b",
        }
    }
}

/// Model vendor selection, resolved once at startup
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    /// Model for translation, labeling, pattern and highlight calls
    pub mini_model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Read MODEL_PROVIDER, MODEL_NAME, MINI_MODEL_NAME, base URLs and API keys
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let provider = Provider::from_name(
            &lookup("MODEL_PROVIDER").unwrap_or_else(|| "openai".to_string()),
        );

        let model = lookup("MODEL_NAME")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());
        let mini_model = lookup("MINI_MODEL_NAME")
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| model.clone());

        let (api_key, base_url) = match provider {
            Provider::Anthropic => (lookup("ANTHROPIC_API_KEY"), None),
            Provider::OpenAi => (lookup("OPENAI_API_KEY"), lookup("OPENAI_BASE_URL")),
            Provider::Ollama => (None, lookup("OLLAMA_BASE_URL")),
        };

        let request_timeout = lookup("MODEL_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Self {
            provider,
            model,
            mini_model,
            api_key,
            base_url,
            request_timeout,
        }
    }
}

/// Build the completion client for the configured provider
pub fn build_client(config: &ProviderConfig) -> Result<Arc<dyn CompletionClient>> {
    info!(
        "Using {:?} provider (model {}, mini model {})",
        config.provider, config.model, config.mini_model
    );

    let client: Arc<dyn CompletionClient> = match config.provider {
        Provider::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .context("ANTHROPIC_API_KEY environment variable not set")?;
            let mut anthropic =
                AnthropicConfig::new(api_key, config.model.clone(), config.mini_model.clone());
            anthropic.request_timeout = config.request_timeout;
            Arc::new(AnthropicClient::new(anthropic)?)
        }
        Provider::OpenAi => {
            let mut openai = OpenAiConfig::new(
                config.api_key.clone(),
                config.model.clone(),
                config.mini_model.clone(),
            );
            openai.base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            openai.request_timeout = config.request_timeout;
            Arc::new(OpenAiClient::new(openai)?)
        }
        Provider::Ollama => Arc::new(OllamaClient::new(OllamaConfig {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            model: config.model.clone(),
            mini_model: config.mini_model.clone(),
            request_timeout: config.request_timeout,
        })?),
    };

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_openai() {
        let config = ProviderConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.mini_model, "gpt-4o-mini");
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_provider_falls_back_to_openai() {
        let config = ProviderConfig::from_lookup(lookup_from(&[("MODEL_PROVIDER", "google")]));
        assert_eq!(config.provider, Provider::OpenAi);
    }

    #[test]
    fn test_ollama_settings() {
        let config = ProviderConfig::from_lookup(lookup_from(&[
            ("MODEL_PROVIDER", "Ollama"),
            ("MODEL_NAME", "qwen2:7b"),
            ("MINI_MODEL_NAME", "qwen2:1.5b"),
            ("OLLAMA_BASE_URL", "http://gpu-box:11434"),
        ]));
        assert_eq!(config.provider, Provider::Ollama);
        assert_eq!(config.model, "qwen2:7b");
        assert_eq!(config.mini_model, "qwen2:1.5b");
        assert_eq!(config.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn test_anthropic_requires_key() {
        let config = ProviderConfig::from_lookup(lookup_from(&[("MODEL_PROVIDER", "anthropic")]));
        assert!(build_client(&config).is_err());
    }
}
