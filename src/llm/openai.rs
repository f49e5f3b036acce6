use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{CompletionClient, ModelTier, OutputSchema, Prompt};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (from OPENAI_API_KEY env var); optional for local gateways
    pub api_key: Option<String>,
    /// Base URL without the `/chat/completions` suffix
    pub base_url: String,
    pub model: String,
    pub mini_model: String,
    pub temperature: f64,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: Option<String>, model: String, mini_model: String) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model,
            mini_model,
            temperature: 0.0,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for OpenAI-style `/chat/completions`
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build OpenAI HTTP client")?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn chat(&self, prompt: &Prompt, response_format: Option<Value>) -> Result<String> {
        let model = match prompt.tier {
            ModelTier::Primary => &self.config.model,
            ModelTier::Mini => &self.config.mini_model,
        };

        let request = ChatRequest {
            model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            response_format,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send request to chat completions endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error: {} - {}", status, body);
        }

        let response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("No message content in response")
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.chat(prompt, None).await
    }

    async fn complete_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value> {
        let format = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "description": schema.description,
                "schema": schema.schema,
                "strict": false
            }
        });
        let content = self.chat(prompt, Some(format)).await?;
        serde_json::from_str(&content).context("Structured response is not valid JSON")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
