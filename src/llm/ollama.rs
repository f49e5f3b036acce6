use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{CompletionClient, ModelTier, OutputSchema, Prompt};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub mini_model: String,
    pub request_timeout: Duration,
}

/// Client for a local Ollama server's `/api/chat` endpoint (non-streaming)
pub struct OllamaClient {
    client: Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build Ollama HTTP client")?;
        Ok(Self { client, config })
    }

    async fn chat(&self, prompt: &Prompt, format: Option<Value>) -> Result<String> {
        let model = match prompt.tier {
            ModelTier::Primary => &self.config.model,
            ModelTier::Mini => &self.config.mini_model,
        };

        let body = ChatRequest {
            model,
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
            stream: false,
            format,
            options: json!({"temperature": 0}),
        };

        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama error: {} - {}", status, body);
        }

        let response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        Ok(response.message.content)
    }
}

#[async_trait]
impl CompletionClient for OllamaClient {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.chat(prompt, None).await
    }

    async fn complete_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value> {
        let content = self.chat(prompt, Some(schema.schema.clone())).await?;
        serde_json::from_str(&content).context("Structured response is not valid JSON")
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    options: Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}
