use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CompletionClient, ModelTier, OutputSchema, Prompt};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

/// Configuration for the Anthropic API client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key (from ANTHROPIC_API_KEY env var)
    pub api_key: String,
    /// Model for summaries, coaching and evaluation
    pub model: String,
    /// Smaller model for translation, labeling and extraction calls
    pub mini_model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: String, model: String, mini_model: String) -> Self {
        Self {
            api_key,
            model,
            mini_model,
            temperature: 0.0,
            max_tokens: 4096,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Anthropic Messages API client
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build Anthropic HTTP client")?;
        Ok(Self { client, config })
    }

    fn model_for(&self, tier: ModelTier) -> String {
        match tier {
            ModelTier::Primary => self.config.model.clone(),
            ModelTier::Mini => self.config.mini_model.clone(),
        }
    }

    async fn post<T: Serialize>(&self, request: &T) -> Result<AnthropicResponse> {
        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse Anthropic API response")
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_for(prompt.tier),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(prompt.system.clone()),
            messages: vec![Message::user(&prompt.user)],
        };

        let response = self.post(&request).await?;

        // Extract text from the first text block
        response
            .content
            .iter()
            .find(|c| c.content_type == "text")
            .map(|c| c.text.clone())
            .context("No text content in response")
    }

    /// Forces a single tool call whose input schema is the requested output
    async fn complete_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value> {
        let tool = Tool {
            name: schema.name.to_string(),
            description: schema.description.to_string(),
            input_schema: schema.schema.clone(),
        };

        let request = AnthropicToolRequest {
            model: self.model_for(prompt.tier),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(prompt.system.clone()),
            messages: vec![Message::user(&prompt.user)],
            tools: vec![tool],
            tool_choice: Some(ToolChoice {
                choice_type: "tool".to_string(),
                name: schema.name.to_string(),
            }),
        };

        let response = self.post(&request).await?;

        // Find the tool_use content block
        response
            .content
            .into_iter()
            .find(|c| c.content_type == "tool_use" && c.name.as_deref() == Some(schema.name))
            .and_then(|c| c.input)
            .with_context(|| format!("No tool_use response found for `{}`", schema.name))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct AnthropicToolRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_request_shape() {
        let request = AnthropicToolRequest {
            model: "m".to_string(),
            max_tokens: 10,
            temperature: None,
            system: Some("sys".to_string()),
            messages: vec![Message::user("hi")],
            tools: vec![Tool {
                name: "submit".to_string(),
                description: "d".to_string(),
                input_schema: json!({"type": "object"}),
            }],
            tool_choice: Some(ToolChoice {
                choice_type: "tool".to_string(),
                name: "submit".to_string(),
            }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("temperature").is_none());
        assert_eq!(value["tool_choice"]["type"], json!("tool"));
        assert_eq!(value["tools"][0]["input_schema"]["type"], json!("object"));
    }

    #[test]
    fn test_response_tool_block_parses() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "name": "submit", "input": {"a": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.content[1].input, Some(json!({"a": 1})));
    }
}
