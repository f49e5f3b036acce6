use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Which configured model a request should go to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelTier {
    #[default]
    Primary,
    /// Cheaper model for translation, labeling and extraction
    Mini,
}

/// A single-turn chat prompt
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub tier: ModelTier,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            tier: ModelTier::Primary,
        }
    }

    pub fn mini(mut self) -> Self {
        self.tier = ModelTier::Mini;
        self
    }
}

/// JSON schema a structured completion must conform to
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
}

/// A text-completion capability backed by some model vendor
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Short vendor name for logs
    fn provider(&self) -> &'static str;

    /// Free-text completion
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    /// Completion constrained to `schema`, returned as raw JSON
    async fn complete_json(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value>;
}

/// Structured completion deserialized into `T`.
///
/// Fails when the model output does not deserialize, so callers can fall back.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn CompletionClient,
    prompt: &Prompt,
    schema: &OutputSchema,
) -> Result<T> {
    let value = client.complete_json(prompt, schema).await?;
    serde_json::from_value(value)
        .with_context(|| format!("Model output does not match schema `{}`", schema.name))
}
