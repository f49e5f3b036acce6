//! Scripted completion client for stage and pipeline tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use super::{CompletionClient, OutputSchema, Prompt};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Json(Value),
}

/// Replies are routed by a substring of the system prompt; unmatched
/// prompts fail as if the model were unreachable.
#[derive(Default)]
pub struct ScriptedClient {
    routes: Vec<(String, Reply)>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text(mut self, system_contains: &str, reply: impl Into<String>) -> Self {
        self.routes
            .push((system_contains.to_string(), Reply::Text(reply.into())));
        self
    }

    pub fn on_json(mut self, system_contains: &str, reply: Value) -> Self {
        self.routes.push((system_contains.to_string(), Reply::Json(reply)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User messages seen so far
    pub fn user_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn record(&self, prompt: &Prompt) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.user.clone());
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.record(prompt);
        self.routes
            .iter()
            .find_map(|(key, reply)| match reply {
                Reply::Text(text) if prompt.system.contains(key.as_str()) => Some(text.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow!("no scripted text reply"))
    }

    async fn complete_json(&self, prompt: &Prompt, _schema: &OutputSchema) -> Result<Value> {
        self.record(prompt);
        self.routes
            .iter()
            .find_map(|(key, reply)| match reply {
                Reply::Json(value) if prompt.system.contains(key.as_str()) => Some(value.clone()),
                _ => None,
            })
            .ok_or_else(|| anyhow!("no scripted json reply"))
    }
}
