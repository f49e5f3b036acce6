use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::heuristic;
use crate::llm::{CompletionClient, DPICS_SYSTEM_PROMPT, Prompt, first_json_array};
use crate::models::DpicsCode;

/// DPICS labeling through a completion model, with keyword fallback
pub struct PromptClassifier {
    client: Arc<dyn CompletionClient>,
}

impl PromptClassifier {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    pub async fn classify(&self, lines: &[String]) -> Vec<(String, DpicsCode)> {
        let prompt = Prompt::new(
            DPICS_SYSTEM_PROMPT,
            format!(
                "Lines (one per line, keep text exactly):\n{}\n\nRespond with a JSON array only.",
                lines.join("\n")
            ),
        )
        .mini();

        match self.client.complete(&prompt).await {
            Ok(reply) => match parse_labels(&reply) {
                Some(labels) => {
                    debug!("Prompt classifier labeled {} lines", labels.len());
                    return labels;
                }
                None => warn!("DPICS reply had no usable labels, using keyword heuristics"),
            },
            Err(e) => warn!("DPICS labeling call failed, using keyword heuristics: {:#}", e),
        }

        heuristic::label_lines(lines)
    }
}

/// Parse `[{"line": ..., "code": ...}]`; `None` when nothing usable came back
pub fn parse_labels(reply: &str) -> Option<Vec<(String, DpicsCode)>> {
    let items = first_json_array(reply)?;
    let labels: Vec<(String, DpicsCode)> = items
        .iter()
        .filter_map(|item| {
            let line = match item.get("line")? {
                Value::String(s) => s.trim().to_string(),
                Value::Null => return None,
                other => other.to_string(),
            };
            if line.is_empty() {
                return None;
            }
            let code = item
                .get("code")
                .and_then(Value::as_str)
                .map(DpicsCode::parse_or_other)
                .unwrap_or(DpicsCode::Other);
            Some((line, code))
        })
        .collect();

    (!labels.is_empty()).then_some(labels)
}
