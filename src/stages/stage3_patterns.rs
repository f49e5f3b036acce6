use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::graph::Stage;
use crate::llm::{CompletionClient, PATTERN_SYSTEM_PROMPT, Prompt, first_json_array, format_labeled};
use crate::models::{
    COMMAND_WITHOUT_CHOICE, CRITICAL_RESPONSE, DpicsCode, LabeledUtterance,
    MISSED_POSITIVE_OPPORTUNITY, Pattern, Severity, Speaker, dedup_patterns,
};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Stage 3: rule and model pattern detection
pub struct PatternStage {
    client: Arc<dyn CompletionClient>,
}

impl PatternStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    async fn model_patterns(&self, labeled: &[LabeledUtterance]) -> Vec<Pattern> {
        let prompt = Prompt::new(
            PATTERN_SYSTEM_PROMPT,
            format!(
                "Labeled utterances:\n{}\n\nDetect interaction patterns and return a JSON array only.",
                format_labeled(labeled)
            ),
        )
        .mini();

        match self.client.complete(&prompt).await {
            Ok(reply) => match first_json_array(&reply) {
                Some(items) => parse_model_patterns(&items, labeled.len()),
                None => {
                    warn!("Pattern reply contained no JSON array");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Model pattern detection failed: {:#}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Stage<AnalysisState> for PatternStage {
    fn name(&self) -> &'static str {
        super::DETECT_PATTERNS
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesLabeled]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Patterns]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let labeled = state.labeled();
        if labeled.is_empty() {
            return Ok(FieldValue::Patterns(Vec::new()).into());
        }

        let mut patterns = rule_patterns(labeled);
        let rule_count = patterns.len();
        patterns.extend(self.model_patterns(labeled).await);
        let patterns = dedup_patterns(patterns);

        info!(
            "Stage 3: {} patterns ({} from rules)",
            patterns.len(),
            rule_count
        );

        Ok(FieldValue::Patterns(patterns).into())
    }
}

/// Deterministic patterns over adjacent labeled utterances
pub fn rule_patterns(labeled: &[LabeledUtterance]) -> Vec<Pattern> {
    let mut patterns = Vec::new();

    for (i, pair) in labeled.windows(2).enumerate() {
        let (child, parent) = (&pair[0], &pair[1]);
        if child.speaker == Speaker::Child
            && child.label == DpicsCode::BehaviorDescription
            && parent.speaker == Speaker::Parent
            && parent.label != DpicsCode::Praise
        {
            patterns.push(Pattern::new(
                MISSED_POSITIVE_OPPORTUNITY,
                format!("Child's positive behavior at index {i} was not praised"),
                vec![i, i + 1],
                Severity::Medium,
            ));
        }
    }

    for (i, u) in labeled.iter().enumerate().filter(|(_, u)| u.is_parent()) {
        if u.label == DpicsCode::Command {
            patterns.push(Pattern::new(
                COMMAND_WITHOUT_CHOICE,
                format!("Command given without offering choice at index {i}"),
                vec![i],
                Severity::Low,
            ));
        }
    }

    for (i, u) in labeled.iter().enumerate().filter(|(_, u)| u.is_parent()) {
        if u.label == DpicsCode::Negative {
            patterns.push(Pattern::new(
                CRITICAL_RESPONSE,
                format!("Critical response at index {i}"),
                vec![i],
                Severity::High,
            ));
        }
    }

    patterns
}

/// Lenient parse of model-reported patterns.
///
/// Entries without a name are skipped, indices outside the dialogue are
/// dropped, and unknown severities become low.
pub fn parse_model_patterns(items: &[Value], utterance_count: usize) -> Vec<Pattern> {
    items
        .iter()
        .filter_map(|item| {
            let name = item.get("pattern_name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }

            let description = item
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim();

            let indices: Vec<usize> = item
                .get("utterance_indices")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| match v {
                            Value::Number(n) => n.as_u64().map(|i| i as usize),
                            Value::String(s) => s.trim().parse().ok(),
                            _ => None,
                        })
                        .filter(|&i| i < utterance_count)
                        .collect()
                })
                .unwrap_or_default();

            let severity = item
                .get("severity")
                .and_then(Value::as_str)
                .map(Severity::parse_lenient)
                .unwrap_or_default();

            Some(Pattern::new(name, description, indices, severity))
        })
        .collect()
}
