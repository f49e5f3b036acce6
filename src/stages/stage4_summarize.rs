use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::graph::Stage;
use crate::llm::{
    CompletionClient, Prompt, SUMMARY_SYSTEM_PROMPT, format_canonical, format_labeled,
    format_patterns,
};
use crate::models::{LabeledUtterance, Pattern, Speaker, Utterance};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Returned when there is nothing to summarize
pub const NO_CONTENT_SUMMARY: &str = "대화 내용이 없어 분석할 수 없습니다.";

/// Stage 4a: today's diagnosis in prose
pub struct SummarizeStage {
    client: Arc<dyn CompletionClient>,
}

impl SummarizeStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage<AnalysisState> for SummarizeStage {
    fn name(&self) -> &'static str {
        super::SUMMARIZE
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesNormalized, Field::UtterancesLabeled, Field::Patterns]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Summary]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let normalized = state.normalized();
        let labeled = state.labeled();
        let patterns = state.patterns();

        if normalized.is_empty() && labeled.is_empty() {
            return Ok(FieldValue::Summary(NO_CONTENT_SUMMARY.to_string()).into());
        }

        let prompt = Prompt::new(
            SUMMARY_SYSTEM_PROMPT,
            format!(
                "한국어 원문 발화:\n{}\n\n라벨링된 발화:\n{}\n\n탐지된 패턴:\n{}\n\n\
                 오늘의 대화를 진단하고 요약해주세요.",
                format_canonical(normalized),
                format_labeled(labeled),
                format_patterns(patterns)
            ),
        );

        let summary = match self.client.complete(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                warn!("Summary reply was empty, using statistical summary");
                statistical_summary(normalized, labeled, patterns)
            }
            Err(e) => {
                warn!("Summary generation failed, using statistical summary: {:#}", e);
                statistical_summary(normalized, labeled, patterns)
            }
        };

        info!("Stage 4: Summary ready ({} chars)", summary.chars().count());
        Ok(FieldValue::Summary(summary).into())
    }
}

/// Deterministic summary from utterance counts, label distribution and patterns
pub fn statistical_summary(
    normalized: &[Utterance],
    labeled: &[LabeledUtterance],
    patterns: &[Pattern],
) -> String {
    let (total, parents) = if labeled.is_empty() {
        (
            normalized.len(),
            normalized.iter().filter(|u| u.speaker == Speaker::Parent).count(),
        )
    } else {
        (labeled.len(), labeled.iter().filter(|u| u.is_parent()).count())
    };

    let mut lines = vec![format!(
        "총 {}개의 발화 (부모 {}개, 아이 {}개)가 분석되었습니다.",
        total,
        parents,
        total - parents
    )];

    if !labeled.is_empty() {
        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for u in labeled {
            *distribution.entry(u.label.as_str()).or_default() += 1;
        }
        let rendered = distribution
            .iter()
            .map(|(code, count)| format!("{code} {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("라벨 분포: {rendered}"));
    }

    if patterns.is_empty() {
        lines.push("탐지된 패턴이 없습니다.".to_string());
    } else {
        let mut names: Vec<&str> = Vec::new();
        for p in patterns {
            if !names.contains(&p.pattern_name.as_str()) {
                names.push(&p.pattern_name);
            }
        }
        lines.push(format!("탐지된 패턴: {}", names.join(", ")));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::models::{DpicsCode, Severity};

    fn labeled(speaker: Speaker, label: DpicsCode) -> LabeledUtterance {
        LabeledUtterance {
            speaker,
            original_ko: "x".to_string(),
            english: "x".to_string(),
            label,
        }
    }

    fn state() -> AnalysisState {
        AnalysisState {
            utterances_normalized: Some(vec![
                Utterance::new(Speaker::Parent, "숙제 했니?"),
                Utterance::new(Speaker::Child, "하기 싫어."),
            ]),
            utterances_labeled: Some(vec![
                labeled(Speaker::Parent, DpicsCode::Question),
                labeled(Speaker::Child, DpicsCode::Negative),
            ]),
            patterns: Some(vec![
                Pattern::new("공감부족", "d", vec![1], Severity::Medium),
                Pattern::new("공감부족", "d2", vec![0], Severity::Low),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_statistical_summary() {
        let s = state();
        let summary = statistical_summary(s.normalized(), s.labeled(), s.patterns());
        assert_eq!(
            summary,
            "총 2개의 발화 (부모 1개, 아이 1개)가 분석되었습니다.\n\
             라벨 분포: NEG 1, Q 1\n\
             탐지된 패턴: 공감부족"
        );
    }

    #[tokio::test]
    async fn test_empty_dialogue_has_no_content_message() {
        let client = Arc::new(ScriptedClient::new());
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(
            &mut merged,
            SummarizeStage::new(client.clone())
                .run(&AnalysisState::default())
                .await
                .unwrap(),
        );
        assert_eq!(merged.summary.as_deref(), Some(NO_CONTENT_SUMMARY));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_reply_is_trimmed() {
        let client = ScriptedClient::new()
            .on_text("parenting coach reviewing", "  오늘은 질문이 많았습니다.\n");
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(
            &mut merged,
            SummarizeStage::new(Arc::new(client)).run(&state()).await.unwrap(),
        );
        assert_eq!(merged.summary.as_deref(), Some("오늘은 질문이 많았습니다."));
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_statistics() {
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(
            &mut merged,
            SummarizeStage::new(Arc::new(ScriptedClient::new()))
                .run(&state())
                .await
                .unwrap(),
        );
        assert!(merged.summary.unwrap().starts_with("총 2개의 발화"));
    }
}
