//! Two-step advice flow: DPICS annotation and highlight extraction run side
//! by side on the raw dialogue, then a single advice completion reads both.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::align::{align_lines, dedup_lines, lines_by_indices, lines_by_text};
use crate::classify::DpicsClassifier;
use crate::graph::Stage;
use crate::llm::{
    ADVICE_SYSTEM_PROMPT, CompletionClient, HIGHLIGHT_SYSTEM_PROMPT, NONE_MARKER, Prompt,
    first_json_object, format_numbered,
};
use crate::models::DpicsCode;
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Advice returned when no dialogue was supplied
pub const EMPTY_DIALOGUE_ADVICE: &str =
    "대화 내용이 비어있어요. 부모-아이 발화를 함께 제공해주세요.";

const MAX_HIGHLIGHTS: usize = 10;
const MAX_FALLBACK_HIGHLIGHTS: usize = 7;
const DISTRESS_KEYWORDS: [&str; 3] = ["싫어", "어려워", "힘들"];

/// Trimmed, non-blank dialogue lines
fn dialogue_lines(state: &AnalysisState) -> Vec<String> {
    state
        .message_text()
        .map(|m| {
            m.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Labels raw dialogue lines as `[DPICS:CODE] line`
pub struct AnnotateStage {
    classifier: Arc<DpicsClassifier>,
}

impl AnnotateStage {
    pub fn new(classifier: Arc<DpicsClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage<AnalysisState> for AnnotateStage {
    fn name(&self) -> &'static str {
        super::DPICS_ANNOTATE
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::Message]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Annotated]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let lines = dialogue_lines(state);
        if lines.is_empty() {
            return Ok(FieldValue::Annotated(String::new()).into());
        }

        let pairs = self.classifier.classify(&lines).await;
        let annotated = annotate_lines(&lines, &pairs);
        info!("Annotated {} dialogue lines", lines.len());
        Ok(FieldValue::Annotated(annotated).into())
    }
}

/// One `[DPICS:CODE] line` per source line, in source order
pub fn annotate_lines(lines: &[String], pairs: &[(String, DpicsCode)]) -> String {
    let candidates: Vec<&str> = pairs.iter().map(|(line, _)| line.as_str()).collect();
    let alignment = align_lines(lines, &candidates);
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let code = alignment
                .candidate_for(i)
                .map(|c| pairs[c].1)
                .unwrap_or(DpicsCode::Other);
            format!("[DPICS:{code}] {line}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Picks the dialogue lines worth commenting on
pub struct HighlightStage {
    client: Arc<dyn CompletionClient>,
}

impl HighlightStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage<AnalysisState> for HighlightStage {
    fn name(&self) -> &'static str {
        super::HIGHLIGHT_EXTRACT
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::Message]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Highlights]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let lines = dialogue_lines(state);
        if lines.is_empty() {
            return Ok(FieldValue::Highlights(Vec::new()).into());
        }

        let prompt = Prompt::new(
            HIGHLIGHT_SYSTEM_PROMPT,
            format!(
                "Numbered lines (index: text):\n{}\n\nReturn JSON only with 'indices'.",
                format_numbered(&lines)
            ),
        )
        .mini();

        let picked = match self.client.complete(&prompt).await {
            Ok(reply) => parse_highlights(&reply, &lines),
            Err(e) => {
                warn!("Highlight extraction failed: {:#}", e);
                Vec::new()
            }
        };

        let highlights = if picked.is_empty() {
            warn!("No usable highlights from model, using line heuristics");
            fallback_highlights(&lines)
        } else {
            picked
        };

        info!("Extracted {} highlights", highlights.len());
        Ok(FieldValue::Highlights(highlights).into())
    }
}

/// Lines named by `{"indices": [..]}`, else by `{"highlights": [..]}` text
pub fn parse_highlights(reply: &str, lines: &[String]) -> Vec<String> {
    let Some(object) = first_json_object(reply) else {
        return Vec::new();
    };

    let mut picked = match object.get("indices") {
        Some(Value::Array(indices)) => dedup_lines(lines_by_indices(indices, lines)),
        _ => Vec::new(),
    };

    if picked.is_empty() {
        if let Some(Value::Array(quoted)) = object.get("highlights") {
            let quoted: Vec<String> = quoted
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            picked = dedup_lines(lines_by_text(&quoted, lines));
        }
    }

    picked.truncate(MAX_HIGHLIGHTS);
    picked
}

/// First line, questions, distress lines and the last line
pub fn fallback_highlights(lines: &[String]) -> Vec<String> {
    let mut picks: Vec<String> = lines.first().cloned().into_iter().collect();
    picks.extend(lines.iter().filter(|l| l.ends_with('?')).take(3).cloned());
    picks.extend(
        lines
            .iter()
            .filter(|l| DISTRESS_KEYWORDS.iter().any(|k| l.contains(k)))
            .take(3)
            .cloned(),
    );
    if lines.len() > 1 {
        picks.extend(lines.last().cloned());
    }

    let mut picks = dedup_lines(picks);
    picks.truncate(MAX_FALLBACK_HIGHLIGHTS);
    picks
}

/// Writes caregiver advice from the dialogue, annotations and highlights
pub struct AdviceStage {
    client: Arc<dyn CompletionClient>,
}

impl AdviceStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage<AnalysisState> for AdviceStage {
    fn name(&self) -> &'static str {
        super::PARENTING_ADVICE
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::Message, Field::Context, Field::Annotated, Field::Highlights]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Advice]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let Some(dialogue) = state.message_text() else {
            return Ok(FieldValue::Advice(EMPTY_DIALOGUE_ADVICE.to_string()).into());
        };

        let highlights = state.highlights.as_deref().unwrap_or(&[]);
        let highlights_text = if highlights.is_empty() {
            NONE_MARKER.to_string()
        } else {
            highlights
                .iter()
                .take(MAX_HIGHLIGHTS)
                .map(|h| format!("- {h}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = Prompt::new(
            ADVICE_SYSTEM_PROMPT,
            format!(
                "원문 대화:\n{}\n\n라인별 DPICS 라벨링:\n{}\n\n발화 하이라이트(원문):\n{}\n\n추가 맥락(선택): {}",
                dialogue.trim(),
                state.annotated.as_deref().unwrap_or_default(),
                highlights_text,
                state.context.as_deref().unwrap_or_default()
            ),
        );

        let advice = match self.client.complete(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => {
                warn!("Advice reply was empty, using highlight-based advice");
                fallback_advice(highlights)
            }
            Err(e) => {
                warn!("Advice generation failed, using highlight-based advice: {:#}", e);
                fallback_advice(highlights)
            }
        };

        info!("Advice ready ({} chars)", advice.chars().count());
        Ok(FieldValue::Advice(advice).into())
    }
}

/// Deterministic advice with one feedback sentence per highlight
pub fn fallback_advice(highlights: &[String]) -> String {
    let mut sections = vec![
        "## 핵심 이슈\n아이의 말 뒤에 있는 감정을 먼저 읽어주는 것이 중요해요.".to_string(),
        "## 공감 멘트\n\"그랬구나, 그래서 속상했구나.\"처럼 아이의 마음을 말로 표현해 주세요.".to_string(),
        "## 즉시 실행 팁\n1. 아이가 말을 마칠 때까지 기다려 주세요.\n\
         2. 질문보다 아이의 말을 그대로 되돌려 주는 반영을 먼저 해 주세요.\n\
         3. 잘한 행동은 구체적으로 칭찬해 주세요."
            .to_string(),
        "## 주의사항\n비난이나 명령으로 대화를 끝내지 않도록 주의해 주세요.".to_string(),
    ];

    if !highlights.is_empty() {
        let feedback = highlights
            .iter()
            .take(MAX_HIGHLIGHTS)
            .map(|h| {
                let note = if DISTRESS_KEYWORDS.iter().any(|k| h.contains(k)) {
                    "아이의 힘든 감정을 먼저 말로 읽어주세요."
                } else if h.ends_with('?') {
                    "질문 대신 아이의 말을 반영해 보세요."
                } else {
                    "이 순간 아이의 반응을 함께 살펴보세요."
                };
                format!("- \"{h}\": {note}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("## 하이라이트별 피드백\n{feedback}"));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierConfig;
    use crate::llm::testing::ScriptedClient;

    const DIALOGUE: &str = "부모: 숙제 했니?\n아이: 하기 싫어.\n\n부모: 왜?\n아이: 너무 어려워.";

    fn lines() -> Vec<String> {
        DIALOGUE
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn state() -> AnalysisState {
        AnalysisState {
            message: Some(DIALOGUE.to_string()),
            ..Default::default()
        }
    }

    fn merged(update: StateUpdate) -> AnalysisState {
        let mut state = AnalysisState::default();
        crate::graph::GraphState::merge(&mut state, update);
        state
    }

    #[test]
    fn test_annotate_lines_aligns_and_defaults() {
        let lines = lines();
        let pairs = vec![
            ("부모: 숙제 했니?".to_string(), DpicsCode::Question),
            ("아이: 하기 싫어".to_string(), DpicsCode::Negative),
        ];
        let annotated = annotate_lines(&lines[..3], &pairs);
        assert_eq!(
            annotated,
            "[DPICS:Q] 부모: 숙제 했니?\n[DPICS:NEG] 아이: 하기 싫어.\n[DPICS:OTH] 부모: 왜?"
        );
    }

    #[test]
    fn test_parse_highlights() {
        let lines = lines();
        assert_eq!(
            parse_highlights(r#"{"indices": [3, 0, 3, 42]}"#, &lines),
            vec![lines[3].clone(), lines[0].clone()]
        );
        assert_eq!(
            parse_highlights(r#"sure! {"indices": [], "highlights": ["하기 싫어"]}"#, &lines),
            vec![lines[1].clone()]
        );
        assert!(parse_highlights("no json here", &lines).is_empty());
    }

    #[test]
    fn test_fallback_highlights() {
        let picks = fallback_highlights(&lines());
        assert_eq!(
            picks,
            vec!["부모: 숙제 했니?", "부모: 왜?", "아이: 하기 싫어.", "아이: 너무 어려워."]
        );
        assert_eq!(fallback_highlights(&["하나".to_string()]), vec!["하나"]);
    }

    #[test]
    fn test_fallback_advice_quotes_highlights() {
        let advice = fallback_advice(&["아이: 너무 어려워.".to_string(), "부모: 왜?".to_string()]);
        assert!(
            advice.contains("- \"아이: 너무 어려워.\": 아이의 힘든 감정을 먼저 말로 읽어주세요.")
        );
        assert!(advice.contains("- \"부모: 왜?\": 질문 대신"));
        assert!(!fallback_advice(&[]).contains("하이라이트별 피드백"));
    }

    #[tokio::test]
    async fn test_annotate_stage_uses_heuristics_offline() {
        let mut config = ClassifierConfig::default();
        config.use_electra = false;
        let classifier = Arc::new(DpicsClassifier::new(config, Arc::new(ScriptedClient::new())));
        let state = merged(AnnotateStage::new(classifier).run(&state()).await.unwrap());
        let annotated = state.annotated.unwrap();
        assert_eq!(annotated.lines().count(), 4);
        assert!(annotated.lines().all(|l| l.starts_with("[DPICS:")));
        assert!(annotated.starts_with("[DPICS:Q] 부모: 숙제 했니?"));
    }

    #[tokio::test]
    async fn test_highlight_stage_falls_back() {
        let client = ScriptedClient::new().on_text("highlight lines", "I cannot decide.");
        let state = merged(HighlightStage::new(Arc::new(client)).run(&state()).await.unwrap());
        assert_eq!(state.highlights.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_advice_stage() {
        let client = Arc::new(ScriptedClient::new().on_text("pediatric", "  공감해 주세요.  "));
        let mut input = state();
        input.highlights = Some(vec!["아이: 하기 싫어.".to_string()]);
        input.context = Some("초등학생".to_string());
        let state = merged(AdviceStage::new(client.clone()).run(&input).await.unwrap());
        assert_eq!(state.advice.as_deref(), Some("공감해 주세요."));
        let prompt = &client.user_prompts()[0];
        assert!(prompt.contains("- 아이: 하기 싫어."));
        assert!(prompt.contains("추가 맥락(선택): 초등학생"));
    }

    #[tokio::test]
    async fn test_advice_empty_dialogue() {
        let client = Arc::new(ScriptedClient::new());
        let update = AdviceStage::new(client.clone())
            .run(&AnalysisState::default())
            .await
            .unwrap();
        let state = merged(update);
        assert_eq!(state.advice.as_deref(), Some(EMPTY_DIALOGUE_ADVICE));
        assert_eq!(client.calls(), 0);
    }
}
