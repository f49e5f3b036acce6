use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::align::reconstruct_line;
use crate::graph::Stage;
use crate::llm::{
    CompletionClient, KEY_MOMENTS_SYSTEM_PROMPT, Prompt, complete_structured, format_patterns,
    key_moments_schema,
};
use crate::models::{
    DialogueLine, DpicsCode, ImprovementMoment, KeyMoments, LabeledUtterance, Pattern,
    PatternExample, PositiveMoment,
};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Hints attached to label-derived moments
pub const POSITIVE_HINT: &str = "긍정적 상호작용";
pub const IMPROVEMENT_HINT: &str = "개선 필요";

/// Caps applied when key moments are derived without a model
#[derive(Debug, Clone)]
pub struct KeyMomentLimits {
    /// Patterns turned into examples, in detection order
    pub max_pattern_examples: usize,
    /// Dialogue lines quoted per pattern example
    pub lines_per_example: usize,
    pub max_positive: usize,
    pub max_improvement: usize,
}

impl Default for KeyMomentLimits {
    fn default() -> Self {
        Self {
            max_pattern_examples: 5,
            lines_per_example: 5,
            max_positive: 3,
            max_improvement: 3,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawLine {
    #[serde(default)]
    speaker: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawMoment {
    #[serde(default)]
    dialogue: Vec<RawLine>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    better_response: String,
    #[serde(default)]
    pattern_hint: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPatternExample {
    #[serde(default)]
    pattern_name: String,
    occurrences: Option<usize>,
    #[serde(default)]
    dialogue: Vec<RawLine>,
    #[serde(default)]
    problem_explanation: String,
    #[serde(default)]
    suggested_response: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawKeyMoments {
    #[serde(default)]
    positive: Vec<RawMoment>,
    #[serde(default)]
    needs_improvement: Vec<RawMoment>,
    #[serde(default)]
    pattern_examples: Vec<RawPatternExample>,
}

#[derive(Debug, Deserialize)]
struct KeyMomentsResponse {
    key_moments: RawKeyMoments,
}

/// Stage 4b: extract positive, improvable and pattern-illustrating moments
pub struct KeyMomentsStage {
    client: Arc<dyn CompletionClient>,
    limits: KeyMomentLimits,
}

impl KeyMomentsStage {
    pub fn new(client: Arc<dyn CompletionClient>, limits: KeyMomentLimits) -> Self {
        Self { client, limits }
    }
}

#[async_trait]
impl Stage<AnalysisState> for KeyMomentsStage {
    fn name(&self) -> &'static str {
        super::KEY_MOMENTS
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesLabeled, Field::Patterns]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::KeyMoments]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let labeled = state.labeled();
        let patterns = state.patterns();
        if labeled.is_empty() {
            return Ok(FieldValue::KeyMoments(KeyMoments::default()).into());
        }

        let utterances = labeled
            .iter()
            .enumerate()
            .map(|(i, u)| format!("{}. [{}] [{}] {}", i, u.speaker.role(), u.label, u.original_ko))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = Prompt::new(
            KEY_MOMENTS_SYSTEM_PROMPT,
            format!(
                "라벨링된 발화:\n{}\n\n감지된 패턴:\n{}\n\n\
                 상호작용에서 핵심 순간을 추출하고 분류하세요. \
                 각 순간에 대해 발화자와 한국어 원문 텍스트가 포함된 실제 대화 발췌를 포함하세요.",
                utterances,
                format_patterns(patterns)
            ),
        );

        let moments = match complete_structured::<KeyMomentsResponse>(
            self.client.as_ref(),
            &prompt,
            &key_moments_schema(),
        )
        .await
        {
            Ok(response) => reconstruct_moments(response.key_moments, labeled),
            Err(e) => {
                warn!("Key moment extraction failed, deriving from labels: {:#}", e);
                fallback_key_moments(labeled, patterns, &self.limits)
            }
        };

        info!(
            "Stage 4: Key moments ({} positive, {} improvement, {} pattern examples)",
            moments.positive.len(),
            moments.needs_improvement.len(),
            moments.pattern_examples.len()
        );

        Ok(FieldValue::KeyMoments(moments).into())
    }
}

fn rebuild_dialogue(lines: &[RawLine], labeled: &[LabeledUtterance]) -> Vec<DialogueLine> {
    lines
        .iter()
        .map(|line| reconstruct_line(&line.speaker, &line.text, labeled))
        .collect()
}

/// Replace every model-quoted line with its canonical utterance text
fn reconstruct_moments(raw: RawKeyMoments, labeled: &[LabeledUtterance]) -> KeyMoments {
    KeyMoments {
        positive: raw
            .positive
            .into_iter()
            .map(|m| PositiveMoment {
                dialogue: rebuild_dialogue(&m.dialogue, labeled),
                reason: m.reason,
                pattern_hint: m.pattern_hint,
            })
            .collect(),
        needs_improvement: raw
            .needs_improvement
            .into_iter()
            .map(|m| ImprovementMoment {
                dialogue: rebuild_dialogue(&m.dialogue, labeled),
                reason: m.reason,
                better_response: m.better_response,
                pattern_hint: m.pattern_hint,
            })
            .collect(),
        pattern_examples: raw
            .pattern_examples
            .into_iter()
            .map(|e| PatternExample {
                pattern_name: e.pattern_name,
                occurrences: e.occurrences.unwrap_or(1),
                dialogue: rebuild_dialogue(&e.dialogue, labeled),
                problem_explanation: e.problem_explanation,
                suggested_response: e.suggested_response,
            })
            .collect(),
    }
}

/// A moment line plus the utterance that follows it
fn with_next(labeled: &[LabeledUtterance], i: usize) -> Vec<DialogueLine> {
    labeled[i..=i + 1].iter().map(DialogueLine::from_utterance).collect()
}

/// Utterances with one of `codes` that have a following utterance
fn moment_starts(labeled: &[LabeledUtterance], codes: &[DpicsCode]) -> Vec<usize> {
    labeled
        .iter()
        .enumerate()
        .take(labeled.len().saturating_sub(1))
        .filter(|(_, u)| codes.contains(&u.label))
        .map(|(i, _)| i)
        .collect()
}

/// Key moments derived from labels and patterns alone.
///
/// Positive moments come from praise, improvement moments from commands and
/// negative talk, whoever said them. Both quote the reply that followed, so
/// the last utterance never starts a moment.
pub fn fallback_key_moments(
    labeled: &[LabeledUtterance],
    patterns: &[Pattern],
    limits: &KeyMomentLimits,
) -> KeyMoments {
    let pattern_examples = patterns
        .iter()
        .take(limits.max_pattern_examples)
        .filter_map(|p| {
            let dialogue: Vec<DialogueLine> = p
                .utterance_indices
                .iter()
                .take(limits.lines_per_example)
                .filter_map(|&i| labeled.get(i))
                .filter(|u| !u.original_ko.is_empty())
                .map(DialogueLine::from_utterance)
                .collect();
            (!dialogue.is_empty()).then(|| PatternExample {
                pattern_name: p.pattern_name.clone(),
                occurrences: 1,
                dialogue,
                problem_explanation: if p.description.is_empty() {
                    "패턴이 감지되었습니다.".to_string()
                } else {
                    p.description.clone()
                },
                suggested_response: "더 나은 응답을 고려해보세요.".to_string(),
            })
        })
        .collect();

    let positive = moment_starts(labeled, &[DpicsCode::Praise])
        .into_iter()
        .take(limits.max_positive)
        .map(|i| PositiveMoment {
            dialogue: with_next(labeled, i),
            reason: "긍정적 상호작용이 감지되었습니다.".to_string(),
            pattern_hint: POSITIVE_HINT.to_string(),
        })
        .collect();

    let needs_improvement = moment_starts(labeled, &[DpicsCode::Negative, DpicsCode::Command])
        .into_iter()
        .take(limits.max_improvement)
        .map(|i| ImprovementMoment {
            dialogue: with_next(labeled, i),
            reason: "개선이 필요한 상호작용이 감지되었습니다.".to_string(),
            better_response: "아이의 감정을 먼저 읽어주시고 공감해주세요.".to_string(),
            pattern_hint: IMPROVEMENT_HINT.to_string(),
        })
        .collect();

    KeyMoments {
        positive,
        needs_improvement,
        pattern_examples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::models::{Severity, Speaker};
    use serde_json::json;

    fn utt(speaker: Speaker, ko: &str, en: &str, label: DpicsCode) -> LabeledUtterance {
        LabeledUtterance {
            speaker,
            original_ko: ko.to_string(),
            english: en.to_string(),
            label,
        }
    }

    fn labeled() -> Vec<LabeledUtterance> {
        vec![
            utt(
                Speaker::Parent,
                "블록 잘 쌓았네!",
                "You stacked the blocks well!",
                DpicsCode::Praise,
            ),
            utt(Speaker::Child, "응, 높지?", "Yes, tall right?", DpicsCode::NeutralTalk),
            utt(Speaker::Parent, "이제 치워.", "Now clean up.", DpicsCode::Command),
            utt(Speaker::Child, "싫어.", "No.", DpicsCode::Negative),
            utt(Speaker::Parent, "또 말 안 듣네.", "You never listen.", DpicsCode::Negative),
        ]
    }

    #[test]
    fn test_fallback_moments() {
        let patterns = vec![
            Pattern::new("비판적반응", "Critical response at index 4", vec![4], Severity::High),
            Pattern::new("빈패턴", "", vec![99], Severity::Low),
        ];
        let moments = fallback_key_moments(&labeled(), &patterns, &KeyMomentLimits::default());

        assert_eq!(moments.positive.len(), 1);
        assert_eq!(moments.positive[0].dialogue.len(), 2);
        assert_eq!(moments.positive[0].dialogue[1].text, "응, 높지?");
        assert_eq!(moments.positive[0].pattern_hint, POSITIVE_HINT);

        // The final NEG line has no reply and is skipped
        let improvement = &moments.needs_improvement;
        assert_eq!(improvement.len(), 2);
        assert_eq!(improvement[0].dialogue[0].text, "이제 치워.");
        assert_eq!(improvement[1].dialogue[0].speaker, "child");
        assert_eq!(improvement[1].dialogue[0].text, "싫어.");
        assert_eq!(improvement[1].dialogue[1].text, "또 말 안 듣네.");
        assert!(improvement.iter().all(|m| m.pattern_hint == IMPROVEMENT_HINT));

        assert_eq!(moments.pattern_examples.len(), 1);
        assert_eq!(moments.pattern_examples[0].dialogue[0].speaker, "parent");
        assert_eq!(
            moments.pattern_examples[0].problem_explanation,
            "Critical response at index 4"
        );
    }

    #[test]
    fn test_child_lines_start_moments() {
        let labeled = vec![
            utt(Speaker::Child, "싫어.", "No.", DpicsCode::Negative),
            utt(Speaker::Parent, "왜 싫어?", "Why not?", DpicsCode::Question),
        ];
        let moments = fallback_key_moments(&labeled, &[], &KeyMomentLimits::default());

        assert!(moments.positive.is_empty());
        assert_eq!(moments.needs_improvement.len(), 1);
        let dialogue = &moments.needs_improvement[0].dialogue;
        assert_eq!(dialogue[0].speaker, "child");
        assert_eq!(dialogue[1].text, "왜 싫어?");
        assert_eq!(moments.needs_improvement[0].pattern_hint, "개선 필요");
    }

    #[test]
    fn test_fallback_respects_limits() {
        let labeled: Vec<LabeledUtterance> = (0..10)
            .map(|i| {
                let speaker = if i % 2 == 0 { Speaker::Parent } else { Speaker::Child };
                utt(speaker, &format!("줄 {i}"), "line", DpicsCode::Praise)
            })
            .collect();
        let limits = KeyMomentLimits {
            max_positive: 2,
            ..Default::default()
        };
        let moments = fallback_key_moments(&labeled, &[], &limits);
        assert_eq!(moments.positive.len(), 2);
        assert!(moments.pattern_examples.is_empty());
    }

    #[tokio::test]
    async fn test_model_dialogue_restored_to_canonical_text() {
        let client = ScriptedClient::new().on_json(
            "핵심 순간",
            json!({"key_moments": {
                "positive": [{"dialogue": [
                    {"speaker": "Parent", "text": "You stacked the blocks well"},
                    {"speaker": "child", "text": "Yes, tall right?"}
                ], "reason": "구체적 칭찬", "pattern_hint": "구체적 칭찬하기"}],
                "needs_improvement": [{"dialogue": [{"speaker": "MOM", "text": "Let's go outside"}],
                                        "reason": "r", "better_response": "b"}],
                "pattern_examples": [{"pattern_name": "비판적반응",
                                       "dialogue": [{"speaker": "parent", "text": "never listen"}],
                                       "problem_explanation": "p", "suggested_response": "s"}]
            }}),
        );
        let state = AnalysisState {
            utterances_labeled: Some(labeled()),
            ..Default::default()
        };
        let update = KeyMomentsStage::new(Arc::new(client), KeyMomentLimits::default())
            .run(&state)
            .await
            .unwrap();
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, update);
        let moments = merged.key_moments.unwrap();

        let positive = &moments.positive[0].dialogue;
        assert_eq!(positive[0].text, "블록 잘 쌓았네!");
        assert_eq!(positive[1].speaker, "child");
        assert_eq!(positive[1].text, "응, 높지?");
        assert_eq!(moments.positive[0].pattern_hint, "구체적 칭찬하기");
        assert_eq!(moments.needs_improvement[0].pattern_hint, "");
        assert_eq!(moments.needs_improvement[0].dialogue[0].text, "Let's go outside");
        assert_eq!(moments.needs_improvement[0].dialogue[0].speaker, "parent");
        assert_eq!(moments.pattern_examples[0].occurrences, 1);
        assert_eq!(moments.pattern_examples[0].dialogue[0].text, "또 말 안 듣네.");
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let state = AnalysisState {
            utterances_labeled: Some(labeled()),
            ..Default::default()
        };
        let stage =
            KeyMomentsStage::new(Arc::new(ScriptedClient::new()), KeyMomentLimits::default());
        let update = stage.run(&state).await.unwrap();
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, update);
        assert_eq!(merged.key_moments.unwrap().positive.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let client = Arc::new(ScriptedClient::new());
        let update = KeyMomentsStage::new(client.clone(), KeyMomentLimits::default())
            .run(&AnalysisState::default())
            .await
            .unwrap();
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, update);
        assert!(merged.key_moments.unwrap().is_empty());
        assert_eq!(client.calls(), 0);
    }
}
