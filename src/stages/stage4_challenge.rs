use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::graph::Stage;
use crate::llm::{
    CHALLENGE_SYSTEM_PROMPT, CompletionClient, Prompt, first_json_object, format_labeled,
    format_patterns,
};
use crate::models::{ChallengeEval, Pattern};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Scoring constants for the pattern-based challenge evaluation
#[derive(Debug, Clone)]
pub struct ChallengeScoring {
    pub base_score: u32,
    /// Deducted per medium or high severity pattern
    pub penalty_per_pattern: u32,
    /// Patterns quoted as evidence and suggestions
    pub max_examples: usize,
}

impl Default for ChallengeScoring {
    fn default() -> Self {
        Self {
            base_score: 100,
            penalty_per_pattern: 20,
            max_examples: 3,
        }
    }
}

fn zero_eval(feedback: &str) -> ChallengeEval {
    ChallengeEval {
        challenge_met: false,
        score: 0,
        feedback: feedback.to_string(),
        ..Default::default()
    }
}

/// Absent, null and empty specs all mean no challenge was set
pub fn has_challenge(spec: Option<&Value>) -> bool {
    match spec {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Evaluation from medium and high severity patterns alone
pub fn pattern_based_eval(patterns: &[Pattern], scoring: &ChallengeScoring) -> ChallengeEval {
    let concerning: Vec<&Pattern> = patterns
        .iter()
        .filter(|p| p.severity.is_concerning())
        .collect();
    let challenge_met = concerning.is_empty();
    let penalty = scoring
        .penalty_per_pattern
        .saturating_mul(u32::try_from(concerning.len()).unwrap_or(u32::MAX));

    ChallengeEval {
        challenge_met,
        score: scoring.base_score.saturating_sub(penalty).min(100),
        evidence: concerning
            .iter()
            .take(scoring.max_examples)
            .map(|p| p.description.clone())
            .collect(),
        feedback: format!(
            "패턴 기반 평가: {}.",
            if challenge_met { "챌린지를 달성했습니다" } else { "개선이 필요합니다" }
        ),
        improvement_suggestions: concerning
            .iter()
            .take(scoring.max_examples)
            .map(|p| p.pattern_name.clone())
            .collect(),
    }
}

/// Stage 4e: did the parent meet today's challenge
pub struct ChallengeStage {
    client: Arc<dyn CompletionClient>,
    scoring: ChallengeScoring,
}

impl ChallengeStage {
    pub fn new(client: Arc<dyn CompletionClient>, scoring: ChallengeScoring) -> Self {
        Self { client, scoring }
    }
}

#[async_trait]
impl Stage<AnalysisState> for ChallengeStage {
    fn name(&self) -> &'static str {
        super::CHALLENGE_EVAL
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::ChallengeSpec, Field::UtterancesLabeled, Field::Patterns]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::ChallengeEval]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let spec = state.challenge_spec.as_ref();
        if !has_challenge(spec) {
            let eval = zero_eval("챌린지 스펙이 제공되지 않았습니다.");
            return Ok(FieldValue::ChallengeEval(eval).into());
        }
        let labeled = state.labeled();
        if labeled.is_empty() {
            return Ok(FieldValue::ChallengeEval(zero_eval("평가할 발화가 없습니다.")).into());
        }
        let patterns = state.patterns();

        let spec_text = spec
            .map(|s| serde_json::to_string_pretty(s).unwrap_or_else(|_| s.to_string()))
            .unwrap_or_default();
        let prompt = Prompt::new(
            CHALLENGE_SYSTEM_PROMPT,
            format!(
                "Challenge specification:\n{}\n\nLabeled utterances:\n{}\n\nDetected patterns:\n{}\n\n\
                 Evaluate challenge completion and return the JSON object only.",
                spec_text,
                format_labeled(labeled),
                format_patterns(patterns)
            ),
        );

        let parsed = match self.client.complete(&prompt).await {
            Ok(reply) => first_json_object(&reply)
                .ok_or_else(|| anyhow::anyhow!("reply contained no JSON object"))
                .and_then(|object| {
                    serde_json::from_value::<ChallengeEval>(Value::Object(object))
                        .map_err(anyhow::Error::from)
                }),
            Err(e) => Err(e),
        };

        let eval = match parsed {
            Ok(eval) => eval,
            Err(e) => {
                warn!("Challenge evaluation failed, scoring from patterns: {:#}", e);
                pattern_based_eval(patterns, &self.scoring)
            }
        };

        info!("Stage 4: Challenge met={} score={}", eval.challenge_met, eval.score);
        Ok(FieldValue::ChallengeEval(eval).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::models::{DpicsCode, LabeledUtterance, Severity, Speaker};
    use serde_json::json;

    fn state(spec: Value) -> AnalysisState {
        AnalysisState {
            challenge_spec: Some(spec),
            utterances_labeled: Some(vec![LabeledUtterance {
                speaker: Speaker::Parent,
                original_ko: "잘했어!".to_string(),
                english: "Good job!".to_string(),
                label: DpicsCode::Praise,
            }]),
            patterns: Some(vec![
                Pattern::new("비판적반응", "Critical response at index 3", vec![3], Severity::High),
                Pattern::new("명령과제시", "Command at index 1", vec![1], Severity::Low),
                Pattern::new("긍정기회놓치기", "Missed at index 4", vec![4, 5], Severity::Medium),
            ]),
            ..Default::default()
        }
    }

    async fn run(client: Arc<dyn CompletionClient>, state: &AnalysisState) -> ChallengeEval {
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(
            &mut merged,
            ChallengeStage::new(client, ChallengeScoring::default())
                .run(state)
                .await
                .unwrap(),
        );
        merged.challenge_eval.unwrap()
    }

    #[test]
    fn test_empty_specs() {
        assert!(!has_challenge(None));
        assert!(!has_challenge(Some(&Value::Null)));
        assert!(!has_challenge(Some(&json!({}))));
        assert!(!has_challenge(Some(&json!("  "))));
        assert!(has_challenge(Some(&json!({"goal": "칭찬 3회"}))));
    }

    #[test]
    fn test_pattern_based_scoring() {
        let eval = pattern_based_eval(state(Value::Null).patterns(), &ChallengeScoring::default());
        assert!(!eval.challenge_met);
        assert_eq!(eval.score, 60);
        assert_eq!(eval.evidence, vec!["Critical response at index 3", "Missed at index 4"]);
        assert_eq!(eval.improvement_suggestions, vec!["비판적반응", "긍정기회놓치기"]);

        let many: Vec<Pattern> = (0..7)
            .map(|i| Pattern::new("x", format!("d{i}"), vec![i], Severity::High))
            .collect();
        let eval = pattern_based_eval(&many, &ChallengeScoring::default());
        assert_eq!(eval.score, 0);
        assert_eq!(eval.evidence.len(), 3);

        let eval = pattern_based_eval(&[], &ChallengeScoring::default());
        assert!(eval.challenge_met);
        assert_eq!(eval.score, 100);
    }

    #[tokio::test]
    async fn test_model_reply_parsed_leniently() {
        let client = ScriptedClient::new().on_text(
            "communication challenge",
            r#"평가 결과: {"challenge_met": "true", "score": "85", "evidence": "칭찬함", "feedback": "좋아요"}"#,
        );
        let eval = run(Arc::new(client), &state(json!({"goal": "칭찬하기"}))).await;
        assert!(eval.challenge_met);
        assert_eq!(eval.score, 85);
        assert_eq!(eval.evidence, vec!["칭찬함"]);
    }

    #[tokio::test]
    async fn test_failure_scores_from_patterns() {
        let eval = run(Arc::new(ScriptedClient::new()), &state(json!({"goal": "칭찬하기"}))).await;
        assert_eq!(eval.score, 60);
        assert_eq!(eval.feedback, "패턴 기반 평가: 개선이 필요합니다.");
    }

    #[tokio::test]
    async fn test_no_spec_or_no_utterances_is_zero() {
        let client = Arc::new(ScriptedClient::new());
        let eval = run(client.clone(), &state(json!({}))).await;
        assert_eq!(eval.score, 0);
        assert!(!eval.challenge_met);

        let mut empty = state(json!({"goal": "칭찬하기"}));
        empty.utterances_labeled = Some(Vec::new());
        let eval = run(client.clone(), &empty).await;
        assert_eq!(eval.score, 0);
        assert_eq!(client.calls(), 0);
    }
}
