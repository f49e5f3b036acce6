use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::graph::Stage;
use crate::llm::{
    COACHING_SYSTEM_PROMPT, CompletionClient, Prompt, first_json_object, format_labeled,
    format_patterns,
};
use crate::models::{
    COMMAND_WITHOUT_CHOICE, CRITICAL_RESPONSE, CoachingPlan, MISSED_POSITIVE_OPPORTUNITY, Pattern,
};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

const IMPROVEMENT_HEADING: &str = "핵심 개선 포인트";
const ACTION_HEADING: &str = "실천 방법";
const TECHNIQUE_HEADING: &str = "시도해볼 기법";
const GOAL_HEADING: &str = "장기적 목표";

const HEADINGS: [&str; 4] = [IMPROVEMENT_HEADING, ACTION_HEADING, TECHNIQUE_HEADING, GOAL_HEADING];

/// Stage 4d: personalized coaching plan
pub struct CoachingStage {
    client: Arc<dyn CompletionClient>,
}

impl CoachingStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage<AnalysisState> for CoachingStage {
    fn name(&self) -> &'static str {
        super::COACHING_PLAN
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesLabeled, Field::Patterns]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::CoachingPlan]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let labeled = state.labeled();
        let patterns = state.patterns();
        if labeled.is_empty() && patterns.is_empty() {
            return Ok(FieldValue::CoachingPlan(CoachingPlan::default()).into());
        }

        let prompt = Prompt::new(
            COACHING_SYSTEM_PROMPT,
            format!(
                "라벨링된 발화:\n{}\n\n탐지된 패턴:\n{}\n\n개인화된 코칭 계획을 JSON 객체로 작성해주세요.",
                format_labeled(labeled),
                format_patterns(patterns)
            ),
        );

        let plan = match self.client.complete(&prompt).await {
            Ok(reply) => match parse_coaching_reply(&reply) {
                Some(plan) if plan.has_no_sections() => {
                    warn!("Coaching reply had no recognizable sections, filling from patterns");
                    CoachingPlan {
                        full_text: plan.full_text,
                        ..fallback_plan(patterns)
                    }
                }
                Some(plan) => plan,
                None => {
                    warn!("Coaching reply was empty, deriving plan from patterns");
                    fallback_plan(patterns)
                }
            },
            Err(e) => {
                warn!("Coaching plan failed, deriving plan from patterns: {:#}", e);
                fallback_plan(patterns)
            }
        };

        info!(
            "Stage 4: Coaching plan ({} points, {} actions)",
            plan.improvement_points.len(),
            plan.action_items.len()
        );

        Ok(FieldValue::CoachingPlan(plan).into())
    }
}

/// Read a coaching reply as a JSON plan, else as prose with section headings.
///
/// Returns `None` for a blank reply.
pub fn parse_coaching_reply(reply: &str) -> Option<CoachingPlan> {
    let reply = reply.trim();
    if reply.is_empty() {
        return None;
    }

    if let Some(object) = first_json_object(reply) {
        if let Ok(mut plan) = serde_json::from_value::<CoachingPlan>(Value::Object(object)) {
            if !plan.has_no_sections() {
                if plan.full_text.trim().is_empty() {
                    plan.full_text = render_plan(&plan);
                }
                return Some(plan);
            }
        }
    }

    Some(CoachingPlan {
        full_text: reply.to_string(),
        improvement_points: extract_section(reply, IMPROVEMENT_HEADING),
        action_items: extract_section(reply, ACTION_HEADING),
        next_techniques: extract_section(reply, TECHNIQUE_HEADING),
        long_term_goals: extract_section(reply, GOAL_HEADING),
        ..Default::default()
    })
}

/// List item text of a bullet or numbered line
fn bullet_item(line: &str) -> Option<&str> {
    let rest = if let Some(rest) = line.strip_prefix(['-', '•', '*']) {
        rest
    } else {
        let digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
        if digits.len() == line.len() {
            return None;
        }
        digits.strip_prefix(['.', ')'])?
    };
    let item = rest.trim();
    (!item.is_empty()).then_some(item)
}

/// `## ...`, `...:` or a fully bold line
fn is_heading_line(line: &str) -> bool {
    line.starts_with('#')
        || line.ends_with([':', '：'])
        || (line.len() > 4 && line.starts_with("**") && line.ends_with("**"))
}

/// Bullet items following the first heading line that mentions `heading`.
///
/// The section ends at another known heading, or at plain prose once at
/// least one item was collected. Items that merely mention a heading do not
/// end it.
pub fn extract_section(text: &str, heading: &str) -> Vec<String> {
    let mut lines = text.lines().map(str::trim);
    if !lines.any(|line| is_heading_line(line) && line.contains(heading)) {
        return Vec::new();
    }

    let mut items = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if is_heading_line(line) && HEADINGS.iter().any(|h| *h != heading && line.contains(h)) {
            break;
        }
        match bullet_item(line) {
            Some(item) => items.push(item.trim_matches('*').trim().to_string()),
            None if line.starts_with('#') => {}
            None if items.is_empty() => {}
            None => break,
        }
    }
    items
}

fn render_plan(plan: &CoachingPlan) -> String {
    [
        (IMPROVEMENT_HEADING, &plan.improvement_points),
        (ACTION_HEADING, &plan.action_items),
        (TECHNIQUE_HEADING, &plan.next_techniques),
        (GOAL_HEADING, &plan.long_term_goals),
    ]
    .iter()
    .filter(|(_, items)| !items.is_empty())
    .map(|(heading, items)| {
        let body = items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n");
        format!("## {heading}\n{body}")
    })
    .collect::<Vec<_>>()
    .join("\n\n")
}

/// Plan built from detected patterns, most severe first
pub fn fallback_plan(patterns: &[Pattern]) -> CoachingPlan {
    let mut ordered: Vec<&Pattern> = patterns.iter().collect();
    ordered.sort_by(|a, b| b.severity.cmp(&a.severity));

    let mut plan = CoachingPlan::default();
    let mut seen: Vec<&str> = Vec::new();
    for p in ordered {
        if seen.contains(&p.pattern_name.as_str()) {
            continue;
        }
        seen.push(&p.pattern_name);

        let (point, action, technique) = match p.pattern_name.as_str() {
            MISSED_POSITIVE_OPPORTUNITY => (
                "아이의 긍정적인 행동을 놓치지 말고 구체적으로 칭찬하기".to_string(),
                "아이가 스스로 한 행동을 말할 때 바로 \"~해서 멋지다\"처럼 구체적으로 칭찬해 보세요.",
                "구체적 칭찬 (Praise)",
            ),
            COMMAND_WITHOUT_CHOICE => (
                "명령 대신 선택지를 제시하기".to_string(),
                "\"지금 치워\" 대신 \"블록 먼저 치울래, 책 먼저 치울래?\"처럼 두 가지 선택지를 주세요.",
                "선택지 제시",
            ),
            CRITICAL_RESPONSE => (
                "비판 대신 아이의 감정을 먼저 읽어주기".to_string(),
                "아이의 말을 비판하기 전에 \"~해서 속상했구나\"처럼 감정을 그대로 반영해 주세요.",
                "반영하기 (Reflect)",
            ),
            other => (
                format!("'{other}' 패턴 줄이기 ({})", p.severity.as_str()),
                "비슷한 상황이 오면 한 번 멈추고 아이의 입장에서 다시 말해 보세요.",
                "행동 묘사하기 (Describe)",
            ),
        };

        plan.improvement_points.push(point);
        plan.action_items.push(action.to_string());
        if !plan.next_techniques.iter().any(|t| t == technique) {
            plan.next_techniques.push(technique.to_string());
        }
    }

    if plan.improvement_points.is_empty() {
        plan.improvement_points
            .push("지금처럼 아이의 말에 귀 기울이는 대화를 유지하기".to_string());
        plan.action_items
            .push("하루 5분, 아이가 주도하는 놀이 시간에 칭찬과 반영을 연습해 보세요.".to_string());
        plan.next_techniques.push("즐겁게 함께하기 (Enjoy)".to_string());
    }

    plan.long_term_goals = vec![
        "PRIDE 기술(칭찬, 반영, 모방, 묘사, 즐거움)을 일상 대화에 자연스럽게 적용하기".to_string(),
        "아이가 감정을 편하게 표현할 수 있는 대화 분위기 만들기".to_string(),
    ];
    plan.full_text = render_plan(&plan);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::models::{DpicsCode, LabeledUtterance, Severity, Speaker};

    const PROSE_PLAN: &str = "## 1. 핵심 개선 포인트
- 칭찬을 더 자주 하기
- 명령 줄이기

## 2. 구체적 실천 방법
1. 하루 세 번 칭찬하기
2) 선택지 주기
이상입니다.

## 3. 다음 대화에서 시도해볼 기법
* 반영하기

## 4. 장기적 목표
- 신뢰 쌓기";

    fn state() -> AnalysisState {
        AnalysisState {
            utterances_labeled: Some(vec![LabeledUtterance {
                speaker: Speaker::Parent,
                original_ko: "치워.".to_string(),
                english: "Clean up.".to_string(),
                label: DpicsCode::Command,
            }]),
            patterns: Some(vec![Pattern::new(COMMAND_WITHOUT_CHOICE, "d", vec![0], Severity::Low)]),
            ..Default::default()
        }
    }

    async fn run(client: Arc<dyn CompletionClient>, state: &AnalysisState) -> CoachingPlan {
        let mut merged = AnalysisState::default();
        let update = CoachingStage::new(client).run(state).await.unwrap();
        crate::graph::GraphState::merge(&mut merged, update);
        merged.coaching_plan.unwrap()
    }

    #[test]
    fn test_extract_sections_from_prose() {
        assert_eq!(
            extract_section(PROSE_PLAN, IMPROVEMENT_HEADING),
            vec!["칭찬을 더 자주 하기", "명령 줄이기"]
        );
        assert_eq!(
            extract_section(PROSE_PLAN, ACTION_HEADING),
            vec!["하루 세 번 칭찬하기", "선택지 주기"]
        );
        assert_eq!(extract_section(PROSE_PLAN, TECHNIQUE_HEADING), vec!["반영하기"]);
        assert_eq!(extract_section(PROSE_PLAN, GOAL_HEADING), vec!["신뢰 쌓기"]);
        assert!(extract_section("아무 내용 없음", GOAL_HEADING).is_empty());
    }

    #[test]
    fn test_item_mentioning_other_heading_stays_in_section() {
        let prose = "## 핵심 개선 포인트
- 칭찬 늘리기
- 실천 방법을 하나씩 정하기
- 명령 줄이기

실천 방법:
- 선택지 주기

**장기적 목표**
- 신뢰 쌓기";
        assert_eq!(
            extract_section(prose, IMPROVEMENT_HEADING),
            vec!["칭찬 늘리기", "실천 방법을 하나씩 정하기", "명령 줄이기"]
        );
        assert_eq!(extract_section(prose, ACTION_HEADING), vec!["선택지 주기"]);
        assert_eq!(extract_section(prose, GOAL_HEADING), vec!["신뢰 쌓기"]);
    }

    #[test]
    fn test_json_reply_preferred() {
        let plan = parse_coaching_reply(
            r#"```json
{"improvement_points": ["칭찬하기"], "action_items": "매일 칭찬", "long_term_goals": []}
```"#,
        )
        .unwrap();
        assert_eq!(plan.improvement_points, vec!["칭찬하기"]);
        assert_eq!(plan.action_items, vec!["매일 칭찬"]);
        assert!(plan.full_text.starts_with("## 핵심 개선 포인트"));
        assert!(parse_coaching_reply("   ").is_none());
    }

    #[test]
    fn test_fallback_plan_orders_by_severity() {
        let plan = fallback_plan(&[
            Pattern::new(COMMAND_WITHOUT_CHOICE, "d", vec![1], Severity::Low),
            Pattern::new(CRITICAL_RESPONSE, "d", vec![2], Severity::High),
            Pattern::new(COMMAND_WITHOUT_CHOICE, "d", vec![3], Severity::Low),
        ]);
        assert_eq!(plan.improvement_points.len(), 2);
        assert!(plan.improvement_points[0].contains("비판"));
        assert_eq!(plan.next_techniques, vec!["반영하기 (Reflect)", "선택지 제시"]);
        assert_eq!(plan.long_term_goals.len(), 2);
        assert!(!plan.full_text.is_empty());
    }

    #[tokio::test]
    async fn test_prose_reply_sections() {
        let client = ScriptedClient::new().on_text("professional parenting coach", PROSE_PLAN);
        let plan = run(Arc::new(client), &state()).await;
        assert_eq!(plan.full_text, PROSE_PLAN);
        assert_eq!(plan.improvement_points.len(), 2);
    }

    #[tokio::test]
    async fn test_unstructured_prose_keeps_text() {
        let client =
            ScriptedClient::new().on_text("professional parenting coach", "조금 더 기다려 주세요.");
        let plan = run(Arc::new(client), &state()).await;
        assert_eq!(plan.full_text, "조금 더 기다려 주세요.");
        assert_eq!(plan.next_techniques, vec!["선택지 제시"]);
    }

    #[tokio::test]
    async fn test_failure_uses_pattern_plan() {
        let plan = run(Arc::new(ScriptedClient::new()), &state()).await;
        assert_eq!(plan.improvement_points, vec!["명령 대신 선택지를 제시하기"]);
    }

    #[tokio::test]
    async fn test_nothing_to_coach() {
        let client = Arc::new(ScriptedClient::new());
        let plan = run(client.clone(), &AnalysisState::default()).await;
        assert_eq!(plan, CoachingPlan::default());
        assert_eq!(client.calls(), 0);
    }
}
