use serde_json::json;

use super::OutputSchema;
use crate::models::{LabeledUtterance, Pattern, Utterance};

/// Placeholder rendered for an empty section
pub const NONE_MARKER: &str = "(없음)";

pub const TRANSLATE_SYSTEM_PROMPT: &str = "You translate Korean parent-child dialogue into natural English. \
Keep one output item per input line, in the same order. \
For each line report the speaker as MOM (parent) or CHI (child), the Korean line exactly as given, and its English translation. \
Preserve the emotional tone of each line.";

pub const DPICS_SYSTEM_PROMPT: &str = "You annotate each line of a parent-child dialogue with one DPICS code. \
Codes: PR (praise), RD (reflection), BD (behavior description), NT (neutral talk), \
Q (question), CMD (command), NEG (negative talk or criticism), IGN (ignoring), OTH (other). \
Return ONLY a JSON array of objects {\"line\": <the line exactly as given>, \"code\": <code>}. No extra text.";

pub const PATTERN_SYSTEM_PROMPT: &str = "You detect interaction patterns in labeled parent-child dialogue. \
Typical patterns: '긍정기회놓치기' (missed positive opportunity), '명령과제시' (command without choice), \
'공감부족' (lack of empathy), '반영부족' (lack of reflection), '비판적반응' (critical response). \
Return ONLY a JSON array of objects {pattern_name, description, utterance_indices, severity} \
where utterance_indices refers to the numbered lines and severity is low, medium or high. No extra text.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a parenting coach reviewing one parent-child conversation. \
Write an empathetic, specific diagnosis in Korean covering: the overall flow of the conversation, \
the main issues, what went well, what needs work, and a one-paragraph diagnosis for today.";

pub const KEY_MOMENTS_SYSTEM_PROMPT: &str = "당신은 부모-자녀 대화에서 핵심 순간을 찾아내는 전문가입니다. \
핵심 순간을 positive(부모가 잘 대응한 순간), needs_improvement(더 나은 응답이 가능했던 순간), \
pattern_examples(감지된 패턴이 드러난 대화 발췌)로 나누세요. \
각 순간에는 연속된 실제 발화를 speaker(parent 또는 child)와 한국어 원문 text로 포함하세요. \
positive와 needs_improvement에는 짧은 pattern_hint를, needs_improvement에는 better_response를, \
pattern_examples에는 pattern_name, occurrences, \
problem_explanation, suggested_response를 작성하세요. 모든 설명은 한국어로 작성하세요.";

pub const STYLE_SYSTEM_PROMPT: &str = "You assess a parent's communication style from labeled dialogue. \
Return ONLY a JSON object with: style_type (one of authoritative, authoritarian, permissive, uninvolved, mixed), \
overall_assessment (Korean, 2-3 sentences), and any supporting observations. No extra text.";

pub const COACHING_SYSTEM_PROMPT: &str = "You are a professional parenting coach writing a personalized plan in Korean. \
Return ONLY a JSON object with string arrays: improvement_points (3-5 핵심 개선 포인트), \
action_items (concrete 실천 방법), next_techniques (기법 to try in the next conversation), \
long_term_goals (장기적 목표), plus full_text holding the whole plan as prose. \
Be specific, actionable and encouraging.";

pub const CHALLENGE_SYSTEM_PROMPT: &str = "You judge whether a parent met a communication challenge. \
Return ONLY a JSON object with: challenge_met (boolean), score (0-100), evidence (list of quoted examples), \
feedback (Korean), improvement_suggestions (list, Korean). No extra text.";

pub const HIGHLIGHT_SYSTEM_PROMPT: &str = "Pick 3-7 highlight lines from the dialogue by their index. \
Return ONLY JSON of the form {\"indices\": [int, ...]} using the numbers shown before each line. \
When unsure, include the first and the last line. No extra text.";

pub const ADVICE_SYSTEM_PROMPT: &str = "You are a pediatric parenting coach. \
Use the DPICS annotations and highlighted lines to understand what each utterance does. \
Reply in Korean with concise, empathetic, actionable advice covering: 1) 핵심 이슈, 2) 공감 멘트, \
3) 즉시 실행 팁 3개, 4) 주의사항, 5) 하이라이트별 한 문장 피드백 (quote or paraphrase the line).";

/// `{i}. [Parent] [PR] english` lines for analysis prompts
pub fn format_labeled(utterances: &[LabeledUtterance]) -> String {
    if utterances.is_empty() {
        return NONE_MARKER.to_string();
    }
    utterances
        .iter()
        .enumerate()
        .map(|(i, u)| {
            format!(
                "{}. [{}] [{}] {} (원문: {})",
                i,
                u.speaker.prompt_label(),
                u.label,
                u.english,
                u.original_ko
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `[Parent] text` lines in the canonical language
pub fn format_canonical(utterances: &[Utterance]) -> String {
    if utterances.is_empty() {
        return NONE_MARKER.to_string();
    }
    utterances
        .iter()
        .map(|u| format!("[{}] {}", u.speaker.prompt_label(), u.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_patterns(patterns: &[Pattern]) -> String {
    if patterns.is_empty() {
        return NONE_MARKER.to_string();
    }
    patterns
        .iter()
        .map(|p| {
            format!(
                "- {} ({}): {} {:?}",
                p.pattern_name,
                p.severity.as_str(),
                p.description,
                p.utterance_indices
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `index: text` lines for index-based selection
pub fn format_numbered(lines: &[String]) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{i}: {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn translation_schema() -> OutputSchema {
    OutputSchema {
        name: "submit_translations",
        description: "Submit one translation per input line, in input order",
        schema: json!({
            "type": "object",
            "properties": {
                "translations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "speaker": {"type": "string", "enum": ["MOM", "CHI"]},
                            "korean": {"type": "string"},
                            "english": {"type": "string"}
                        },
                        "required": ["speaker", "korean", "english"]
                    }
                }
            },
            "required": ["translations"]
        }),
    }
}

pub fn key_moments_schema() -> OutputSchema {
    let dialogue = json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "speaker": {"type": "string"},
                "text": {"type": "string"}
            },
            "required": ["speaker", "text"]
        }
    });

    OutputSchema {
        name: "submit_key_moments",
        description: "Submit the key moments of the conversation",
        schema: json!({
            "type": "object",
            "properties": {
                "key_moments": {
                    "type": "object",
                    "properties": {
                        "positive": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "dialogue": dialogue,
                                    "reason": {"type": "string"},
                                    "pattern_hint": {"type": "string"}
                                },
                                "required": ["dialogue", "reason", "pattern_hint"]
                            }
                        },
                        "needs_improvement": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "dialogue": dialogue,
                                    "reason": {"type": "string"},
                                    "better_response": {"type": "string"},
                                    "pattern_hint": {"type": "string"}
                                },
                                "required": [
                                    "dialogue",
                                    "reason",
                                    "better_response",
                                    "pattern_hint"
                                ]
                            }
                        },
                        "pattern_examples": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "pattern_name": {"type": "string"},
                                    "occurrences": {"type": "integer"},
                                    "dialogue": dialogue,
                                    "problem_explanation": {"type": "string"},
                                    "suggested_response": {"type": "string"}
                                },
                                "required": ["pattern_name", "dialogue", "problem_explanation", "suggested_response"]
                            }
                        }
                    },
                    "required": ["positive", "needs_improvement", "pattern_examples"]
                }
            },
            "required": ["key_moments"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DpicsCode, Severity, Speaker};

    #[test]
    fn test_format_labeled() {
        let utterances = vec![LabeledUtterance {
            speaker: Speaker::Parent,
            original_ko: "잘했어".to_string(),
            english: "Well done".to_string(),
            label: DpicsCode::Praise,
        }];
        assert_eq!(
            format_labeled(&utterances),
            "0. [Parent] [PR] Well done (원문: 잘했어)"
        );
        assert_eq!(format_labeled(&[]), NONE_MARKER);
    }

    #[test]
    fn test_format_patterns() {
        let patterns = vec![Pattern::new(
            "비판적반응",
            "Critical response at index 1",
            vec![1],
            Severity::High,
        )];
        assert_eq!(
            format_patterns(&patterns),
            "- 비판적반응 (high): Critical response at index 1 [1]"
        );
    }

    #[test]
    fn test_schemas_are_objects() {
        assert_eq!(translation_schema().schema["type"], "object");
        let schema = key_moments_schema().schema;
        let moments = &schema["properties"]["key_moments"]["properties"];
        let positive = &moments["positive"]["items"];
        assert_eq!(positive["properties"]["dialogue"]["type"], "array");
        assert_eq!(positive["properties"]["pattern_hint"]["type"], "string");

        let improvement = &moments["needs_improvement"]["items"];
        let required = improvement["required"].as_array().unwrap();
        assert!(required.iter().any(|r| r == "pattern_hint"));
    }
}
