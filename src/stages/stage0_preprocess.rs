use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::graph::Stage;
use crate::models::{InputUtterance, Speaker, Utterance, parse_speaker_marker};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Stage 0: resolve raw input into speaker-tagged utterances
pub struct PreprocessStage;

#[async_trait]
impl Stage<AnalysisState> for PreprocessStage {
    fn name(&self) -> &'static str {
        super::PREPROCESS
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesKo, Field::Message]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::UtterancesNormalized]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let inputs = if state.utterances_ko.is_empty() {
            state.message_text().map(split_message).unwrap_or_default()
        } else {
            state.utterances_ko.clone()
        };

        let normalized = normalize_speakers(&inputs);
        let parents = normalized.iter().filter(|u| u.speaker == Speaker::Parent).count();
        info!(
            "Stage 0: {} utterances ({} parent, {} child)",
            normalized.len(),
            parents,
            normalized.len() - parents
        );

        Ok(FieldValue::UtterancesNormalized(normalized).into())
    }
}

/// Split freeform dialogue text into lines, dropping blank ones
pub fn split_message(message: &str) -> Vec<InputUtterance> {
    message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(InputUtterance::from)
        .collect()
}

/// Assign a speaker to every non-blank input.
///
/// An explicit speaker wins, then a marker in the text; otherwise the
/// speaker alternates from the previous utterance, starting with the parent.
pub fn normalize_speakers(inputs: &[InputUtterance]) -> Vec<Utterance> {
    let mut previous: Option<Speaker> = None;
    let mut out = Vec::with_capacity(inputs.len());

    for input in inputs {
        let (explicit, raw) = match input {
            InputUtterance::Structured { speaker, text } => {
                (Speaker::from_role_name(speaker), text)
            }
            InputUtterance::Legacy(text) => (None, text),
        };

        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (speaker, text) = match explicit {
            Some(speaker) => (speaker, raw.to_string()),
            None => match parse_speaker_marker(raw) {
                Some(found) => found,
                None => (
                    previous.map(Speaker::flip).unwrap_or(Speaker::Parent),
                    raw.to_string(),
                ),
            },
        };

        previous = Some(speaker);
        out.push(Utterance { speaker, text });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(lines: &[&str]) -> Vec<InputUtterance> {
        lines.iter().map(|l| InputUtterance::from(*l)).collect()
    }

    #[test]
    fn test_alternation_without_markers() {
        let utterances = normalize_speakers(&legacy(&["숙제 했니?", "하기 싫어."]));
        assert_eq!(
            utterances,
            vec![
                Utterance::new(Speaker::Parent, "숙제 했니?"),
                Utterance::new(Speaker::Child, "하기 싫어."),
            ]
        );
    }

    #[test]
    fn test_markers_override_alternation() {
        let utterances = normalize_speakers(&legacy(&[
            "아이: 배고파",
            "아이: 밥 줘",
            "[엄마] 잠깐만 기다려",
            "알았어",
        ]));
        let speakers: Vec<Speaker> = utterances.iter().map(|u| u.speaker).collect();
        assert_eq!(
            speakers,
            vec![Speaker::Child, Speaker::Child, Speaker::Parent, Speaker::Child]
        );
        assert_eq!(utterances[2].text, "잠깐만 기다려");
    }

    #[test]
    fn test_structured_inputs() {
        let inputs = vec![
            InputUtterance::Structured {
                speaker: "MOM".to_string(),
                text: " 오늘 어땠어? ".to_string(),
            },
            InputUtterance::Structured {
                speaker: "narrator".to_string(),
                text: "Child: 좋았어".to_string(),
            },
            InputUtterance::Structured {
                speaker: "???".to_string(),
                text: "뭐 했어?".to_string(),
            },
        ];
        let utterances = normalize_speakers(&inputs);
        assert_eq!(utterances[0], Utterance::new(Speaker::Parent, "오늘 어땠어?"));
        assert_eq!(utterances[1], Utterance::new(Speaker::Child, "좋았어"));
        assert_eq!(utterances[2], Utterance::new(Speaker::Parent, "뭐 했어?"));
    }

    #[test]
    fn test_blank_lines_dropped() {
        let inputs = split_message("부모: 숙제 했니?\n\n   \n아이: 하기 싫어.\n");
        assert_eq!(inputs.len(), 2);
        assert_eq!(normalize_speakers(&legacy(&["", "  "])), Vec::new());
    }

    #[tokio::test]
    async fn test_stage_reads_message_when_list_empty() {
        let state = AnalysisState {
            message: Some("부모: 숙제 했니?\n아이: 하기 싫어.".to_string()),
            ..Default::default()
        };
        let update = PreprocessStage.run(&state).await.unwrap();
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, update);
        assert_eq!(merged.normalized().len(), 2);
        assert_eq!(merged.normalized()[1].speaker, Speaker::Child);
    }
}
