use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::align::{MatchTier, align_lines};
use crate::graph::Stage;
use crate::llm::{
    CompletionClient, Prompt, TRANSLATE_SYSTEM_PROMPT, complete_structured, translation_schema,
};
use crate::models::{TranslatedUtterance, Utterance};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

#[derive(Debug, Deserialize)]
struct TranslationResponse {
    translations: Vec<TranslationItem>,
}

/// One translated line as returned by the model
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationItem {
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub korean: String,
    pub english: String,
}

/// Stage 1: translate canonical utterances to English
pub struct TranslateStage {
    client: Arc<dyn CompletionClient>,
}

impl TranslateStage {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Stage<AnalysisState> for TranslateStage {
    fn name(&self) -> &'static str {
        super::TRANSLATE
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesNormalized]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::UtterancesEn]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let source = state.normalized();
        if source.is_empty() {
            return Ok(FieldValue::UtterancesEn(Vec::new()).into());
        }

        info!("Stage 1: Translating {} utterances", source.len());

        let lines = source
            .iter()
            .map(|u| format!("[{}] {}", u.speaker.code(), u.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = Prompt::new(
            TRANSLATE_SYSTEM_PROMPT,
            format!(
                "Korean utterances (one per line):\n{lines}\n\n\
                 Translate every line and return speaker (MOM/CHI), korean and english for each."
            ),
        )
        .mini();

        let translated = match complete_structured::<TranslationResponse>(
            self.client.as_ref(),
            &prompt,
            &translation_schema(),
        )
        .await
        {
            Ok(response) if !response.translations.is_empty() => {
                align_translations(source, &response.translations)
            }
            Ok(_) => {
                warn!("Translation returned no items, passing utterances through untranslated");
                passthrough(source)
            }
            Err(e) => {
                warn!("Translation failed, passing utterances through untranslated: {:#}", e);
                passthrough(source)
            }
        };

        Ok(FieldValue::UtterancesEn(translated).into())
    }
}

fn passthrough(source: &[Utterance]) -> Vec<TranslatedUtterance> {
    source.iter().map(TranslatedUtterance::passthrough).collect()
}

/// Attach model translations to source utterances.
///
/// Matching counts pair positionally; otherwise items are matched on their
/// Korean text. Speaker and canonical text always come from the source, and
/// sources without a usable translation pass through untranslated.
pub fn align_translations(
    source: &[Utterance],
    items: &[TranslationItem],
) -> Vec<TranslatedUtterance> {
    let pick = |utterance: &Utterance, item: Option<&TranslationItem>| {
        match item.map(|i| i.english.trim()).filter(|e| !e.is_empty()) {
            Some(english) => TranslatedUtterance {
                speaker: utterance.speaker,
                original_ko: utterance.text.clone(),
                english: english.to_string(),
            },
            None => TranslatedUtterance::passthrough(utterance),
        }
    };

    if items.len() == source.len() {
        return source
            .iter()
            .zip(items)
            .map(|(u, item)| pick(u, Some(item)))
            .collect();
    }

    let targets: Vec<&str> = source.iter().map(|u| u.text.as_str()).collect();
    let candidates: Vec<&str> = items.iter().map(|i| i.korean.as_str()).collect();
    let alignment = align_lines(&targets, &candidates);

    let positional = alignment.count(MatchTier::Positional);
    if positional > 0 {
        warn!(
            "Translation count mismatch ({} items for {} utterances); {} matched by position",
            items.len(),
            source.len(),
            positional
        );
    }

    source
        .iter()
        .enumerate()
        .map(|(i, u)| pick(u, alignment.candidate_for(i).map(|c| &items[c])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedClient;
    use crate::models::Speaker;
    use serde_json::json;

    fn source() -> Vec<Utterance> {
        vec![
            Utterance::new(Speaker::Parent, "숙제 했니?"),
            Utterance::new(Speaker::Child, "하기 싫어."),
            Utterance::new(Speaker::Parent, "왜?"),
        ]
    }

    fn item(korean: &str, english: &str) -> TranslationItem {
        TranslationItem {
            speaker: "MOM".to_string(),
            korean: korean.to_string(),
            english: english.to_string(),
        }
    }

    #[test]
    fn test_positional_when_counts_match() {
        let items = vec![
            item("x", "Did you do your homework?"),
            item("y", "I don't want to."),
            item("z", "Why?"),
        ];
        let translated = align_translations(&source(), &items);
        assert_eq!(translated[1].english, "I don't want to.");
        assert_eq!(translated[1].original_ko, "하기 싫어.");
        assert_eq!(translated[1].speaker, Speaker::Child);
    }

    #[test]
    fn test_dropped_item_realigned_by_korean_text() {
        let items = vec![item("숙제 했니?", "Did you do your homework?"), item("왜?", "Why?")];
        let translated = align_translations(&source(), &items);
        assert_eq!(translated.len(), 3);
        assert_eq!(translated[0].english, "Did you do your homework?");
        assert_eq!(translated[1].english, "하기 싫어.");
        assert_eq!(translated[2].english, "Why?");
    }

    #[test]
    fn test_empty_english_passes_through() {
        let items = vec![item("a", ""), item("b", "b"), item("c", "c")];
        let translated = align_translations(&source(), &items);
        assert_eq!(translated[0].english, "숙제 했니?");
    }

    #[tokio::test]
    async fn test_stage_failure_is_identity() {
        let state = AnalysisState {
            utterances_normalized: Some(source()),
            ..Default::default()
        };
        let stage = TranslateStage::new(Arc::new(ScriptedClient::new()));
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, stage.run(&state).await.unwrap());
        let translated = merged.translated();
        assert_eq!(translated.len(), 3);
        assert!(translated.iter().all(|t| t.english == t.original_ko));
    }

    #[tokio::test]
    async fn test_stage_uses_structured_reply() {
        let client = ScriptedClient::new().on_json(
            "translate",
            json!({"translations": [
                {"speaker": "MOM", "korean": "숙제 했니?", "english": "Did you do your homework?"},
                {"speaker": "CHI", "korean": "하기 싫어.", "english": "I don't want to."},
                {"speaker": "MOM", "korean": "왜?", "english": "Why?"}
            ]}),
        );
        let state = AnalysisState {
            utterances_normalized: Some(source()),
            ..Default::default()
        };
        let stage = TranslateStage::new(Arc::new(client));
        let mut merged = AnalysisState::default();
        crate::graph::GraphState::merge(&mut merged, stage.run(&state).await.unwrap());
        assert_eq!(merged.translated()[2].english, "Why?");
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let client = Arc::new(ScriptedClient::new());
        let stage = TranslateStage::new(client.clone());
        let update = stage.run(&AnalysisState::default()).await.unwrap();
        assert_eq!(update.fields(), vec![Field::UtterancesEn]);
        assert_eq!(client.calls(), 0);
    }
}
