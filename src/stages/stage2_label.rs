use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::align::{MatchTier, align_lines};
use crate::classify::DpicsClassifier;
use crate::graph::Stage;
use crate::models::{DpicsCode, LabeledUtterance, TranslatedUtterance};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Stage 2: DPICS-code every translated utterance
pub struct LabelStage {
    classifier: Arc<DpicsClassifier>,
}

impl LabelStage {
    pub fn new(classifier: Arc<DpicsClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Stage<AnalysisState> for LabelStage {
    fn name(&self) -> &'static str {
        super::LABEL
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesEn]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::UtterancesLabeled]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let translated = state.translated();
        if translated.is_empty() {
            return Ok(FieldValue::UtterancesLabeled(Vec::new()).into());
        }

        let lines: Vec<String> = translated.iter().map(classifier_line).collect();
        let pairs = self.classifier.classify(&lines).await;
        let labeled = attach_labels(translated, &lines, &pairs);

        let unlabeled = labeled.iter().filter(|u| u.label == DpicsCode::Other).count();
        info!(
            "Stage 2: Labeled {} utterances ({} OTH)",
            labeled.len(),
            unlabeled
        );

        Ok(FieldValue::UtterancesLabeled(labeled).into())
    }
}

/// `Parent: <english>` line sent to the classifier
pub fn classifier_line(utterance: &TranslatedUtterance) -> String {
    format!("{}: {}", utterance.speaker.prompt_label(), utterance.english)
}

/// Align classifier output onto the source utterances; one label per source
pub fn attach_labels(
    translated: &[TranslatedUtterance],
    lines: &[String],
    pairs: &[(String, DpicsCode)],
) -> Vec<LabeledUtterance> {
    let candidates: Vec<&str> = pairs.iter().map(|(line, _)| line.as_str()).collect();
    let alignment = align_lines(lines, &candidates);

    let positional = alignment.count(MatchTier::Positional);
    if positional > 0 {
        warn!("{} labels assigned by position; codes may be misattributed", positional);
    }

    translated
        .iter()
        .enumerate()
        .map(|(i, u)| {
            let code = alignment
                .candidate_for(i)
                .map(|c| pairs[c].1)
                .unwrap_or(DpicsCode::Other);
            LabeledUtterance::new(u.clone(), code)
        })
        .collect()
}
