use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::graph::Stage;
use crate::llm::{
    CompletionClient, Prompt, STYLE_SYSTEM_PROMPT, first_json_object, format_labeled,
    format_patterns,
};
use crate::models::{DpicsCode, LabeledUtterance, StyleAnalysis};
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Style types a model may report; anything else is reclassified locally
pub const STYLE_TYPES: [&str; 5] = [
    "authoritative",
    "authoritarian",
    "permissive",
    "uninvolved",
    "mixed",
];

/// Keys always computed locally, whatever the model sends
const LOCAL_KEYS: [&str; 6] = [
    "label_distribution",
    "positive_ratio",
    "negative_ratio",
    "command_ratio",
    "question_ratio",
    "reflection_ratio",
];

/// Ratio thresholds for the statistical style classification
#[derive(Debug, Clone)]
pub struct StyleThresholds {
    /// Command ratio above which a parent may be authoritarian
    pub command_high: f64,
    /// Negative ratio above which a parent may be authoritarian
    pub negative_high: f64,
    /// Praise ratio above which a parent may be authoritative
    pub praise_high: f64,
    /// Reflection ratio above which a parent may be authoritative
    pub reflection_high: f64,
    /// Command and negative ratios below this suggest permissiveness
    pub low: f64,
}

impl Default for StyleThresholds {
    fn default() -> Self {
        Self {
            command_high: 0.3,
            negative_high: 0.2,
            praise_high: 0.3,
            reflection_high: 0.2,
            low: 0.1,
        }
    }
}

/// Label statistics over parent utterances
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelStats {
    pub distribution: BTreeMap<String, usize>,
    pub positive_ratio: f64,
    pub negative_ratio: f64,
    pub command_ratio: f64,
    pub question_ratio: f64,
    pub reflection_ratio: f64,
}

impl LabelStats {
    pub fn from_labeled(labeled: &[LabeledUtterance]) -> Self {
        let parents: Vec<&LabeledUtterance> = labeled.iter().filter(|u| u.is_parent()).collect();
        let mut distribution = BTreeMap::new();
        for u in &parents {
            *distribution.entry(u.label.as_str().to_string()).or_insert(0) += 1;
        }

        let ratio = |code: DpicsCode| {
            if parents.is_empty() {
                0.0
            } else {
                distribution.get(code.as_str()).copied().unwrap_or(0) as f64 / parents.len() as f64
            }
        };

        Self {
            positive_ratio: ratio(DpicsCode::Praise),
            negative_ratio: ratio(DpicsCode::Negative),
            command_ratio: ratio(DpicsCode::Command),
            question_ratio: ratio(DpicsCode::Question),
            reflection_ratio: ratio(DpicsCode::Reflection),
            distribution,
        }
    }

    /// Overwrite every statistic on `analysis` with the local values
    pub fn apply(&self, analysis: &mut StyleAnalysis) {
        analysis.label_distribution = self.distribution.clone();
        analysis.positive_ratio = self.positive_ratio;
        analysis.negative_ratio = self.negative_ratio;
        analysis.command_ratio = self.command_ratio;
        analysis.question_ratio = self.question_ratio;
        analysis.reflection_ratio = self.reflection_ratio;
    }
}

/// Style type from label ratios alone
pub fn classify_style(stats: &LabelStats, thresholds: &StyleThresholds) -> &'static str {
    if stats.command_ratio > thresholds.command_high
        && stats.negative_ratio > thresholds.negative_high
    {
        "authoritarian"
    } else if stats.positive_ratio > thresholds.praise_high
        && stats.reflection_ratio > thresholds.reflection_high
    {
        "authoritative"
    } else if stats.command_ratio < thresholds.low && stats.negative_ratio < thresholds.low {
        "permissive"
    } else {
        "mixed"
    }
}

/// Statistical analysis used when no model answer is usable
pub fn statistical_style(stats: &LabelStats, thresholds: &StyleThresholds) -> StyleAnalysis {
    let style_type = classify_style(stats, thresholds);
    let mut analysis = StyleAnalysis {
        style_type: style_type.to_string(),
        overall_assessment: format!("통계 기반 분석: {style_type} 스타일로 추정됩니다."),
        ..Default::default()
    };
    stats.apply(&mut analysis);
    analysis
}

/// Stage 4c: parenting style classification
pub struct StyleStage {
    client: Arc<dyn CompletionClient>,
    thresholds: StyleThresholds,
}

impl StyleStage {
    pub fn new(client: Arc<dyn CompletionClient>, thresholds: StyleThresholds) -> Self {
        Self { client, thresholds }
    }

    /// Merge a parsed model object with local statistics
    fn from_model(&self, mut object: Map<String, Value>, stats: &LabelStats) -> StyleAnalysis {
        for key in LOCAL_KEYS {
            object.remove(key);
        }
        let mut analysis: StyleAnalysis =
            serde_json::from_value(Value::Object(object)).unwrap_or_default();
        stats.apply(&mut analysis);

        let reported = analysis.style_type.trim().to_lowercase();
        if STYLE_TYPES.contains(&reported.as_str()) {
            analysis.style_type = reported;
        } else {
            let local = classify_style(stats, &self.thresholds);
            debug!("Model style type {:?} not recognized, using {}", analysis.style_type, local);
            analysis.style_type = local.to_string();
        }

        if analysis.overall_assessment.trim().is_empty() {
            analysis.overall_assessment =
                format!("통계 기반 분석: {} 스타일로 추정됩니다.", analysis.style_type);
        }
        analysis
    }
}

#[async_trait]
impl Stage<AnalysisState> for StyleStage {
    fn name(&self) -> &'static str {
        super::ANALYZE_STYLE
    }

    fn inputs(&self) -> &'static [Field] {
        &[Field::UtterancesLabeled, Field::Patterns]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::StyleAnalysis]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let labeled = state.labeled();
        if labeled.is_empty() {
            let analysis = StyleAnalysis {
                style_type: "unknown".to_string(),
                overall_assessment: "분석할 데이터가 없습니다.".to_string(),
                ..Default::default()
            };
            return Ok(FieldValue::StyleAnalysis(analysis).into());
        }

        let stats = LabelStats::from_labeled(labeled);
        let prompt = Prompt::new(
            STYLE_SYSTEM_PROMPT,
            format!(
                "Labeled utterances:\n{}\n\nDetected patterns:\n{}\n\nReturn the JSON object only.",
                format_labeled(labeled),
                format_patterns(state.patterns())
            ),
        );

        let analysis = match self.client.complete(&prompt).await {
            Ok(reply) => match first_json_object(&reply) {
                Some(object) => self.from_model(object, &stats),
                None => {
                    warn!("Style reply contained no JSON object, using statistics");
                    statistical_style(&stats, &self.thresholds)
                }
            },
            Err(e) => {
                warn!("Style analysis failed, using statistics: {:#}", e);
                statistical_style(&stats, &self.thresholds)
            }
        };

        info!(
            "Stage 4: Style {} (praise {:.2}, command {:.2}, negative {:.2})",
            analysis.style_type,
            analysis.positive_ratio,
            analysis.command_ratio,
            analysis.negative_ratio
        );

        Ok(FieldValue::StyleAnalysis(analysis).into())
    }
}
