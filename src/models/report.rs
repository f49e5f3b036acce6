use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{DialogueLine, Pattern};

/// A moment where the parent responded well
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositiveMoment {
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub reason: String,
    /// Short name of the pattern this moment illustrates
    #[serde(default)]
    pub pattern_hint: String,
}

/// A moment with a suggested better parental response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementMoment {
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub better_response: String,
    #[serde(default)]
    pub pattern_hint: String,
}

/// An illustrated occurrence of a detected pattern
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternExample {
    #[serde(default)]
    pub pattern_name: String,
    #[serde(default = "one")]
    pub occurrences: usize,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub problem_explanation: String,
    #[serde(default)]
    pub suggested_response: String,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMoments {
    #[serde(default)]
    pub positive: Vec<PositiveMoment>,
    #[serde(default)]
    pub needs_improvement: Vec<ImprovementMoment>,
    #[serde(default)]
    pub pattern_examples: Vec<PatternExample>,
}

impl KeyMoments {
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty()
            && self.needs_improvement.is_empty()
            && self.pattern_examples.is_empty()
    }
}

/// Parenting style classification with locally computed label statistics.
///
/// Ratios are always recomputed from the labeled utterances; only
/// `style_type`, `overall_assessment` and extra keys may come from a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleAnalysis {
    #[serde(default)]
    pub style_type: String,
    /// Code -> count over parent utterances
    #[serde(default)]
    pub label_distribution: BTreeMap<String, usize>,
    #[serde(default)]
    pub positive_ratio: f64,
    #[serde(default)]
    pub negative_ratio: f64,
    #[serde(default)]
    pub command_ratio: f64,
    #[serde(default)]
    pub question_ratio: f64,
    #[serde(default)]
    pub reflection_ratio: f64,
    #[serde(default)]
    pub overall_assessment: String,
    /// Additional keys a model chose to include
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoachingPlan {
    #[serde(default)]
    pub full_text: String,
    #[serde(default, deserialize_with = "string_list")]
    pub improvement_points: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub action_items: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub next_techniques: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub long_term_goals: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CoachingPlan {
    /// True when no section carries any item
    pub fn has_no_sections(&self) -> bool {
        self.improvement_points.is_empty()
            && self.action_items.is_empty()
            && self.next_techniques.is_empty()
            && self.long_term_goals.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeEval {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub challenge_met: bool,
    /// Always within 0..=100
    #[serde(default, deserialize_with = "clamped_score")]
    pub score: u32,
    #[serde(default, deserialize_with = "string_list")]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, deserialize_with = "string_list")]
    pub improvement_suggestions: Vec<String>,
}

/// The aggregated analysis report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_moments: KeyMoments,
    #[serde(default)]
    pub style_analysis: StyleAnalysis,
    #[serde(default)]
    pub coaching_plan: CoachingPlan,
    #[serde(default)]
    pub challenge_eval: ChallengeEval,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        other => Some(other.to_string()),
    }
}

/// Accept a list of strings, a list of mixed values, or a single value
fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.into_iter().filter_map(value_to_text).collect(),
        other => value_to_text(other).into_iter().collect(),
    })
}

fn clamped_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(raw.round().clamp(0.0, 100.0) as u32)
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "met" | "예" | "달성"
        ),
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    })
}
