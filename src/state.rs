use serde_json::{Map, Value};

use crate::graph::GraphState;
use crate::models::{
    ChallengeEval, CoachingPlan, FinalResult, InputUtterance, KeyMoments, LabeledUtterance,
    Pattern, StyleAnalysis, TranslatedUtterance, Utterance,
};

/// Named fields of [`AnalysisState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    // Seeded by the caller
    Message,
    UtterancesKo,
    ChallengeSpec,
    Meta,
    Tdl,
    Context,
    // Produced by stages
    UtterancesNormalized,
    UtterancesEn,
    UtterancesLabeled,
    Patterns,
    Summary,
    KeyMoments,
    StyleAnalysis,
    CoachingPlan,
    ChallengeEval,
    Result,
    Annotated,
    Highlights,
    Advice,
}

impl Field {
    /// Fields a caller provides before the run starts
    pub const SEEDS: [Field; 6] = [
        Field::Message,
        Field::UtterancesKo,
        Field::ChallengeSpec,
        Field::Meta,
        Field::Tdl,
        Field::Context,
    ];
}

/// Shared state of one analysis run
#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    /// Freeform dialogue text, one utterance per line
    pub message: Option<String>,
    pub utterances_ko: Vec<InputUtterance>,
    pub challenge_spec: Option<Value>,
    pub meta: Map<String, Value>,
    /// Today's dataset record, passed through untouched
    pub tdl: Value,
    /// Extra caller context for the advice flow
    pub context: Option<String>,

    pub utterances_normalized: Option<Vec<Utterance>>,
    pub utterances_en: Option<Vec<TranslatedUtterance>>,
    pub utterances_labeled: Option<Vec<LabeledUtterance>>,
    pub patterns: Option<Vec<Pattern>>,
    pub summary: Option<String>,
    pub key_moments: Option<KeyMoments>,
    pub style_analysis: Option<StyleAnalysis>,
    pub coaching_plan: Option<CoachingPlan>,
    pub challenge_eval: Option<ChallengeEval>,
    pub result: Option<FinalResult>,
    pub annotated: Option<String>,
    pub highlights: Option<Vec<String>>,
    pub advice: Option<String>,
}

impl AnalysisState {
    pub fn normalized(&self) -> &[Utterance] {
        self.utterances_normalized.as_deref().unwrap_or(&[])
    }

    pub fn translated(&self) -> &[TranslatedUtterance] {
        self.utterances_en.as_deref().unwrap_or(&[])
    }

    pub fn labeled(&self) -> &[LabeledUtterance] {
        self.utterances_labeled.as_deref().unwrap_or(&[])
    }

    pub fn patterns(&self) -> &[Pattern] {
        self.patterns.as_deref().unwrap_or(&[])
    }

    /// Raw dialogue text, with blank input treated as absent
    pub fn message_text(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }
}

/// A value for one stage-produced field
#[derive(Debug, Clone)]
pub enum FieldValue {
    UtterancesNormalized(Vec<Utterance>),
    UtterancesEn(Vec<TranslatedUtterance>),
    UtterancesLabeled(Vec<LabeledUtterance>),
    Patterns(Vec<Pattern>),
    Summary(String),
    KeyMoments(KeyMoments),
    StyleAnalysis(StyleAnalysis),
    CoachingPlan(CoachingPlan),
    ChallengeEval(ChallengeEval),
    Result(Box<FinalResult>),
    Annotated(String),
    Highlights(Vec<String>),
    Advice(String),
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            FieldValue::UtterancesNormalized(_) => Field::UtterancesNormalized,
            FieldValue::UtterancesEn(_) => Field::UtterancesEn,
            FieldValue::UtterancesLabeled(_) => Field::UtterancesLabeled,
            FieldValue::Patterns(_) => Field::Patterns,
            FieldValue::Summary(_) => Field::Summary,
            FieldValue::KeyMoments(_) => Field::KeyMoments,
            FieldValue::StyleAnalysis(_) => Field::StyleAnalysis,
            FieldValue::CoachingPlan(_) => Field::CoachingPlan,
            FieldValue::ChallengeEval(_) => Field::ChallengeEval,
            FieldValue::Result(_) => Field::Result,
            FieldValue::Annotated(_) => Field::Annotated,
            FieldValue::Highlights(_) => Field::Highlights,
            FieldValue::Advice(_) => Field::Advice,
        }
    }
}

/// Partial state returned by a stage
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    values: Vec<FieldValue>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: FieldValue) -> Self {
        self.values.push(value);
        self
    }

    pub fn fields(&self) -> Vec<Field> {
        self.values.iter().map(FieldValue::field).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<FieldValue> for StateUpdate {
    fn from(value: FieldValue) -> Self {
        Self::new().with(value)
    }
}

impl GraphState for AnalysisState {
    type Field = Field;
    type Update = StateUpdate;

    fn written_fields(update: &StateUpdate) -> Vec<Field> {
        update.fields()
    }

    fn merge(&mut self, update: StateUpdate) {
        for value in update.values {
            match value {
                FieldValue::UtterancesNormalized(v) => self.utterances_normalized = Some(v),
                FieldValue::UtterancesEn(v) => self.utterances_en = Some(v),
                FieldValue::UtterancesLabeled(v) => self.utterances_labeled = Some(v),
                FieldValue::Patterns(v) => self.patterns = Some(v),
                FieldValue::Summary(v) => self.summary = Some(v),
                FieldValue::KeyMoments(v) => self.key_moments = Some(v),
                FieldValue::StyleAnalysis(v) => self.style_analysis = Some(v),
                FieldValue::CoachingPlan(v) => self.coaching_plan = Some(v),
                FieldValue::ChallengeEval(v) => self.challenge_eval = Some(v),
                FieldValue::Result(v) => self.result = Some(*v),
                FieldValue::Annotated(v) => self.annotated = Some(v),
                FieldValue::Highlights(v) => self.highlights = Some(v),
                FieldValue::Advice(v) => self.advice = Some(v),
            }
        }
    }
}
