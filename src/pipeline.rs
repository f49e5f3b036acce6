//! Entry points: build the stage graphs and run them.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::{Instrument, info, info_span, warn};

use crate::classify::{ClassifierConfig, DpicsClassifier};
use crate::config::AnalysisConfig;
use crate::graph::{Graph, GraphBuilder, GraphError, PipelineError};
use crate::io::{DatasetLookup, DialogueInput, JsonFileDataset};
use crate::llm::{CompletionClient, ProviderConfig, build_client};
use crate::models::FinalResult;
use crate::stages::{
    self, AdviceStage, AggregateStage, AnnotateStage, ChallengeStage, CoachingStage,
    HighlightStage, KeyMomentsStage, LabelStage, PatternStage, PreprocessStage, StyleStage,
    SummarizeStage, TranslateStage, aggregate,
};
use crate::state::{AnalysisState, Field};

/// Stages that fan out after pattern detection and join at aggregation
const PARALLEL_ANALYSIS: [&str; 5] = [
    stages::SUMMARIZE,
    stages::KEY_MOMENTS,
    stages::ANALYZE_STYLE,
    stages::COACHING_PLAN,
    stages::CHALLENGE_EVAL,
];

/// Shared collaborators for every run
pub struct AnalysisContext {
    pub client: Arc<dyn CompletionClient>,
    pub classifier: Arc<DpicsClassifier>,
    pub dataset: Arc<dyn DatasetLookup>,
    pub config: AnalysisConfig,
}

impl AnalysisContext {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        classifier_config: ClassifierConfig,
        dataset: Arc<dyn DatasetLookup>,
        config: AnalysisConfig,
    ) -> Self {
        let classifier = Arc::new(DpicsClassifier::new(classifier_config, Arc::clone(&client)));
        Self {
            client,
            classifier,
            dataset,
            config,
        }
    }

    /// Provider, classifier and dataset settings from the environment
    pub fn from_env(config: AnalysisConfig) -> Result<Self> {
        let provider = ProviderConfig::from_env();
        info!("Using {:?} model {}", provider.provider, provider.model);
        let client = build_client(&provider)?;
        Ok(Self::new(
            client,
            ClassifierConfig::from_env(),
            Arc::new(JsonFileDataset::from_env()),
            config,
        ))
    }

    fn today(&self) -> Value {
        self.dataset.today().unwrap_or_else(|e| {
            warn!("Dataset lookup failed, continuing without it: {:#}", e);
            json!({})
        })
    }
}

/// One analysis request
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub dialogue: DialogueInput,
    pub challenge_spec: Option<Value>,
    pub meta: Map<String, Value>,
}

impl AnalysisInput {
    pub fn new(dialogue: DialogueInput) -> Self {
        Self {
            dialogue,
            challenge_spec: None,
            meta: Map::new(),
        }
    }
}

/// preprocess → translate → label → detect_patterns → five analyses → aggregate
pub fn analysis_graph(ctx: &AnalysisContext) -> Result<Graph<AnalysisState>, GraphError> {
    let config = &ctx.config;
    let mut builder = GraphBuilder::new()
        .seed_fields(Field::SEEDS)
        .config(config.executor.clone())
        .stage(PreprocessStage)
        .stage(TranslateStage::new(Arc::clone(&ctx.client)))
        .stage(LabelStage::new(Arc::clone(&ctx.classifier)))
        .stage(PatternStage::new(Arc::clone(&ctx.client)))
        .stage(SummarizeStage::new(Arc::clone(&ctx.client)))
        .stage(KeyMomentsStage::new(Arc::clone(&ctx.client), config.key_moments.clone()))
        .stage(StyleStage::new(Arc::clone(&ctx.client), config.style.clone()))
        .stage(CoachingStage::new(Arc::clone(&ctx.client)))
        .stage(ChallengeStage::new(Arc::clone(&ctx.client), config.challenge.clone()))
        .stage(AggregateStage)
        .edge(stages::PREPROCESS, stages::TRANSLATE)
        .edge(stages::TRANSLATE, stages::LABEL)
        .edge(stages::LABEL, stages::DETECT_PATTERNS);

    for analysis in PARALLEL_ANALYSIS {
        builder = builder
            .edge(stages::DETECT_PATTERNS, analysis)
            .edge(analysis, stages::AGGREGATE);
    }

    builder.terminal(stages::AGGREGATE).build()
}

/// {dpics_annotate, highlight_extract} → parenting_advice
pub fn advice_graph(ctx: &AnalysisContext) -> Result<Graph<AnalysisState>, GraphError> {
    GraphBuilder::new()
        .seed_fields(Field::SEEDS)
        .config(ctx.config.executor.clone())
        .stage(AnnotateStage::new(Arc::clone(&ctx.classifier)))
        .stage(HighlightStage::new(Arc::clone(&ctx.client)))
        .stage(AdviceStage::new(Arc::clone(&ctx.client)))
        .edge(stages::DPICS_ANNOTATE, stages::PARENTING_ADVICE)
        .edge(stages::HIGHLIGHT_EXTRACT, stages::PARENTING_ADVICE)
        .terminal(stages::PARENTING_ADVICE)
        .build()
}

/// Stamp `run_id` and `generated_at` unless the caller supplied them
fn stamp_meta(meta: &mut Map<String, Value>) -> String {
    let run_id = match meta.get("run_id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            meta.insert("run_id".to_string(), Value::String(id.clone()));
            id
        }
    };
    meta.entry("generated_at")
        .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
    run_id
}

/// Run the full analysis pipeline over one dialogue
pub async fn analyze_dialogue(
    ctx: &AnalysisContext,
    input: AnalysisInput,
) -> Result<FinalResult, PipelineError> {
    let graph = analysis_graph(ctx)?;

    let mut meta = input.meta;
    let run_id = stamp_meta(&mut meta);

    let mut state = AnalysisState {
        challenge_spec: input.challenge_spec,
        meta,
        tdl: ctx.today(),
        ..Default::default()
    };
    match input.dialogue {
        DialogueInput::Text(text) => state.message = Some(text),
        DialogueInput::Utterances(utterances) => state.utterances_ko = utterances,
    }

    let span = info_span!("analysis", run_id = %run_id);
    let state = async {
        info!("Running {} stages", graph.stage_names().len());
        graph.run(state).await
    }
    .instrument(span)
    .await?;

    Ok(state.result.clone().unwrap_or_else(|| aggregate(&state)))
}

/// Annotate, highlight and advise on raw dialogue text
pub async fn legacy_advice(
    ctx: &AnalysisContext,
    dialogue: &str,
    context: Option<String>,
) -> Result<String, PipelineError> {
    let graph = advice_graph(ctx)?;
    let state = AnalysisState {
        message: Some(dialogue.to_string()),
        context,
        tdl: ctx.today(),
        ..Default::default()
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let state = graph
        .run(state)
        .instrument(info_span!("advice", run_id = %run_id))
        .await?;

    Ok(state.advice.unwrap_or_default())
}
