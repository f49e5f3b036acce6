use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::graph::Stage;
use crate::models::FinalResult;
use crate::state::{AnalysisState, Field, FieldValue, StateUpdate};

/// Stage 5: project the analysis outputs into the final report
pub struct AggregateStage;

#[async_trait]
impl Stage<AnalysisState> for AggregateStage {
    fn name(&self) -> &'static str {
        super::AGGREGATE
    }

    fn inputs(&self) -> &'static [Field] {
        &[
            Field::Summary,
            Field::KeyMoments,
            Field::StyleAnalysis,
            Field::CoachingPlan,
            Field::ChallengeEval,
            Field::Patterns,
            Field::Meta,
        ]
    }

    fn outputs(&self) -> &'static [Field] {
        &[Field::Result]
    }

    async fn run(&self, state: &AnalysisState) -> Result<StateUpdate> {
        let result = aggregate(state);
        info!(
            "Stage 5: Aggregated result ({} patterns, style {})",
            result.patterns.len(),
            result.style_analysis.style_type
        );
        Ok(FieldValue::Result(Box::new(result)).into())
    }
}

/// Missing sections become their empty defaults
pub fn aggregate(state: &AnalysisState) -> FinalResult {
    FinalResult {
        summary: state.summary.clone().unwrap_or_default(),
        key_moments: state.key_moments.clone().unwrap_or_default(),
        style_analysis: state.style_analysis.clone().unwrap_or_default(),
        coaching_plan: state.coaching_plan.clone().unwrap_or_default(),
        challenge_eval: state.challenge_eval.clone().unwrap_or_default(),
        patterns: state.patterns().to_vec(),
        meta: state.meta.clone(),
    }
}
