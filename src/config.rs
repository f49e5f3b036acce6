use crate::graph::ExecutorConfig;
use crate::stages::{ChallengeScoring, KeyMomentLimits, StyleThresholds};

/// Tunables for one analysis run
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    /// Concurrency of the stage graph
    pub executor: ExecutorConfig,
    /// Thresholds for the statistical style classification
    pub style: StyleThresholds,
    /// Constants for the pattern-based challenge score
    pub challenge: ChallengeScoring,
    /// Caps on rule-derived key moments
    pub key_moments: KeyMomentLimits,
}
