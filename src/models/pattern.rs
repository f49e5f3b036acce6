use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Child behavior description left without parental praise
pub const MISSED_POSITIVE_OPPORTUNITY: &str = "긍정기회놓치기";
/// Parent command issued without offering a choice
pub const COMMAND_WITHOUT_CHOICE: &str = "명령과제시";
/// Parent negative talk in reply to the child
pub const CRITICAL_RESPONSE: &str = "비판적반응";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parse a model-supplied severity; anything unrecognized is `Low`
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => Severity::High,
            "medium" | "mid" | "moderate" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Medium and high severities count against challenge scores
    pub fn is_concerning(self) -> bool {
        self >= Severity::Medium
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// A communication pattern detected in the dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_name: String,
    pub description: String,
    /// Indices into the labeled utterance list
    #[serde(default)]
    pub utterance_indices: Vec<usize>,
    #[serde(default)]
    pub severity: Severity,
}

impl Pattern {
    pub fn new(
        pattern_name: impl Into<String>,
        description: impl Into<String>,
        utterance_indices: Vec<usize>,
        severity: Severity,
    ) -> Self {
        Self {
            pattern_name: pattern_name.into(),
            description: description.into(),
            utterance_indices,
            severity,
        }
    }
}

/// Drop patterns repeating an earlier `(pattern_name, utterance_indices)` pair
pub fn dedup_patterns(patterns: Vec<Pattern>) -> Vec<Pattern> {
    let mut seen: HashSet<(String, Vec<usize>)> = HashSet::new();
    patterns
        .into_iter()
        .filter(|p| seen.insert((p.pattern_name.clone(), p.utterance_indices.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("HIGH"), Severity::High);
        assert_eq!(Severity::parse_lenient("medium"), Severity::Medium);
        assert_eq!(Severity::parse_lenient("critical"), Severity::Low);
        assert!(Severity::High.is_concerning());
        assert!(!Severity::Low.is_concerning());
    }

    #[test]
    fn test_dedup_keeps_first() {
        let patterns = vec![
            Pattern::new(CRITICAL_RESPONSE, "rule", vec![2], Severity::High),
            Pattern::new(CRITICAL_RESPONSE, "model", vec![2], Severity::Medium),
            Pattern::new(CRITICAL_RESPONSE, "other index", vec![4], Severity::High),
        ];
        let deduped = dedup_patterns(patterns);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].description, "rule");
        assert_eq!(deduped[1].utterance_indices, vec![4]);
    }
}
