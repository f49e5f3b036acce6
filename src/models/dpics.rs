use std::fmt;

use serde::{Deserialize, Serialize};

/// DPICS behavior code - a closed set, anything else collapses to `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DpicsCode {
    /// Labeled or unlabeled praise
    #[serde(rename = "PR")]
    Praise,
    /// Reflective statement
    #[serde(rename = "RD")]
    Reflection,
    /// Behavior description
    #[serde(rename = "BD")]
    BehaviorDescription,
    /// Neutral talk
    #[serde(rename = "NT")]
    NeutralTalk,
    #[serde(rename = "Q")]
    Question,
    #[serde(rename = "CMD")]
    Command,
    /// Negative talk or criticism
    #[serde(rename = "NEG")]
    Negative,
    #[serde(rename = "IGN")]
    Ignore,
    #[serde(rename = "OTH")]
    Other,
}

impl DpicsCode {
    pub const ALL: [DpicsCode; 9] = [
        DpicsCode::Praise,
        DpicsCode::Reflection,
        DpicsCode::BehaviorDescription,
        DpicsCode::NeutralTalk,
        DpicsCode::Question,
        DpicsCode::Command,
        DpicsCode::Negative,
        DpicsCode::Ignore,
        DpicsCode::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DpicsCode::Praise => "PR",
            DpicsCode::Reflection => "RD",
            DpicsCode::BehaviorDescription => "BD",
            DpicsCode::NeutralTalk => "NT",
            DpicsCode::Question => "Q",
            DpicsCode::Command => "CMD",
            DpicsCode::Negative => "NEG",
            DpicsCode::Ignore => "IGN",
            DpicsCode::Other => "OTH",
        }
    }

    /// Parse a short code, ignoring surrounding whitespace and case
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Parse a code emitted by a model; unknown strings become `Other`
    pub fn parse_or_other(code: &str) -> Self {
        Self::parse(code).unwrap_or(DpicsCode::Other)
    }

    /// Map a sequence-classifier label name to a code.
    ///
    /// The fine-tuned classifier predicts long-form category names; these are
    /// folded into the short code set here.
    pub fn from_model_label(label: &str) -> Self {
        match label.trim() {
            "Behavior Description" => DpicsCode::BehaviorDescription,
            "Command" => DpicsCode::Command,
            "Labeled Praise" | "Unlabeled Praise" | "Prosocial Talk" => DpicsCode::Praise,
            "Negative Talk" => DpicsCode::Negative,
            "Neutral Talk" => DpicsCode::NeutralTalk,
            "Question" => DpicsCode::Question,
            "Reflective Statement" => DpicsCode::Reflection,
            _ => DpicsCode::Other,
        }
    }
}

impl fmt::Display for DpicsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
