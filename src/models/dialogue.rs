use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::DpicsCode;

/// Speaker markers recognized for the parent role (matched case-insensitively)
pub const PARENT_MARKERS: &[&str] = &[
    "부모", "엄마", "아빠", "어머니", "아버지", "Parent", "Mom", "Dad", "Mother", "Father",
];

/// Speaker markers recognized for the child role (matched case-insensitively)
pub const CHILD_MARKERS: &[&str] = &[
    "아이", "자녀", "아들", "딸", "Child", "Kid", "Son", "Daughter",
];

static BRACKET_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    let labels = [PARENT_MARKERS, CHILD_MARKERS].concat().join("|");
    Regex::new(&format!(r"(?i)^\[({labels})\]\s*(.+)$")).expect("static regex")
});

static PARENT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    let labels = PARENT_MARKERS.join("|");
    Regex::new(&format!(r"(?i)^({labels})[:\s]+(.+)$")).expect("static regex")
});

static CHILD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    let labels = CHILD_MARKERS.join("|");
    Regex::new(&format!(r"(?i)^({labels})[:\s]+(.+)$")).expect("static regex")
});

/// Who is talking in a dialogue line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "MOM")]
    Parent,
    #[serde(rename = "CHI")]
    Child,
}

impl Speaker {
    /// Short code used in normalized transcripts and classifier input
    pub fn code(self) -> &'static str {
        match self {
            Speaker::Parent => "MOM",
            Speaker::Child => "CHI",
        }
    }

    /// Label used when rendering lines for a model prompt
    pub fn prompt_label(self) -> &'static str {
        match self {
            Speaker::Parent => "Parent",
            Speaker::Child => "Child",
        }
    }

    /// Lowercase role name used in reconstructed dialogue excerpts
    pub fn role(self) -> &'static str {
        match self {
            Speaker::Parent => "parent",
            Speaker::Child => "child",
        }
    }

    pub fn flip(self) -> Self {
        match self {
            Speaker::Parent => Speaker::Child,
            Speaker::Child => Speaker::Parent,
        }
    }

    /// Resolve a free-form role name in either language to a speaker
    pub fn from_role_name(name: &str) -> Option<Self> {
        let lowered = name.trim().to_lowercase();
        if lowered == "mom" || lowered == "parent" || lowered_in(&lowered, PARENT_MARKERS) {
            Some(Speaker::Parent)
        } else if lowered == "chi" || lowered == "child" || lowered_in(&lowered, CHILD_MARKERS) {
            Some(Speaker::Child)
        } else {
            None
        }
    }
}

fn lowered_in(value: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| m.to_lowercase() == value)
}

/// Split an explicit speaker marker off a line.
///
/// Tries the bracketed form (`[엄마] ...`) first, then the prefix form
/// (`엄마: ...` or `엄마 ...`). Returns `None` when the line carries no marker.
pub fn parse_speaker_marker(line: &str) -> Option<(Speaker, String)> {
    let line = line.trim();

    if let Some(caps) = BRACKET_MARKER.captures(line) {
        let speaker = Speaker::from_role_name(&caps[1])?;
        return Some((speaker, caps[2].trim().to_string()));
    }

    if let Some(caps) = PARENT_PREFIX.captures(line) {
        return Some((Speaker::Parent, caps[2].trim().to_string()));
    }

    CHILD_PREFIX
        .captures(line)
        .map(|caps| (Speaker::Child, caps[2].trim().to_string()))
}

/// One dialogue line as supplied by a caller.
///
/// Callers may send either bare strings (optionally carrying a speaker marker)
/// or records with an explicit speaker. Preprocessing resolves both into
/// [`Utterance`] and nothing downstream sees this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputUtterance {
    Structured { speaker: String, text: String },
    Legacy(String),
}

impl From<&str> for InputUtterance {
    fn from(line: &str) -> Self {
        InputUtterance::Legacy(line.to_string())
    }
}

impl From<String> for InputUtterance {
    fn from(line: String) -> Self {
        InputUtterance::Legacy(line)
    }
}

/// A speaker-normalized utterance in the canonical language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub speaker: Speaker,
    pub text: String,
}

impl Utterance {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// An utterance carrying both the canonical text and its English rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedUtterance {
    pub speaker: Speaker,
    /// Canonical (Korean) text, never rewritten after preprocessing
    pub original_ko: String,
    pub english: String,
}

impl TranslatedUtterance {
    /// Untranslated passthrough: the English slot repeats the canonical text
    pub fn passthrough(utterance: &Utterance) -> Self {
        Self {
            speaker: utterance.speaker,
            original_ko: utterance.text.clone(),
            english: utterance.text.clone(),
        }
    }
}

/// A translated utterance with its DPICS code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledUtterance {
    pub speaker: Speaker,
    pub original_ko: String,
    pub english: String,
    pub label: DpicsCode,
}

impl LabeledUtterance {
    pub fn new(utterance: TranslatedUtterance, label: DpicsCode) -> Self {
        Self {
            speaker: utterance.speaker,
            original_ko: utterance.original_ko,
            english: utterance.english,
            label,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.speaker == Speaker::Parent
    }
}

/// A speaker/text pair inside a reconstructed dialogue excerpt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
}

impl DialogueLine {
    pub fn from_utterance(utterance: &LabeledUtterance) -> Self {
        Self {
            speaker: utterance.speaker.role().to_string(),
            text: utterance.original_ko.clone(),
        }
    }
}
