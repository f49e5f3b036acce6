use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::models::InputUtterance;

/// Dialogue as read from a file or request
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueInput {
    /// Freeform text, one utterance per line
    Text(String),
    /// Strings or `{speaker, text}` records
    Utterances(Vec<InputUtterance>),
}

impl DialogueInput {
    /// Plain text rendering, one line per utterance
    pub fn to_text(&self) -> String {
        match self {
            DialogueInput::Text(text) => text.clone(),
            DialogueInput::Utterances(utterances) => utterances
                .iter()
                .map(|u| match u {
                    InputUtterance::Structured { speaker, text } => {
                        format!("{}: {}", speaker.trim(), text.trim())
                    }
                    InputUtterance::Legacy(line) => line.trim().to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            DialogueInput::Text(text) => text.trim().is_empty(),
            DialogueInput::Utterances(utterances) => utterances.is_empty(),
        }
    }
}

/// JSON arrays become utterance lists; anything else is freeform text
pub fn parse_dialogue(content: &str) -> DialogueInput {
    if content.trim_start().starts_with('[') {
        if let Ok(utterances) = serde_json::from_str::<Vec<InputUtterance>>(content) {
            return DialogueInput::Utterances(utterances);
        }
    }
    DialogueInput::Text(content.to_string())
}

/// Read a dialogue file (plain text or JSON array)
pub fn read_dialogue_file(path: &Path) -> Result<DialogueInput> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    Ok(parse_dialogue(&content))
}

pub fn read_json_file(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON: {:?}", path))
}

/// Inline JSON, or the path of a JSON file
pub fn parse_json_arg(arg: &str) -> Result<Value> {
    let path = Path::new(arg);
    if path.is_file() {
        return read_json_file(path);
    }
    serde_json::from_str(arg)
        .with_context(|| format!("Argument is neither a file nor valid JSON: {arg}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_plain_text() {
        let input = parse_dialogue("부모: 숙제 했니?\n아이: 하기 싫어.");
        assert_eq!(input, DialogueInput::Text("부모: 숙제 했니?\n아이: 하기 싫어.".to_string()));
        assert!(!input.is_blank());
    }

    #[test]
    fn test_parse_mixed_json_array() {
        let input =
            parse_dialogue(r#"[{"speaker": "MOM", "text": "숙제 했니?"}, "아이: 하기 싫어."]"#);
        let DialogueInput::Utterances(utterances) = &input else {
            panic!("expected utterances, got {input:?}");
        };
        assert_eq!(utterances.len(), 2);
        assert_eq!(input.to_text(), "MOM: 숙제 했니?\n아이: 하기 싫어.");
    }

    #[test]
    fn test_bracketed_text_that_is_not_json() {
        let input = parse_dialogue("[엄마] 숙제 했니?");
        assert_eq!(input, DialogueInput::Text("[엄마] 숙제 했니?".to_string()));
    }

    #[test]
    fn test_json_arg_inline_or_file() {
        assert_eq!(parse_json_arg(r#"{"goal": 1}"#).unwrap()["goal"], 1);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("challenge.json");
        fs::write(&path, r#"{"goal": "칭찬 3회"}"#).unwrap();
        let value = parse_json_arg(path.to_str().unwrap()).unwrap();
        assert_eq!(value["goal"], "칭찬 3회");

        assert!(parse_json_arg("not json").is_err());
    }
}
