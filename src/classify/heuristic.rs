//! Keyword fallback used when no model labels are available

use crate::align::strip_speaker_prefix;
use crate::models::DpicsCode;

const QUESTION_WORDS: &[&str] = &["왜", "어디", "무엇"];
const COMMAND_WORDS: &[&str] = &["해주세요", "해", "하지마", "그만", "지금", "해라"];
const PRAISE_WORDS: &[&str] = &["잘했", "고마", "멋지", "great", "good", "nice"];
const NEGATIVE_WORDS: &[&str] = &["싫어", "나빠", "짜증", "못해", "미워", "bad", "hate"];

/// Question, then command, praise and negative keywords; neutral otherwise
pub fn code_for_line(line: &str) -> DpicsCode {
    let text = strip_speaker_prefix(line);
    let lower = text.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if text.ends_with('?') || has_any(QUESTION_WORDS) {
        DpicsCode::Question
    } else if has_any(COMMAND_WORDS) {
        DpicsCode::Command
    } else if has_any(PRAISE_WORDS) {
        DpicsCode::Praise
    } else if has_any(NEGATIVE_WORDS) {
        DpicsCode::Negative
    } else {
        DpicsCode::NeutralTalk
    }
}

pub fn label_lines(lines: &[String]) -> Vec<(String, DpicsCode)> {
    lines
        .iter()
        .map(|line| (line.trim().to_string(), code_for_line(line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_precedence() {
        assert_eq!(code_for_line("Parent: 숙제 했니?"), DpicsCode::Question);
        assert_eq!(code_for_line("Parent: 왜 그랬어"), DpicsCode::Question);
        assert_eq!(code_for_line("Parent: 그만 좀 해라"), DpicsCode::Command);
        assert_eq!(code_for_line("Parent: Good job!"), DpicsCode::Praise);
        assert_eq!(code_for_line("Child: I hate this"), DpicsCode::Negative);
        assert_eq!(code_for_line("Child: 오늘 학교 갔어."), DpicsCode::NeutralTalk);
    }

    #[test]
    fn test_label_lines_keeps_order() {
        let lines = vec!["Child: 하기 싫어.".to_string(), "Parent: 고마워".to_string()];
        let labeled = label_lines(&lines);
        assert_eq!(labeled[0], ("Child: 하기 싫어.".to_string(), DpicsCode::Negative));
        assert_eq!(labeled[1].1, DpicsCode::Praise);
    }
}
