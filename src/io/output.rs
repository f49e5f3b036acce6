use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{DialogueLine, FinalResult};

/// Write any report value as pretty JSON
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {:?}", path))?;
    serde_json::to_writer_pretty(file, value).context("Failed to write JSON")?;
    Ok(())
}

/// Human-readable rendering of a [`FinalResult`]
pub struct ReportText<'a> {
    result: &'a FinalResult,
}

impl<'a> ReportText<'a> {
    pub fn new(result: &'a FinalResult) -> Self {
        Self { result }
    }

    pub fn format(&self) -> String {
        let r = self.result;
        let mut output = String::new();

        output.push_str("== 오늘의 진단 ==\n");
        output.push_str(&wrap_text(&r.summary, 60));
        output.push_str("\n\n");

        let style = &r.style_analysis;
        output.push_str(&format!("== 양육 스타일: {} ==\n", style.style_type));
        output.push_str(&format!(
            "칭찬 {:.0}% / 반영 {:.0}% / 질문 {:.0}% / 명령 {:.0}% / 부정 {:.0}%\n",
            style.positive_ratio * 100.0,
            style.reflection_ratio * 100.0,
            style.question_ratio * 100.0,
            style.command_ratio * 100.0,
            style.negative_ratio * 100.0
        ));
        if !style.overall_assessment.is_empty() {
            output.push_str(&wrap_text(&style.overall_assessment, 60));
            output.push('\n');
        }
        output.push('\n');

        if !r.patterns.is_empty() {
            output.push_str("== 감지된 패턴 ==\n");
            for p in &r.patterns {
                output.push_str(&format!(
                    "- [{}] {}: {}\n",
                    p.severity.as_str(),
                    p.pattern_name,
                    p.description
                ));
            }
            output.push('\n');
        }

        let moments = &r.key_moments;
        if !moments.is_empty() {
            output.push_str("== 핵심 순간 ==\n");
            for m in &moments.positive {
                output.push_str(&format!("(+) {}\n", m.reason));
                push_dialogue(&mut output, &m.dialogue);
            }
            for m in &moments.needs_improvement {
                output.push_str(&format!("(!) {}\n", m.reason));
                push_dialogue(&mut output, &m.dialogue);
                output.push_str(&format!("    -> {}\n", m.better_response));
            }
            for e in &moments.pattern_examples {
                output.push_str(&format!(
                    "(#) {} x{}: {}\n",
                    e.pattern_name, e.occurrences, e.problem_explanation
                ));
                push_dialogue(&mut output, &e.dialogue);
                output.push_str(&format!("    -> {}\n", e.suggested_response));
            }
            output.push('\n');
        }

        let plan = &r.coaching_plan;
        if !plan.has_no_sections() {
            output.push_str("== 코칭 계획 ==\n");
            for (heading, items) in [
                ("핵심 개선 포인트", &plan.improvement_points),
                ("실천 방법", &plan.action_items),
                ("시도해볼 기법", &plan.next_techniques),
                ("장기적 목표", &plan.long_term_goals),
            ] {
                if items.is_empty() {
                    continue;
                }
                output.push_str(&format!("{heading}:\n"));
                for item in items {
                    output.push_str(&format!("  - {item}\n"));
                }
            }
            output.push('\n');
        }

        let eval = &r.challenge_eval;
        output.push_str(&format!(
            "== 챌린지: {} ({}점) ==\n",
            if eval.challenge_met { "달성" } else { "미달성" },
            eval.score
        ));
        if !eval.feedback.is_empty() {
            output.push_str(&wrap_text(&eval.feedback, 60));
            output.push('\n');
        }

        output
    }

    /// Write to a text file
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        write!(file, "{}", self.format())?;
        Ok(())
    }
}

fn push_dialogue(output: &mut String, lines: &[DialogueLine]) {
    for line in lines {
        output.push_str(&format!("    {}: {}\n", line.speaker, line.text));
    }
}

/// Wrap text at approximately `width` characters, keeping paragraph breaks
fn wrap_text(text: &str, width: usize) -> String {
    text.lines()
        .map(|paragraph| {
            let mut result = String::new();
            let mut line_len = 0;
            for word in paragraph.split_whitespace() {
                let word_len = word.chars().count();
                if line_len + word_len + 1 > width && line_len > 0 {
                    result.push('\n');
                    line_len = 0;
                }
                if line_len > 0 {
                    result.push(' ');
                    line_len += 1;
                }
                result.push_str(word);
                line_len += word_len;
            }
            result
        })
        .collect::<Vec<_>>()
        .join("\n")
}
