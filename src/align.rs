//! Mapping model output back onto canonical dialogue records.
//!
//! Models echo lines back paraphrased, reordered, merged or dropped. Every
//! function here is pure: it takes the canonical records plus whatever the
//! model returned and decides which canonical record each output belongs to.

use std::collections::HashSet;

use serde_json::Value;

use crate::models::{DialogueLine, LabeledUtterance, Speaker};

/// How a model line was matched to a canonical target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    /// Trimmed strings are identical
    Exact,
    /// One speaker-stripped, lowercased string contains the other
    Containment,
    /// No textual match; took the first target not yet consumed
    Positional,
}

/// Result of aligning model output lines onto canonical target lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alignment {
    assignments: Vec<Option<(usize, MatchTier)>>,
}

impl Alignment {
    /// Index of the model line assigned to `target`, if any
    pub fn candidate_for(&self, target: usize) -> Option<usize> {
        self.assignments.get(target).copied().flatten().map(|(c, _)| c)
    }

    pub fn tier_for(&self, target: usize) -> Option<MatchTier> {
        self.assignments.get(target).copied().flatten().map(|(_, t)| t)
    }

    pub fn count(&self, tier: MatchTier) -> usize {
        self.assignments
            .iter()
            .filter(|a| matches!(a, Some((_, t)) if *t == tier))
            .count()
    }

    /// Targets no model line was assigned to
    pub fn unmatched(&self) -> usize {
        self.assignments.iter().filter(|a| a.is_none()).count()
    }
}

/// Drop a leading prompt speaker label (`Parent:`, `[MOM]`, ...)
pub fn strip_speaker_prefix(line: &str) -> &str {
    let trimmed = line.trim();
    ["Parent:", "Child:", "[MOM]", "[CHI]"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn loose(line: &str) -> String {
    strip_speaker_prefix(line).to_lowercase()
}

/// Assign each model line (`candidates`, in order) to a canonical target.
///
/// Tiers are tried per candidate: exact match, containment in either
/// direction, then the first unconsumed target. A target is consumed by the
/// first candidate that claims it. Surplus candidates are discarded and
/// targets left over stay unassigned.
pub fn align_lines<T: AsRef<str>, C: AsRef<str>>(targets: &[T], candidates: &[C]) -> Alignment {
    let mut assignments: Vec<Option<(usize, MatchTier)>> = vec![None; targets.len()];
    let loose_targets: Vec<String> = targets.iter().map(|t| loose(t.as_ref())).collect();

    for (c, candidate) in candidates.iter().enumerate() {
        let candidate = candidate.as_ref();
        let free = |t: &usize| assignments[*t].is_none();

        let exact = (0..targets.len())
            .filter(free)
            .find(|&t| targets[t].as_ref().trim() == candidate.trim());

        let chosen = match exact {
            Some(t) => Some((t, MatchTier::Exact)),
            None => {
                let needle = loose(candidate);
                let contained = (!needle.is_empty())
                    .then(|| {
                        (0..targets.len()).filter(free).find(|&t| {
                            let hay = &loose_targets[t];
                            !hay.is_empty()
                                && (hay.contains(&needle) || needle.contains(hay.as_str()))
                        })
                    })
                    .flatten();

                match contained {
                    Some(t) => Some((t, MatchTier::Containment)),
                    None => (0..targets.len())
                        .find(|t| free(t))
                        .map(|t| (t, MatchTier::Positional)),
                }
            }
        };

        match chosen {
            Some((t, tier)) => assignments[t] = Some((c, tier)),
            // Every target is consumed; remaining candidates are surplus
            None => break,
        }
    }

    Alignment { assignments }
}

fn contains_either(needle_lower: &str, hay: &str) -> bool {
    let hay = hay.trim().to_lowercase();
    !hay.is_empty() && (hay.contains(needle_lower) || needle_lower.contains(hay.as_str()))
}

/// Rebuild a model-quoted dialogue line with canonical text.
///
/// The model's speaker is normalized to a role; the first labeled utterance of
/// that role whose English or canonical text contains (or is contained in) the
/// quoted text supplies the canonical text. Without a match the model's own
/// text is kept.
pub fn reconstruct_line(
    speaker: &str,
    text: &str,
    utterances: &[LabeledUtterance],
) -> DialogueLine {
    let role = Speaker::from_role_name(speaker);
    let needle = text.trim().to_lowercase();

    let matched = if needle.is_empty() {
        None
    } else {
        utterances.iter().find(|u| {
            role.is_none_or(|r| r == u.speaker)
                && (contains_either(&needle, &u.english)
                    || contains_either(&needle, &u.original_ko))
        })
    };

    match matched {
        Some(u) => DialogueLine::from_utterance(u),
        None => DialogueLine {
            speaker: role
                .map(|r| r.role().to_string())
                .unwrap_or_else(|| speaker.trim().to_lowercase()),
            text: text.trim().to_string(),
        },
    }
}

/// Lines picked by index; accepts integers and numeric strings, skips the rest
pub fn lines_by_indices(indices: &[Value], lines: &[String]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|v| match v {
            Value::Number(n) => n.as_u64().map(|i| i as usize),
            Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        })
        .filter_map(|i| lines.get(i).cloned())
        .collect()
}

/// Map quoted highlight strings back to the first line that equals or contains them
pub fn lines_by_text(highlights: &[String], lines: &[String]) -> Vec<String> {
    highlights
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .filter_map(|h| {
            lines
                .iter()
                .find(|line| line.as_str() == h)
                .or_else(|| lines.iter().find(|line| line.contains(h)))
                .cloned()
        })
        .collect()
}

/// Remove repeated lines, keeping first occurrences in order
pub fn dedup_lines(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}
