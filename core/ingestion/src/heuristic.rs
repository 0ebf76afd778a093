use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::ExtractionFailed;
use crate::extractor::{constrain_tags, finalize_people, ExtractionContext, Extractor};
use crate::normalizer::{NormalizeOutcome, NormalizedTranscript, Normalizer};

const MAX_SUMMARY_CHARS: usize = 50;

/// Capitalized words that follow "with"/"and" without being names
const NOT_NAMES: &[&str] = &[
    "The", "This", "That", "Then", "We", "They", "He", "She", "It", "My", "Our", "Some",
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "Everyone",
];

fn pattern(src: &str) -> Regex {
    Regex::new(src).expect("built-in pattern")
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3000}'..='\u{303F}' | '\u{4E00}'..='\u{9FFF}' | '\u{FF00}'..='\u{FFEF}')
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `term` occurs in `text`. Latin-script terms must stand as whole
/// words; other scripts have no word breaks, so any occurrence counts.
fn contains_term(text: &str, term: &str) -> bool {
    let latin = term
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '\''));
    if !latin {
        return text.contains(term);
    }
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + term.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '…')
}

/// Rule-based transcript cleanup used when no text-generation backend is
/// configured. Removes fillers and merges fragments; never guesses people
/// or tags.
pub struct HeuristicNormalizer {
    filler_patterns: Vec<Regex>,
    speaker_pattern: Regex,
    cleanup_patterns: Vec<(Regex, &'static str)>,
}

impl Default for HeuristicNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicNormalizer {
    pub fn new() -> Self {
        Self {
            filler_patterns: vec![
                // Hesitation sounds
                pattern(r"(?i)\b(?:um+|uh+|erm+|hmm+|uh-huh)\b[,.]?\s*"),
                // Discourse markers
                pattern(r"(?i)\b(?:you know|i mean|sort of like|kind of like)\b,?\s*"),
                pattern(r"(?i)\blike,\s*"),
                // Chinese interjections and markers used as pauses
                pattern(r"[嗯啊哦呃噢]+[，,。…]*"),
                pattern(r"(?:那个|这个|就是说|就是|然后呢|你说呢|说吧)[，,…]+"),
            ],
            speaker_pattern: pattern(r"^([A-Z][\w'-]{0,30}|\p{Han}{2,4})\s*[:：]\s*(\S.*)$"),
            cleanup_patterns: vec![
                (pattern(r"[ \t]{2,}"), " "),
                (pattern(r"\s+([,，.。!！?？])"), "$1"),
                (pattern(r"([,，])(?:\s*[,，])+"), "$1"),
                (pattern(r"^[,，。.\s]+"), ""),
            ],
        }
    }

    fn strip_fillers(&self, line: &str) -> String {
        let mut text = line.to_string();
        for filler in &self.filler_patterns {
            text = filler.replace_all(&text, "").into_owned();
        }
        for (cleanup, replacement) in &self.cleanup_patterns {
            text = cleanup.replace_all(&text, *replacement).into_owned();
        }
        text.trim().to_string()
    }

    /// Clean a raw transcript into narrative text
    pub fn normalize_text(&self, raw: &str) -> String {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut pending = String::new();

        for line in raw.lines() {
            let line = self.strip_fillers(line);
            if line.is_empty() {
                continue;
            }

            // Attributed lines stay on their own line
            if let Some(caps) = self.speaker_pattern.captures(&line) {
                if !pending.is_empty() {
                    paragraphs.push(std::mem::take(&mut pending));
                }
                paragraphs.push(format!("{}: {}", &caps[1], &caps[2]));
                continue;
            }

            merge_fragment(&mut pending, &line);
        }

        if !pending.is_empty() {
            paragraphs.push(pending);
        }

        paragraphs.join("\n")
    }
}

fn merge_fragment(pending: &mut String, fragment: &str) {
    let Some(last) = pending.chars().last() else {
        pending.push_str(fragment);
        return;
    };
    let next_cjk = fragment.chars().next().map(is_cjk).unwrap_or(false);
    let cjk = is_cjk(last) || next_cjk;

    let joiner = match (is_terminal(last), cjk) {
        (true, true) => "",
        (true, false) => " ",
        (false, true) => "，",
        (false, false) => ", ",
    };
    pending.push_str(joiner);
    pending.push_str(fragment);
}

#[async_trait]
impl Normalizer for HeuristicNormalizer {
    async fn normalize(&self, raw: &str) -> NormalizeOutcome {
        let narrative_text = self.normalize_text(raw);
        debug!(
            "Heuristic normalizer: {} chars -> {} chars",
            raw.chars().count(),
            narrative_text.chars().count()
        );
        NormalizeOutcome {
            transcript: NormalizedTranscript {
                narrative_text,
                ..NormalizedTranscript::default()
            },
            degraded: None,
        }
    }
}

/// Rule-based extraction: known contacts found in the text, plus names
/// introduced by "with"/"和" style phrases
pub struct HeuristicExtractor {
    name_patterns: Vec<Regex>,
    uncategorized_tag: String,
}

impl HeuristicExtractor {
    pub fn new(uncategorized_tag: String) -> Self {
        Self {
            name_patterns: vec![
                pattern(
                    r"\b(?:with|and|met|saw|called|visited|told|asked|texted|joined)\s+([A-Z][a-z]+(?:\s[A-Z][a-z]+)?)",
                ),
                pattern(r"(?:和|跟|与|同)(\p{Han}{2,3}?)(?:一起|见面|吃|喝|聊|去|打)"),
            ],
            uncategorized_tag,
        }
    }

    /// Candidate names in order of appearance
    pub fn candidate_people(&self, text: &str, ctx: &ExtractionContext) -> Vec<String> {
        let mut candidates: Vec<String> = ctx
            .known_people
            .iter()
            .filter(|name| !name.trim().is_empty() && contains_term(text, name))
            .cloned()
            .collect();

        for name_pattern in &self.name_patterns {
            for caps in name_pattern.captures_iter(text) {
                let name = caps[1].to_string();
                let first_word = name.split_whitespace().next().unwrap_or_default();
                if !NOT_NAMES.contains(&first_word) {
                    candidates.push(name);
                }
            }
        }

        candidates
    }
}

#[async_trait]
impl Extractor for HeuristicExtractor {
    async fn extract_people(
        &self,
        text: &str,
        ctx: &ExtractionContext,
    ) -> Result<BTreeSet<String>, ExtractionFailed> {
        if text.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        let people = finalize_people(self.candidate_people(text, ctx), ctx);
        debug!("Heuristic extractor found {} people", people.len());
        Ok(people)
    }

    async fn extract_tags(
        &self,
        text: &str,
        allowed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ExtractionFailed> {
        let lower = text.to_lowercase();
        let hits = allowed
            .iter()
            .filter(|tag| !tag.trim().is_empty() && contains_term(&lower, &tag.to_lowercase()))
            .cloned();
        Ok(constrain_tags(hits, allowed, &self.uncategorized_tag))
    }

    async fn summarize(&self, text: &str) -> Result<Option<String>, ExtractionFailed> {
        let first_sentence = text
            .trim()
            .split_inclusive(is_terminal)
            .next()
            .unwrap_or_default()
            .trim();
        if first_sentence.is_empty() {
            return Ok(None);
        }

        let mut summary: String = first_sentence.chars().take(MAX_SUMMARY_CHARS).collect();
        if first_sentence.chars().count() > MAX_SUMMARY_CHARS {
            summary.push('…');
        }
        Ok(Some(summary))
    }
}
