use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::ExtractionFailed;
use crate::heuristic::HeuristicExtractor;
use crate::llm::TextGenerator;
use crate::llm_extractor::LLMExtractor;

/// Words that refer to the capturing user and are never extracted as people
const SELF_REFERENCES: &[&str] = &[
    "我", "我自己", "本人", "自己", "i", "me", "myself", "the user", "user", "narrator",
];

/// Relationship words a model sometimes returns instead of a name
const GENERIC_RELATIONS: &[&str] = &[
    "朋友", "同事", "同学", "家人", "friend", "friends", "colleague", "colleagues", "someone",
    "everyone", "family",
];

/// Model replies that mean "nothing found"
const EMPTY_MARKERS: &[&str] = &["none", "n/a", "null", "无", "没有", "空"];

const MAX_FREE_FORM_TAGS: usize = 5;

/// Who is capturing and whom they already know
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub owner_name: Option<String>,
    pub known_people: Vec<String>,
}

/// Extraction strategy for people and tags
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractionStrategy {
    /// Local patterns against the owner's contacts and vocabulary
    Heuristic,
    /// Text-generation backend
    Llm,
}

/// People and tag extraction from narrative text.
///
/// Both operations are pure functions of their inputs apart from model
/// nondeterminism. Failures surface as [`ExtractionFailed`].
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Names mentioned in `text`, never including the capturing user
    async fn extract_people(
        &self,
        text: &str,
        ctx: &ExtractionContext,
    ) -> Result<BTreeSet<String>, ExtractionFailed>;

    /// Event tags; a subset of `allowed` (or `uncategorized`) when `allowed`
    /// is non-empty, short free-form tags otherwise
    async fn extract_tags(
        &self,
        text: &str,
        allowed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ExtractionFailed>;

    /// One-line summary, if the backend produces one
    async fn summarize(&self, text: &str) -> Result<Option<String>, ExtractionFailed>;
}

/// Pick the extractor for the available backend
pub fn extractor_for(
    generator: Option<Arc<dyn TextGenerator>>,
    config: &PipelineConfig,
) -> (ExtractionStrategy, Arc<dyn Extractor>) {
    let (strategy, extractor): (ExtractionStrategy, Arc<dyn Extractor>) = match generator {
        Some(generator) => (
            ExtractionStrategy::Llm,
            Arc::new(LLMExtractor::new(generator, config.clone())),
        ),
        None => (
            ExtractionStrategy::Heuristic,
            Arc::new(HeuristicExtractor::new(config.uncategorized_tag.clone())),
        ),
    };
    info!("Entity extraction strategy: {:?}", strategy);
    (strategy, extractor)
}

/// Split a delimited model reply into items. Accepts a JSON string array too.
pub fn parse_delimited_list(reply: &str) -> Vec<String> {
    let cleaned = strip_code_fence(reply);

    if cleaned.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(cleaned) {
            return items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && !is_empty_marker(s))
                .collect();
        }
    }

    cleaned
        .split(|c| matches!(c, ',' | '，' | '、' | ';' | '；' | '\n'))
        .map(clean_item)
        .filter(|s| !s.is_empty() && !is_empty_marker(s))
        .collect()
}

/// Drop a surrounding ``` fence, which models add despite instructions
pub(crate) fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn clean_item(raw: &str) -> String {
    let item = raw.trim();
    let item = item.trim_start_matches(|c: char| matches!(c, '-' | '*' | '•'));
    let item = strip_numbering(item.trim());
    item.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '"' | '\'' | '“' | '”' | '[' | ']' | '.' | '。')
    })
    .to_string()
}

fn strip_numbering(item: &str) -> &str {
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return item;
    }
    let mut rest = item[digits..].chars();
    match rest.next() {
        Some('.' | ')') => rest.as_str().trim(),
        _ => item,
    }
}

fn is_empty_marker(item: &str) -> bool {
    EMPTY_MARKERS.contains(&item.to_lowercase().as_str())
}

/// True when `name` denotes the capturing user or is a bare relationship word
pub fn is_self_reference(name: &str, ctx: &ExtractionContext) -> bool {
    let lower = name.trim().to_lowercase();
    if SELF_REFERENCES.contains(&lower.as_str()) || GENERIC_RELATIONS.contains(&lower.as_str()) {
        return true;
    }
    ctx.owner_name
        .as_deref()
        .map(|owner| owner.trim() == name.trim())
        .unwrap_or(false)
}

/// Deduplicate candidate names and drop self references
pub fn finalize_people<I>(candidates: I, ctx: &ExtractionContext) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    candidates
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && !is_self_reference(name, ctx))
        .collect()
}

/// Map candidates onto the allowed vocabulary (case-insensitive, canonical
/// spelling kept); `fallback` alone when nothing matches
pub fn constrain_tags<I>(candidates: I, allowed: &BTreeSet<String>, fallback: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    let mut tags = BTreeSet::new();
    for candidate in candidates {
        let wanted = candidate.trim().to_lowercase();
        if let Some(canonical) = allowed.iter().find(|a| a.to_lowercase() == wanted) {
            tags.insert(canonical.clone());
        }
    }
    if tags.is_empty() {
        tags.insert(fallback.to_string());
    }
    tags
}

/// Free-form tags of one to three words; `fallback` alone when none survive
pub fn free_form_tags<I>(candidates: I, fallback: &str) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
{
    let mut tags = BTreeSet::new();
    for candidate in candidates {
        let tag = candidate.trim().to_string();
        let words = tag.split_whitespace().count();
        let numeric = tag.chars().all(|c| c.is_ascii_digit() || c.is_whitespace());
        if (1..=3).contains(&words) && !numeric {
            tags.insert(tag);
        }
        if tags.len() == MAX_FREE_FORM_TAGS {
            break;
        }
    }
    if tags.is_empty() {
        tags.insert(fallback.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_schemas::UNCATEGORIZED_TAG;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_delimited_list() {
        assert_eq!(parse_delimited_list("小明，小红、Ana"), vec!["小明", "小红", "Ana"]);
        assert_eq!(parse_delimited_list("- Ana\n- Bo\n"), vec!["Ana", "Bo"]);
        assert_eq!(parse_delimited_list("1. coffee\n2) hiking"), vec!["coffee", "hiking"]);
        assert_eq!(parse_delimited_list("[\"Ana\", \"Bo\"]"), vec!["Ana", "Bo"]);
        assert_eq!(parse_delimited_list("```\nAna, Bo\n```"), vec!["Ana", "Bo"]);
        assert!(parse_delimited_list("").is_empty());
        assert!(parse_delimited_list("None").is_empty());
        assert!(parse_delimited_list("无").is_empty());
    }

    #[test]
    fn test_self_references_removed() {
        let ctx = ExtractionContext {
            owner_name: Some("Lin".into()),
            known_people: vec![],
        };
        let people = finalize_people(
            vec!["我".into(), "Ana".into(), "Lin".into(), " Ana ".into(), "friend".into()],
            &ctx,
        );
        assert_eq!(people, set(&["Ana"]));
    }

    #[test]
    fn test_constrain_tags_subset_of_allowed() {
        let allowed = set(&["Coffee", "Hiking", "Work"]);
        let tags = constrain_tags(
            vec!["coffee".into(), "party".into(), "WORK".into()],
            &allowed,
            UNCATEGORIZED_TAG,
        );
        assert_eq!(tags, set(&["Coffee", "Work"]));

        let none = constrain_tags(vec!["party".into()], &allowed, UNCATEGORIZED_TAG);
        assert_eq!(none, set(&[UNCATEGORIZED_TAG]));
    }

    #[test]
    fn test_constrain_tags_property() {
        let allowed = set(&["咖啡", "饭局", "运动"]);
        let candidates = [
            vec![],
            vec!["咖啡".to_string()],
            vec!["旅行".to_string(), "运动".to_string()],
            vec!["".to_string(), " 饭局 ".to_string(), "x".to_string()],
        ];
        for batch in candidates {
            let tags = constrain_tags(batch, &allowed, UNCATEGORIZED_TAG);
            assert!(!tags.is_empty());
            assert!(tags
                .iter()
                .all(|t| allowed.contains(t) || t == UNCATEGORIZED_TAG));
        }
    }

    #[test]
    fn test_free_form_tags() {
        let tags = free_form_tags(
            vec![
                "coffee".into(),
                "weekend hiking plan".into(),
                "a very long tag phrase".into(),
                "2024".into(),
            ],
            UNCATEGORIZED_TAG,
        );
        assert_eq!(tags, set(&["coffee", "weekend hiking plan"]));
        assert_eq!(
            free_form_tags(Vec::<String>::new(), UNCATEGORIZED_TAG),
            set(&[UNCATEGORIZED_TAG])
        );
    }
}
