use async_trait::async_trait;
use rapport_schemas::Message;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::ExtractionFailed;
use crate::extractor::{
    constrain_tags, finalize_people, free_form_tags, parse_delimited_list, ExtractionContext,
    Extractor,
};
use crate::llm::TextGenerator;

const MAX_SUMMARY_CHARS: usize = 80;

/// LLM-based people, tag and summary extraction
pub struct LLMExtractor {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
}

impl LLMExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>, config: PipelineConfig) -> Self {
        Self { generator, config }
    }

    fn people_prompt(&self, text: &str, ctx: &ExtractionContext) -> Vec<Message> {
        let owner_rule = match ctx.owner_name.as_deref() {
            Some(name) => format!("3. Never return \"I\", \"me\" or {}: that is the narrator.", name),
            None => "3. Never return \"I\" or \"me\": that is the narrator.".to_string(),
        };

        vec![
            Message::system(format!(
                r#"You help keep a personal log of social interactions.
Extract the names of every person mentioned in the account below.
Rules:
1. Return only names, separated by commas.
2. Do not return relationship words such as "friend" or "colleague".
{}
4. If no person is clearly named, return an empty reply.
5. Plain text only, no JSON."#,
                owner_rule
            )),
            Message::user(text),
        ]
    }

    fn tags_prompt(&self, text: &str, allowed: &BTreeSet<String>) -> Vec<Message> {
        let vocabulary = if allowed.is_empty() {
            "Invent 3 to 5 concise tags of one to three words each (for example: coffee, dinner, sports, study, work, family, party, travel, holiday).".to_string()
        } else {
            format!(
                "Choose only from this list, copying tags exactly: {}. If none fit, reply \"{}\".",
                allowed.iter().cloned().collect::<Vec<_>>().join(", "),
                self.config.uncategorized_tag
            )
        };

        vec![
            Message::system(format!(
                r#"You tag entries in a personal log of social interactions.
{}
Return only the tags, separated by commas. No numbers, no JSON."#,
                vocabulary
            )),
            Message::user(text),
        ]
    }

    fn summary_prompt(&self, text: &str) -> Vec<Message> {
        vec![
            Message::system(
                "Summarize the following social interaction in one short sentence (at most 50 characters). Reply with the summary only.",
            ),
            Message::user(text),
        ]
    }

    async fn call(
        &self,
        stage: &'static str,
        messages: Vec<Message>,
        temperature: f32,
    ) -> Result<String, ExtractionFailed> {
        self.generator
            .generate(&messages, temperature)
            .await
            .map_err(|e| ExtractionFailed::new(stage, e))
    }
}

#[async_trait]
impl Extractor for LLMExtractor {
    async fn extract_people(
        &self,
        text: &str,
        ctx: &ExtractionContext,
    ) -> Result<BTreeSet<String>, ExtractionFailed> {
        if text.trim().is_empty() {
            return Ok(BTreeSet::new());
        }

        let reply = self
            .call(
                "people",
                self.people_prompt(text, ctx),
                self.config.people_temperature,
            )
            .await?;

        let people = finalize_people(parse_delimited_list(&reply), ctx);
        debug!("LLM extracted {} people", people.len());
        Ok(people)
    }

    async fn extract_tags(
        &self,
        text: &str,
        allowed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ExtractionFailed> {
        let fallback = self.config.uncategorized_tag.as_str();
        if text.trim().is_empty() {
            return Ok(BTreeSet::from([fallback.to_string()]));
        }

        let reply = self
            .call(
                "tags",
                self.tags_prompt(text, allowed),
                self.config.tag_temperature,
            )
            .await?;

        let candidates = parse_delimited_list(&reply);
        let tags = if allowed.is_empty() {
            free_form_tags(candidates, fallback)
        } else {
            constrain_tags(candidates, allowed, fallback)
        };
        debug!("LLM extracted tags {:?}", tags);
        Ok(tags)
    }

    async fn summarize(&self, text: &str) -> Result<Option<String>, ExtractionFailed> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let reply = self
            .call(
                "summary",
                self.summary_prompt(text),
                self.config.tag_temperature,
            )
            .await?;

        let summary: String = reply
            .trim()
            .lines()
            .next()
            .unwrap_or_default()
            .chars()
            .take(MAX_SUMMARY_CHARS)
            .collect();

        Ok(Some(summary).filter(|s| !s.is_empty()))
    }
}
