use async_trait::async_trait;
use rapport_schemas::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::NormalizationDegraded;
use crate::extractor::strip_code_fence;
use crate::heuristic::HeuristicNormalizer;
use crate::llm::TextGenerator;

/// Cleaned transcript plus provisional people and tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizedTranscript {
    pub narrative_text: String,
    pub provisional_people: Vec<String>,
    pub provisional_tags: Vec<String>,
}

impl NormalizedTranscript {
    /// The fail-soft result: raw text untouched, no provisional lists
    pub fn passthrough(raw: &str) -> Self {
        Self {
            narrative_text: raw.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub transcript: NormalizedTranscript,
    pub degraded: Option<NormalizationDegraded>,
}

impl NormalizeOutcome {
    fn clean(transcript: NormalizedTranscript) -> Self {
        Self {
            transcript,
            degraded: None,
        }
    }

    fn degraded(raw: &str, reason: impl Into<String>) -> Self {
        let degraded = NormalizationDegraded {
            reason: reason.into(),
        };
        warn!("{}", degraded);
        Self {
            transcript: NormalizedTranscript::passthrough(raw),
            degraded: Some(degraded),
        }
    }
}

/// Turns a raw transcript into a narrative. Infallible by signature:
/// normalization problems degrade to the raw text and never block a capture.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, raw: &str) -> NormalizeOutcome;
}

/// Pick the normalizer for the available backend
pub fn normalizer_for(
    generator: Option<Arc<dyn TextGenerator>>,
    config: &PipelineConfig,
) -> Arc<dyn Normalizer> {
    match generator {
        Some(generator) => Arc::new(LLMNormalizer::new(
            generator,
            config.normalization_temperature,
        )),
        None => Arc::new(HeuristicNormalizer::new()),
    }
}

/// Expected reply shape. Unknown keys are rejected so that a reply in the
/// wrong shape falls back instead of being half-trusted.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct NormalizationReply {
    narrative_text: String,
    #[serde(default)]
    people: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// LLM-based transcript cleanup
pub struct LLMNormalizer {
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
}

impl LLMNormalizer {
    pub fn new(generator: Arc<dyn TextGenerator>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    fn build_prompt(raw: &str) -> Vec<Message> {
        vec![
            Message::system(
                r#"You tidy up transcripts of a person describing a social interaction.

1. Remove filler words and verbal tics (um, uh, like, you know, 嗯, 啊, 那个, 就是).
2. Merge fragments into a coherent narrative and drop repetition. Do not add anything the speaker did not say.
3. When it is unambiguous who said a line, prefix that line with "Name: ".
4. List every person mentioned, excluding the narrator ("I").
5. Suggest 3 to 5 short event tags.

Reply with JSON only:
{"narrativeText": "...", "people": ["..."], "tags": ["..."]}"#,
            ),
            Message::user(format!("Raw transcript: {}", raw)),
        ]
    }

    fn parse_reply(reply: &str) -> Result<NormalizedTranscript, String> {
        let parsed: NormalizationReply =
            serde_json::from_str(strip_code_fence(reply)).map_err(|e| e.to_string())?;

        let narrative_text = parsed.narrative_text.trim().to_string();
        if narrative_text.is_empty() {
            return Err("reply carried an empty narrative".to_string());
        }

        Ok(NormalizedTranscript {
            narrative_text,
            provisional_people: clean_list(parsed.people),
            provisional_tags: clean_list(parsed.tags),
        })
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !cleaned.contains(&item) {
            cleaned.push(item);
        }
    }
    cleaned
}

#[async_trait]
impl Normalizer for LLMNormalizer {
    async fn normalize(&self, raw: &str) -> NormalizeOutcome {
        if raw.trim().is_empty() {
            return NormalizeOutcome::clean(NormalizedTranscript::default());
        }

        let reply = match self
            .generator
            .generate(&Self::build_prompt(raw), self.temperature)
            .await
        {
            Ok(reply) => reply,
            Err(e) => return NormalizeOutcome::degraded(raw, format!("backend error: {}", e)),
        };

        match Self::parse_reply(&reply) {
            Ok(transcript) => {
                debug!(
                    "Normalized {} chars into {} chars",
                    raw.chars().count(),
                    transcript.narrative_text.chars().count()
                );
                NormalizeOutcome::clean(transcript)
            }
            Err(reason) => NormalizeOutcome::degraded(raw, format!("malformed reply: {}", reason)),
        }
    }
}
