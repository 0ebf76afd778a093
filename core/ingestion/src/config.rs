use anyhow::{Context, Result};
use rapport_schemas::{NEW_CONTACT_TAG, UNCATEGORIZED_TAG};
use tracing::warn;

/// Configuration for the text-generation backend
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LLMProvider {
    /// Any `/chat/completions` endpoint (StepFun, OpenAI, ...)
    OpenAICompatible,
    Ollama,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAICompatible,
            api_key: None,
            base_url: "https://api.stepfun.com/v1".to_string(),
            model: "step-1-8k".to_string(),
            timeout_secs: 30,
        }
    }
}

impl LLMConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("LLM_PROVIDER")
            .unwrap_or_else(|| "openai".to_string())
            .to_lowercase()
            .as_str()
        {
            "ollama" => LLMProvider::Ollama,
            _ => LLMProvider::OpenAICompatible,
        };

        let (base_url, model) = match provider {
            LLMProvider::Ollama => (
                lookup("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
                lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.2:3b".to_string()),
            ),
            LLMProvider::OpenAICompatible => (
                lookup("AI_BASE_URL").unwrap_or_else(|| "https://api.stepfun.com/v1".to_string()),
                lookup("AI_MODEL").unwrap_or_else(|| "step-1-8k".to_string()),
            ),
        };

        let api_key = if provider == LLMProvider::OpenAICompatible {
            Some(lookup("AI_API_KEY").context("AI_API_KEY required for the chat provider")?)
        } else {
            None
        };

        let timeout_secs = parse_secs(lookup("AI_TIMEOUT_SECS"), 30)?;

        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout_secs,
        })
    }

    /// Returns None when no backend is configured; the pipeline then runs
    /// with heuristic normalization and extraction
    pub fn from_env_optional() -> Option<Self> {
        match Self::from_env() {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Text generation disabled: {}", e);
                None
            }
        }
    }
}

/// Configuration for the speech-to-text service
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl TranscriptionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("WHISPER_API_KEY").context("WHISPER_API_KEY not set")?;
        let base_url = lookup("WHISPER_BASE_URL")
            .unwrap_or_else(|| "https://api.stepfun.com/v1".to_string());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: lookup("WHISPER_MODEL").unwrap_or_else(|| "step-asr".to_string()),
            timeout_secs: parse_secs(lookup("WHISPER_TIMEOUT_SECS"), 60)?,
        })
    }
}

/// Behavior switches for the capture pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run the text normalizer before extraction
    pub normalize: bool,
    /// Generate a one-line summary for each capture
    pub summarize: bool,
    /// Tags given to contacts created by reconciliation
    pub new_contact_tags: Vec<String>,
    pub uncategorized_tag: String,
    pub normalization_temperature: f32,
    pub people_temperature: f32,
    pub tag_temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            summarize: true,
            new_contact_tags: vec![NEW_CONTACT_TAG.to_string()],
            uncategorized_tag: UNCATEGORIZED_TAG.to_string(),
            normalization_temperature: 0.3,
            people_temperature: 0.3,
            tag_temperature: 0.5,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            normalize: parse_flag(lookup("NORMALIZE_TRANSCRIPTS"), defaults.normalize),
            summarize: parse_flag(lookup("GENERATE_SUMMARY"), defaults.summarize),
            ..defaults
        }
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.map(|v| v.to_lowercase()) {
        Some(v) if v == "true" || v == "1" => true,
        Some(v) if v == "false" || v == "0" => false,
        _ => default,
    }
}

fn parse_secs(raw: Option<String>, default: u64) -> Result<u64> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid timeout: {}", v)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_from_lookup_ollama() {
        let config = LLMConfig::from_lookup(lookup(&[
            ("LLM_PROVIDER", "ollama"),
            ("OLLAMA_URL", "http://localhost:11434/"),
            ("OLLAMA_MODEL", "qwen2.5:7b"),
        ]))
        .unwrap();
        assert_eq!(config.provider, LLMProvider::Ollama);
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "qwen2.5:7b");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_chat_provider_requires_key() {
        assert!(LLMConfig::from_lookup(lookup(&[])).is_err());

        let config = LLMConfig::from_lookup(lookup(&[("AI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.provider, LLMProvider::OpenAICompatible);
        assert_eq!(config.base_url, "https://api.stepfun.com/v1");
        assert_eq!(config.model, "step-1-8k");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_transcription_config() {
        let config = TranscriptionConfig::from_lookup(lookup(&[
            ("WHISPER_API_KEY", "sk-audio"),
            ("WHISPER_TIMEOUT_SECS", "90"),
        ]))
        .unwrap();
        assert_eq!(config.model, "step-asr");
        assert_eq!(config.timeout_secs, 90);

        assert!(TranscriptionConfig::from_lookup(lookup(&[
            ("WHISPER_API_KEY", "sk-audio"),
            ("WHISPER_TIMEOUT_SECS", "soon"),
        ]))
        .is_err());
    }

    #[test]
    fn test_pipeline_flags() {
        let config = PipelineConfig::from_lookup(lookup(&[("NORMALIZE_TRANSCRIPTS", "false")]));
        assert!(!config.normalize);
        assert!(config.summarize);
        assert_eq!(config.new_contact_tags, vec![NEW_CONTACT_TAG.to_string()]);
    }
}
