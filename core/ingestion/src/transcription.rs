use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::TranscriptionConfig;
use crate::error::TranscriptionError;

/// Speech-to-text boundary. Callers retry by re-submitting the capture.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, content_type: &str)
        -> Result<String, TranscriptionError>;
}

/// Posts audio as multipart form data to `{base}/audio/transcriptions`
pub struct HttpTranscriber {
    config: TranscriptionConfig,
    client: Client,
}

impl HttpTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self, TranscriptionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranscriptionError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }
}

/// Upload file name for a declared content type
fn file_name_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "recording.wav",
        "audio/mpeg" | "audio/mp3" => "recording.mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "recording.m4a",
        "audio/ogg" => "recording.ogg",
        _ => "recording.webm",
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        content_type: &str,
    ) -> Result<String, TranscriptionError> {
        let url = format!("{}/audio/transcriptions", self.config.base_url);
        let size = audio.len();

        let file = Part::bytes(audio)
            .file_name(file_name_for(content_type))
            .mime_str(content_type)
            .map_err(|e| TranscriptionError::Transport(e.to_string()))?;

        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("response_format", "json")
            .part("file", file);

        debug!("Calling transcription at {} ({} bytes)", url, size);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Http { status, message });
        }

        #[derive(Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Transport(e.to_string()))?;

        info!("Transcribed {} bytes into {} chars", size, body.text.chars().count());
        Ok(body.text)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_for_content_type() {
        assert_eq!(file_name_for("audio/webm;codecs=opus"), "recording.webm");
        assert_eq!(file_name_for("audio/wav"), "recording.wav");
        assert_eq!(file_name_for("Audio/MPEG"), "recording.mp3");
        assert_eq!(file_name_for("audio/x-m4a"), "recording.m4a");
        assert_eq!(file_name_for(""), "recording.webm");
    }

    #[test]
    fn test_http_transcriber_builds() {
        let config = TranscriptionConfig {
            api_key: "sk-audio".into(),
            base_url: "http://localhost:9".into(),
            model: "step-asr".into(),
            timeout_secs: 5,
        };
        assert!(HttpTranscriber::new(config).is_ok());
    }
}
