use rapport_schemas::{InteractionRecord, OwnerId, TagKind};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{CaptureError, NormalizationDegraded, PreservedText, TranscriptionError};
use crate::extractor::{extractor_for, ExtractionContext, ExtractionStrategy, Extractor};
use crate::llm::TextGenerator;
use crate::materializer::{RecordDraft, RecordMaterializer};
use crate::normalizer::{normalizer_for, NormalizedTranscript, Normalizer};
use crate::resolver::ContactResolver;
use crate::store::Persistence;
use crate::transcription::Transcriber;

/// One raw user input
#[derive(Debug, Clone)]
pub enum CaptureInput {
    Text(String),
    Audio { bytes: Vec<u8>, content_type: String },
}

impl CaptureInput {
    /// Reject empty or unusable input before any stage runs
    fn validate(&self) -> Result<(), CaptureError> {
        match self {
            CaptureInput::Text(text) if text.trim().is_empty() => {
                Err(CaptureError::CaptureInput("text is empty".to_string()))
            }
            CaptureInput::Audio { bytes, .. } if bytes.is_empty() => {
                Err(CaptureError::CaptureInput("audio is empty".to_string()))
            }
            CaptureInput::Audio { content_type, .. } if !is_audio_type(content_type) => {
                Err(CaptureError::CaptureInput(format!(
                    "unsupported content type: {}",
                    content_type
                )))
            }
            _ => Ok(()),
        }
    }
}

fn is_audio_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    mime.starts_with("audio/") || mime == "application/octet-stream"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureStage {
    Received,
    Transcribing,
    Normalizing,
    Extracting,
    Resolving,
    Persisting,
    Done,
}

/// State of one capture in flight. Each capture owns its session; nothing
/// is shared between concurrent captures.
#[derive(Debug)]
pub(crate) struct CaptureSession {
    owner_id: OwnerId,
    owner_name: Option<String>,
    stage: CaptureStage,
    raw_text: String,
    narrative_text: Option<String>,
}

impl CaptureSession {
    fn new(owner_id: OwnerId, owner_name: Option<String>) -> Self {
        Self {
            owner_id,
            owner_name,
            stage: CaptureStage::Received,
            raw_text: String::new(),
            narrative_text: None,
        }
    }

    fn enter(&mut self, stage: CaptureStage) {
        debug!("Capture for {}: {:?} -> {:?}", self.owner_id, self.stage, stage);
        self.stage = stage;
    }

    /// Everything the user has given us so far
    fn preserved(&self) -> PreservedText {
        PreservedText {
            raw_text: self.raw_text.clone(),
            narrative_text: self.narrative_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub records: Vec<InteractionRecord>,
    pub raw_text: String,
    pub narrative_text: String,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
    /// Extracted people in order of first appearance
    pub people: Vec<String>,
    /// Names with no contact yet, offered to the user for reconciliation
    pub unarchived_people: BTreeSet<String>,
    pub normalization: Option<NormalizationDegraded>,
}

/// Drives one capture from raw input to persisted records:
/// transcribe, normalize, extract, resolve, materialize.
pub struct CapturePipeline {
    transcriber: Option<Arc<dyn Transcriber>>,
    normalizer: Arc<dyn Normalizer>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn Persistence>,
    config: PipelineConfig,
}

impl CapturePipeline {
    pub fn new(
        store: Arc<dyn Persistence>,
        normalizer: Arc<dyn Normalizer>,
        extractor: Arc<dyn Extractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            transcriber: None,
            normalizer,
            extractor,
            store,
            config,
        }
    }

    /// Wire normalizer and extractor for the available text-generation
    /// backend, falling back to the heuristic pair without one
    pub fn from_config(
        store: Arc<dyn Persistence>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: PipelineConfig,
    ) -> (ExtractionStrategy, Self) {
        let normalizer = normalizer_for(generator.clone(), &config);
        let (strategy, extractor) = extractor_for(generator, &config);
        (strategy, Self::new(store, normalizer, extractor, config))
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub async fn capture(
        &self,
        owner_id: &OwnerId,
        owner_name: Option<String>,
        input: CaptureInput,
    ) -> Result<CaptureOutcome, CaptureError> {
        input.validate()?;
        let mut session = CaptureSession::new(owner_id.clone(), owner_name);

        let result = self.run(&mut session, input).await;
        if let Err(ref e) = result {
            warn!(
                "Capture for {} failed at {:?}: {}",
                owner_id, session.stage, e
            );
        }
        result
    }

    async fn run(
        &self,
        session: &mut CaptureSession,
        input: CaptureInput,
    ) -> Result<CaptureOutcome, CaptureError> {
        let owner_id = session.owner_id.clone();
        session.raw_text = match input {
            CaptureInput::Text(text) => text,
            CaptureInput::Audio {
                bytes,
                content_type,
            } => {
                session.enter(CaptureStage::Transcribing);
                self.transcribe(bytes, &content_type).await?
            }
        };
        info!(
            "Capture accepted for {} ({} chars)",
            owner_id,
            session.raw_text.chars().count()
        );

        session.enter(CaptureStage::Normalizing);
        let (transcript, normalization) = self.normalize(&session.raw_text).await;
        session.narrative_text = Some(transcript.narrative_text.clone());

        session.enter(CaptureStage::Extracting);
        let (people, tags, summary) = self.extract(session, &transcript).await?;

        session.enter(CaptureStage::Resolving);
        let resolution = ContactResolver::new(self.store.clone())
            .resolve(&owner_id, &people)
            .await
            .map_err(|source| CaptureError::Storage {
                source,
                preserved: session.preserved(),
            })?;

        session.enter(CaptureStage::Persisting);
        let draft = RecordDraft {
            owner_id,
            raw_text: session.raw_text.clone(),
            narrative_text: transcript.narrative_text.clone(),
            summary: summary.clone(),
            tags: tags.clone(),
            people: people.clone(),
        };
        let records = RecordMaterializer::new(self.store.clone())
            .materialize(&draft, &resolution)
            .await?;

        session.enter(CaptureStage::Done);
        Ok(CaptureOutcome {
            records,
            raw_text: draft.raw_text,
            narrative_text: transcript.narrative_text,
            summary,
            tags,
            people,
            unarchived_people: resolution.unmatched,
            normalization,
        })
    }

    async fn transcribe(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, CaptureError> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or(TranscriptionError::NotConfigured)?;

        let text = transcriber.transcribe(bytes, content_type).await?;
        if text.trim().is_empty() {
            return Err(CaptureError::CaptureInput(
                "no speech recognized in audio".to_string(),
            ));
        }
        Ok(text)
    }

    async fn normalize(&self, raw: &str) -> (NormalizedTranscript, Option<NormalizationDegraded>) {
        if !self.config.normalize {
            return (NormalizedTranscript::passthrough(raw), None);
        }

        let outcome = self.normalizer.normalize(raw).await;
        let mut transcript = outcome.transcript;
        if transcript.narrative_text.trim().is_empty() {
            transcript.narrative_text = raw.to_string();
        }
        debug!(
            "Provisional people {:?}, tags {:?}",
            transcript.provisional_people, transcript.provisional_tags
        );
        (transcript, outcome.degraded)
    }

    /// People and tags run concurrently; either failing aborts the capture.
    /// The summary is optional and its failure only logged.
    async fn extract(
        &self,
        session: &CaptureSession,
        transcript: &NormalizedTranscript,
    ) -> Result<(Vec<String>, BTreeSet<String>, Option<String>), CaptureError> {
        let owner_id = &session.owner_id;
        let (contacts, allowed) = tokio::try_join!(
            self.store.list_contacts(owner_id),
            self.store.tag_names(owner_id, TagKind::Event),
        )
        .map_err(|source| CaptureError::Storage {
            source,
            preserved: session.preserved(),
        })?;

        let ctx = ExtractionContext {
            owner_name: session.owner_name.clone(),
            known_people: contacts.into_iter().map(|c| c.name).collect(),
        };
        let text = transcript.narrative_text.as_str();

        let (people, tags) = tokio::try_join!(
            self.extractor.extract_people(text, &ctx),
            self.extractor.extract_tags(text, &allowed),
        )
        .map_err(|source| CaptureError::ExtractionFailed {
            source,
            preserved: session.preserved(),
        })?;

        let summary = if self.config.summarize {
            match self.extractor.summarize(text).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Summary skipped: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let people = order_by_appearance(people, text);
        info!("Extracted {} people and tags {:?}", people.len(), tags);
        Ok((people, tags, summary))
    }
}

/// Sort names by where they first occur in `text`; names not found verbatim
/// keep their relative order at the end
fn order_by_appearance(people: BTreeSet<String>, text: &str) -> Vec<String> {
    let mut people: Vec<String> = people.into_iter().collect();
    people.sort_by_key(|name| text.find(name.as_str()).unwrap_or(usize::MAX));
    people
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewContact;
    use crate::heuristic::{HeuristicExtractor, HeuristicNormalizer};
    use crate::llm::testing::ScriptedGenerator;
    use crate::store::testing::temp_store;
    use crate::store::SqliteStore;
    use crate::transcription::testing::FixedTranscriber;
    use rapport_schemas::{LinkageState, UNCATEGORIZED_TAG};

    fn owner() -> OwnerId {
        OwnerId("owner-1".into())
    }

    fn heuristic_pipeline(store: &SqliteStore) -> CapturePipeline {
        CapturePipeline::new(
            Arc::new(store.clone()),
            Arc::new(HeuristicNormalizer::new()),
            Arc::new(HeuristicExtractor::new(UNCATEGORIZED_TAG.to_string())),
            PipelineConfig::default(),
        )
    }

    fn llm_pipeline(store: &SqliteStore, replies: Vec<Result<&str, &str>>) -> CapturePipeline {
        let generator: Arc<dyn TextGenerator> = Arc::new(ScriptedGenerator::new(replies));
        let config = PipelineConfig {
            summarize: false,
            ..PipelineConfig::default()
        };
        CapturePipeline::from_config(Arc::new(store.clone()), Some(generator), config).1
    }

    #[tokio::test]
    async fn test_capture_fans_out_with_mixed_linkage() {
        let (_dir, store) = temp_store();
        let ana = {
            let db = store.database();
            let db = db.lock().await;
            db.create_contact(&owner(), &NewContact { name: "Ana".into(), ..Default::default() })
                .unwrap()
                .id
        };

        let outcome = heuristic_pipeline(&store)
            .capture(&owner(), None, CaptureInput::Text("Um, lunch with Ana and Bo.".into()))
            .await
            .unwrap();

        assert_eq!(outcome.people, vec!["Ana", "Bo"]);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(
            outcome.records[0].linkage_state().unwrap(),
            LinkageState::Linked(ana)
        );
        assert_eq!(
            outcome.records[1].linkage_state().unwrap(),
            LinkageState::Unarchived(BTreeSet::from(["Bo".to_string()]))
        );
        assert_eq!(outcome.unarchived_people, BTreeSet::from(["Bo".to_string()]));
        assert_eq!(outcome.raw_text, "Um, lunch with Ana and Bo.");
        assert!(!outcome.narrative_text.contains("Um"));
    }

    #[tokio::test]
    async fn test_capture_without_people() {
        let (_dir, store) = temp_store();
        let outcome = heuristic_pipeline(&store)
            .capture(&owner(), None, CaptureInput::Text("Quiet evening reading.".into()))
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(
            outcome.records[0].linkage_state().unwrap(),
            LinkageState::Unmentioned
        );
        assert_eq!(outcome.tags, BTreeSet::from([UNCATEGORIZED_TAG.to_string()]));
    }

    #[tokio::test]
    async fn test_empty_input_rejected_before_any_stage() {
        let (_dir, store) = temp_store();
        let pipeline = heuristic_pipeline(&store);

        let err = pipeline
            .capture(&owner(), None, CaptureInput::Text("  \n".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::CaptureInput(_)));

        let err = pipeline
            .capture(
                &owner(),
                None,
                CaptureInput::Audio {
                    bytes: vec![1, 2, 3],
                    content_type: "text/plain".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::CaptureInput(_)));

        assert!(store.list_records(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_capture_and_transcription_failure() {
        let (_dir, store) = temp_store();
        let audio = || CaptureInput::Audio {
            bytes: vec![0u8; 32],
            content_type: "audio/webm;codecs=opus".into(),
        };

        let err = heuristic_pipeline(&store)
            .capture(&owner(), None, audio())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::TranscriptionFailed(TranscriptionError::NotConfigured)
        ));

        let failing = heuristic_pipeline(&store)
            .with_transcriber(Arc::new(FixedTranscriber(Err((503, "busy".into())))));
        let err = failing.capture(&owner(), None, audio()).await.unwrap_err();
        assert_eq!(err.to_string(), "transcription failed: HTTP 503: busy");

        let working = heuristic_pipeline(&store)
            .with_transcriber(Arc::new(FixedTranscriber(Ok("Coffee with Ana.".into()))));
        let outcome = working.capture(&owner(), None, audio()).await.unwrap();
        assert_eq!(outcome.raw_text, "Coffee with Ana.");
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_normalization_continues_with_raw_text() {
        let (_dir, store) = temp_store();
        let pipeline = llm_pipeline(&store, vec![Ok("not json"), Ok("Ana"), Ok("coffee")]);

        let outcome = pipeline
            .capture(&owner(), None, CaptureInput::Text("uh coffee with Ana".into()))
            .await
            .unwrap();

        assert!(outcome.normalization.is_some());
        assert_eq!(outcome.narrative_text, "uh coffee with Ana");
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].narrative_text, "uh coffee with Ana");
    }

    #[tokio::test]
    async fn test_extraction_failure_preserves_text() {
        let (_dir, store) = temp_store();
        let pipeline = llm_pipeline(
            &store,
            vec![
                Ok(r#"{"narrativeText": "Coffee with Ana."}"#),
                Err("upstream timeout"),
                Err("upstream timeout"),
            ],
        );

        let err = pipeline
            .capture(&owner(), None, CaptureInput::Text("um coffee with Ana".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, CaptureError::ExtractionFailed { .. }));
        let preserved = err.preserved().unwrap();
        assert_eq!(preserved.raw_text, "um coffee with Ana");
        assert_eq!(preserved.narrative_text.as_deref(), Some("Coffee with Ana."));
        assert!(store.list_records(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_stops_at_failing_stage() {
        let (_dir, store) = temp_store();
        let pipeline = llm_pipeline(
            &store,
            vec![Ok("not json"), Err("upstream timeout"), Err("upstream timeout")],
        );

        let mut session = CaptureSession::new(owner(), None);
        let err = pipeline
            .run(&mut session, CaptureInput::Text("tea with Bo".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ExtractionFailed { .. }));
        assert_eq!(session.stage, CaptureStage::Extracting);

        let pipeline = heuristic_pipeline(&store);
        let mut session = CaptureSession::new(owner(), None);
        pipeline
            .run(&mut session, CaptureInput::Text("tea with Bo".into()))
            .await
            .unwrap();
        assert_eq!(session.stage, CaptureStage::Done);
    }

    #[test]
    fn test_order_by_appearance() {
        let people: BTreeSet<String> = ["Bo", "Ana", "Zed"].iter().map(|s| s.to_string()).collect();
        assert_eq!(
            order_by_appearance(people, "Ana called, then Bo joined"),
            vec!["Ana", "Bo", "Zed"]
        );
    }
}
