pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod extractor;
pub mod heuristic;
pub mod llm;
pub mod llm_extractor;
pub mod materializer;
pub mod normalizer;
pub mod pipeline;
pub mod reconciliation;
pub mod resolver;
pub mod store;
pub mod transcription;

pub use api::{router, AppState};
pub use config::{LLMConfig, LLMProvider, PipelineConfig, TranscriptionConfig};
pub use database::{ContactUpdate, Database, NewContact, OwnerStats, RecordEdit};
pub use error::{
    CaptureError, DuplicateContact, EmptyName, ExtractionFailed, FailedRecord, NormalizationDegraded,
    PreservedText, ReconciliationError, TranscriptionError,
};
pub use extractor::{ExtractionContext, ExtractionStrategy, Extractor};
pub use heuristic::{HeuristicExtractor, HeuristicNormalizer};
pub use llm::{generator_from_config, TextGenerator};
pub use materializer::{RecordDraft, RecordMaterializer};
pub use normalizer::{NormalizeOutcome, NormalizedTranscript, Normalizer};
pub use pipeline::{CaptureInput, CaptureOutcome, CapturePipeline};
pub use reconciliation::{
    audit_consistency, ConsistencyReport, ReconciliationHandler, ReconciliationOutcome,
};
pub use resolver::{ContactResolver, Resolution};
pub use store::{Persistence, SqliteStore};
pub use transcription::{HttpTranscriber, Transcriber};
