use rapport_schemas::{ContactId, InteractionRecord, RecordId};
use serde::Serialize;
use thiserror::Error;

/// User input handed back when a capture aborts, so nothing typed or
/// transcribed is lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreservedText {
    pub raw_text: String,
    pub narrative_text: Option<String>,
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transcription failed: HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transcription failed: {0}")]
    Transport(String),

    #[error("transcription failed: service not configured")]
    NotConfigured,
}

impl TranscriptionError {
    /// HTTP-style status for the caller to render
    pub fn status(&self) -> Option<u16> {
        match self {
            TranscriptionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Soft failure: the capture continues with the raw text
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("normalization degraded, continuing with raw text: {reason}")]
pub struct NormalizationDegraded {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("extraction failed while extracting {stage}: {message}")]
pub struct ExtractionFailed {
    pub stage: &'static str,
    pub message: String,
}

impl ExtractionFailed {
    pub fn new(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// One sibling record of a fan-out that could not be written
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub person: Option<String>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture input: {0}")]
    CaptureInput(String),

    #[error(transparent)]
    TranscriptionFailed(#[from] TranscriptionError),

    #[error("{source}")]
    ExtractionFailed {
        source: ExtractionFailed,
        preserved: PreservedText,
    },

    #[error("saved {} of {attempted} records", saved.len())]
    PersistencePartialFailure {
        saved: Vec<InteractionRecord>,
        attempted: usize,
        failures: Vec<FailedRecord>,
        preserved: PreservedText,
    },

    #[error("storage error: {source}")]
    Storage {
        source: anyhow::Error,
        preserved: PreservedText,
    },
}

impl CaptureError {
    /// Captured text the caller should keep showing to the user
    pub fn preserved(&self) -> Option<&PreservedText> {
        match self {
            CaptureError::ExtractionFailed { preserved, .. }
            | CaptureError::PersistencePartialFailure { preserved, .. }
            | CaptureError::Storage { preserved, .. } => Some(preserved),
            CaptureError::CaptureInput(_) | CaptureError::TranscriptionFailed(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    #[error("record {record_id} does not mention {person}")]
    PersonNotMentioned { record_id: RecordId, person: String },

    #[error("contact {contact_id} exists but record {record_id} is still unlinked: {message}")]
    ReconciliationInconsistency {
        contact_id: ContactId,
        record_id: RecordId,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Raised by the store when a contact name is already taken for the owner
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a contact named {name} already exists")]
pub struct DuplicateContact {
    pub name: String,
}

/// Raised by the store when a contact or tag name is blank
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} name must not be empty")]
pub struct EmptyName {
    pub kind: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message() {
        let err = CaptureError::PersistencePartialFailure {
            saved: Vec::new(),
            attempted: 3,
            failures: vec![FailedRecord {
                person: Some("Bo".into()),
                message: "disk full".into(),
            }],
            preserved: PreservedText::default(),
        };
        assert_eq!(err.to_string(), "saved 0 of 3 records");
        assert!(err.preserved().is_some());
    }

    #[test]
    fn test_transcription_status() {
        let err = TranscriptionError::Http {
            status: 429,
            message: "rate limited".into(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            err.to_string(),
            "transcription failed: HTTP 429: rate limited"
        );
        assert_eq!(TranscriptionError::NotConfigured.status(), None);
    }
}
