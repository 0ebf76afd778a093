use anyhow::Result;
use async_trait::async_trait;
use rapport_ingestion::{
    audit_consistency, CaptureError, CaptureInput, CapturePipeline, Database, HeuristicExtractor,
    HeuristicNormalizer, NewContact, Persistence, PipelineConfig, ReconciliationHandler,
    SqliteStore, TextGenerator,
};
use rapport_schemas::{
    LinkageState, Message, MessageRole, OwnerId, TagKind, NEW_CONTACT_TAG, UNCATEGORIZED_TAG,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

struct Harness {
    _dir: TempDir,
    db: Arc<Mutex<Database>>,
    store: Arc<dyn Persistence>,
}

fn setup() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("test.db")).unwrap();
    let db = Arc::new(Mutex::new(db));
    let store: Arc<dyn Persistence> = Arc::new(SqliteStore::new(db.clone()));
    Harness { _dir: dir, db, store }
}

fn owner() -> OwnerId {
    OwnerId("owner-1".to_string())
}

fn heuristic_pipeline(store: Arc<dyn Persistence>) -> CapturePipeline {
    CapturePipeline::new(
        store,
        Arc::new(HeuristicNormalizer::new()),
        Arc::new(HeuristicExtractor::new(UNCATEGORIZED_TAG.to_string())),
        PipelineConfig::default(),
    )
}

/// Replies per stage, keyed on the system prompt
struct StageGenerator {
    normalize: &'static str,
    people: &'static str,
    tags: &'static str,
}

#[async_trait]
impl TextGenerator for StageGenerator {
    async fn generate(&self, messages: &[Message], _temperature: f32) -> Result<String> {
        let system = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let reply = if system.contains("Reply with JSON only") {
            self.normalize
        } else if system.contains("Extract the names") {
            self.people
        } else if system.contains("You tag entries") {
            self.tags
        } else {
            anyhow::bail!("unexpected prompt: {}", system);
        };
        Ok(reply.to_string())
    }
}

/// Lunch with Ana and Bo where only Ana is a contact, then Bo reconciled
#[tokio::test]
async fn test_capture_then_reconcile_unarchived_person() {
    let h = setup();
    let ana = h
        .db
        .lock()
        .await
        .create_contact(&owner(), &NewContact { name: "Ana".into(), ..Default::default() })
        .unwrap();

    let pipeline = heuristic_pipeline(h.store.clone());
    let outcome = pipeline
        .capture(&owner(), None, CaptureInput::Text("Lunch with Ana and Bo".into()))
        .await
        .unwrap();

    // Two records sharing narrative and tags
    assert_eq!(outcome.records.len(), 2, "One record per mentioned person");
    let (ana_record, bo_record) = (&outcome.records[0], &outcome.records[1]);
    assert_eq!(ana_record.narrative_text, bo_record.narrative_text);
    assert_eq!(ana_record.tags, bo_record.tags);

    assert_eq!(ana_record.linked_contact_id, Some(ana.id.clone()));
    assert!(ana_record.unarchived_people.is_empty());
    assert_eq!(bo_record.linked_contact_id, None);
    assert_eq!(bo_record.unarchived_people, BTreeSet::from(["Bo".to_string()]));

    let ana_now = h.db.lock().await.get_contact(&owner(), &ana.id).unwrap().unwrap();
    assert_eq!(
        ana_now.last_interaction_at.as_deref(),
        Some(ana_record.created_at.as_str()),
        "Linked record should advance the contact's last interaction"
    );

    // Reconcile Bo
    let reconciler = ReconciliationHandler::new(h.store.clone(), [NEW_CONTACT_TAG.to_string()]);
    let reconciled = reconciler
        .reconcile(&owner(), &bo_record.id, "Bo")
        .await
        .unwrap();

    assert_eq!(reconciled.contact.name, "Bo");
    assert_eq!(
        reconciled.record.linkage_state().unwrap(),
        LinkageState::Linked(reconciled.contact.id.clone())
    );

    let report = audit_consistency(h.store.as_ref(), &owner()).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_round_trip_preserves_text_fields() {
    let h = setup();
    let pipeline = heuristic_pipeline(h.store.clone());

    let raw = "嗯，今天和小明一起吃了火锅。\nAna: we should do this again!";
    let outcome = pipeline
        .capture(&owner(), None, CaptureInput::Text(raw.into()))
        .await
        .unwrap();

    for record in &outcome.records {
        let stored = h.store.get_record(&owner(), &record.id).await.unwrap().unwrap();
        assert_eq!(stored.raw_text, raw);
        assert_eq!(stored.narrative_text, record.narrative_text);
        assert_eq!(stored.tags, record.tags);
        assert_eq!(stored.mentioned_people, record.mentioned_people);
        assert!(stored.linkage_state().is_ok());
    }
}

#[tokio::test]
async fn test_llm_backend_with_vocabulary() {
    let h = setup();
    {
        let db = h.db.lock().await;
        db.create_tag(&owner(), TagKind::Event, "Dinner").unwrap();
        db.create_tag(&owner(), TagKind::Event, "Sports").unwrap();
    }

    let generator: Arc<dyn TextGenerator> = Arc::new(StageGenerator {
        normalize: "Sure! Here is the tidied text: dinner with Cy",
        people: "Cy",
        tags: "Dinner, Karaoke",
    });
    let config = PipelineConfig {
        summarize: false,
        ..PipelineConfig::default()
    };
    let (_, pipeline) = CapturePipeline::from_config(h.store.clone(), Some(generator), config);

    let outcome = pipeline
        .capture(&owner(), None, CaptureInput::Text("dinner with Cy".into()))
        .await
        .unwrap();

    assert!(outcome.normalization.is_some(), "Non-JSON normalization reply degrades");
    assert_eq!(outcome.narrative_text, "dinner with Cy");
    assert_eq!(outcome.tags, BTreeSet::from(["Dinner".to_string()]));
    assert_eq!(outcome.people, vec!["Cy"]);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].tags, BTreeSet::from(["Dinner".to_string()]));
    assert_eq!(
        outcome.records[0].linkage_state().unwrap(),
        LinkageState::Unarchived(BTreeSet::from(["Cy".to_string()]))
    );
}

#[tokio::test]
async fn test_concurrent_captures_do_not_interfere() {
    let h = setup();
    let pipeline = Arc::new(heuristic_pipeline(h.store.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let text = if i % 2 == 0 {
                format!("Walk number {} with Ana and Bo", i)
            } else {
                format!("Quiet evening number {}", i)
            };
            pipeline
                .capture(&owner(), None, CaptureInput::Text(text))
                .await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap().unwrap().records.len();
    }

    // 4 captures with two people, 4 with none
    assert_eq!(total, 4 * 2 + 4);
    assert_eq!(h.store.list_records(&owner()).await.unwrap().len(), total);
}

#[tokio::test]
async fn test_rejected_input_writes_nothing() {
    let h = setup();
    let pipeline = heuristic_pipeline(h.store.clone());

    let err = pipeline
        .capture(&owner(), None, CaptureInput::Text(String::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::CaptureInput(_)));
    assert!(err.preserved().is_none());

    assert!(h.store.list_records(&owner()).await.unwrap().is_empty());
}
