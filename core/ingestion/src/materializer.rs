use rapport_schemas::{generate_record_id, now_timestamp, InteractionRecord, OwnerId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{CaptureError, FailedRecord, PreservedText};
use crate::resolver::Resolution;
use crate::store::Persistence;

/// Everything the materializer needs to turn one capture into records
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub owner_id: OwnerId,
    pub raw_text: String,
    pub narrative_text: String,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
    /// Extracted people, in extraction order; duplicates are ignored
    pub people: Vec<String>,
}

impl RecordDraft {
    fn preserved(&self) -> PreservedText {
        PreservedText {
            raw_text: self.raw_text.clone(),
            narrative_text: Some(self.narrative_text.clone()),
        }
    }

    fn distinct_people(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.people
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }
}

/// Creates the records for one capture: one per distinct mentioned person,
/// or a single unmentioned record when nobody was named.
pub struct RecordMaterializer {
    store: Arc<dyn Persistence>,
}

impl RecordMaterializer {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Build the records without touching storage. Siblings share
    /// `created_at`, narrative and tags; linkage is decided per person.
    pub fn plan(draft: &RecordDraft, resolution: &Resolution) -> Vec<InteractionRecord> {
        let created_at = now_timestamp();
        let base = InteractionRecord {
            id: generate_record_id(),
            owner_id: draft.owner_id.clone(),
            raw_text: draft.raw_text.clone(),
            narrative_text: draft.narrative_text.clone(),
            summary: draft.summary.clone(),
            tags: draft.tags.clone(),
            mentioned_people: BTreeSet::new(),
            linked_contact_id: None,
            unarchived_people: BTreeSet::new(),
            created_at,
        };

        let people = draft.distinct_people();
        if people.is_empty() {
            return vec![base];
        }

        people
            .into_iter()
            .map(|person| {
                let mut record = base.clone();
                record.id = generate_record_id();
                record.mentioned_people = BTreeSet::from([person.clone()]);
                match resolution.contact_for(&person) {
                    Some(contact_id) => record.linked_contact_id = Some(contact_id.clone()),
                    None => record.unarchived_people = BTreeSet::from([person]),
                }
                record
            })
            .collect()
    }

    /// Persist every planned record in one atomic write. Nothing is visible
    /// until that write returns, so dropping this future part way leaves no
    /// sibling behind. A failed write yields `PersistencePartialFailure`
    /// reporting how many of the siblings landed.
    pub async fn materialize(
        &self,
        draft: &RecordDraft,
        resolution: &Resolution,
    ) -> Result<Vec<InteractionRecord>, CaptureError> {
        let planned = Self::plan(draft, resolution);
        let attempted = planned.len();

        if let Err(e) = self.store.insert_records(&planned).await {
            error!("Saved 0 of {} records: {:#}", attempted, e);
            let message = format!("{:#}", e);
            let failures = planned
                .iter()
                .map(|record| FailedRecord {
                    person: record.person().map(String::from),
                    message: message.clone(),
                })
                .collect();
            return Err(CaptureError::PersistencePartialFailure {
                saved: Vec::new(),
                attempted,
                failures,
                preserved: draft.preserved(),
            });
        }

        info!(
            "Materialized {} record(s) ({} linked)",
            planned.len(),
            planned.iter().filter(|r| r.is_linked()).count()
        );
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::NewContact;
    use crate::resolver::ContactResolver;
    use crate::store::testing::{temp_store, FlakyStore};
    use crate::store::SqliteStore;
    use rapport_schemas::{ContactId, LinkageState};
    use std::time::Duration;

    fn owner() -> OwnerId {
        OwnerId("owner-1".into())
    }

    fn draft(people: &[&str]) -> RecordDraft {
        RecordDraft {
            owner_id: owner(),
            raw_text: "um lunch with Ana and Bo".into(),
            narrative_text: "Lunch with Ana and Bo".into(),
            summary: None,
            tags: BTreeSet::from(["food".to_string()]),
            people: people.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn add_contact(store: &SqliteStore, name: &str) -> ContactId {
        let db = store.database();
        let db = db.lock().await;
        db.create_contact(&owner(), &NewContact { name: name.into(), ..Default::default() })
            .unwrap()
            .id
    }

    #[test]
    fn test_plan_fan_out() {
        for people in [
            vec!["Ana", "Bo"],
            vec!["Ana", "Bo", "Cy", "Dee"],
            vec!["小明", "小红", "小明"],
        ] {
            let draft = draft(&people);
            let records = RecordMaterializer::plan(&draft, &Resolution::default());

            let distinct: BTreeSet<&str> = people.iter().copied().collect();
            assert_eq!(records.len(), distinct.len());

            let mentioned: BTreeSet<&str> = records.iter().filter_map(|r| r.person()).collect();
            assert_eq!(mentioned, distinct);

            let ids: BTreeSet<_> = records.iter().map(|r| r.id.clone()).collect();
            assert_eq!(ids.len(), records.len());

            for record in &records {
                assert_eq!(record.mentioned_people.len(), 1);
                assert_eq!(record.narrative_text, draft.narrative_text);
                assert_eq!(record.tags, draft.tags);
                assert_eq!(record.created_at, records[0].created_at);
                assert!(record.linkage_state().is_ok());
            }
        }
    }

    #[test]
    fn test_plan_without_people() {
        let records = RecordMaterializer::plan(&draft(&[]), &Resolution::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].linkage_state().unwrap(), LinkageState::Unmentioned);
    }

    #[tokio::test]
    async fn test_mixed_linkage() {
        let (_dir, store) = temp_store();
        let ana = add_contact(&store, "Ana").await;
        let store: Arc<dyn Persistence> = Arc::new(store);

        let draft = draft(&["Ana", "Bo"]);
        let resolution = ContactResolver::new(store.clone())
            .resolve(&owner(), &draft.people)
            .await
            .unwrap();
        let records = RecordMaterializer::new(store.clone())
            .materialize(&draft, &resolution)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].person(), Some("Ana"));
        assert_eq!(records[0].linked_contact_id, Some(ana.clone()));
        assert!(records[0].unarchived_people.is_empty());
        assert_eq!(records[1].person(), Some("Bo"));
        assert_eq!(records[1].linked_contact_id, None);
        assert_eq!(
            records[1].unarchived_people,
            BTreeSet::from(["Bo".to_string()])
        );

        let contacts = store.list_contacts(&owner()).await.unwrap();
        assert_eq!(
            contacts[0].last_interaction_at.as_deref(),
            Some(records[0].created_at.as_str())
        );
    }

    #[tokio::test]
    async fn test_failed_write_reports_saved_count() {
        let (_dir, inner) = temp_store();
        let mut flaky = FlakyStore::new(inner.clone());
        flaky.fail_inserts_for.insert("Bo".into());
        let store: Arc<dyn Persistence> = Arc::new(flaky);

        let draft = draft(&["Ana", "Bo", "Cy"]);
        let err = RecordMaterializer::new(store)
            .materialize(&draft, &Resolution::default())
            .await
            .unwrap_err();

        match err {
            CaptureError::PersistencePartialFailure {
                ref saved,
                attempted,
                ref failures,
                ref preserved,
            } => {
                assert_eq!(attempted, 3);
                assert!(saved.is_empty());
                let people: Vec<_> = failures.iter().filter_map(|f| f.person.as_deref()).collect();
                assert_eq!(people, vec!["Ana", "Bo", "Cy"]);
                assert!(failures[1].message.contains("disk full"));
                assert_eq!(preserved.raw_text, draft.raw_text);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.to_string(), "saved 0 of 3 records");

        // No sibling is visible on its own
        assert!(inner.list_records(&owner()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_fan_out_writes_nothing() {
        let (_dir, inner) = temp_store();
        let ana = add_contact(&inner, "Ana").await;
        let mut slow = FlakyStore::new(inner.clone());
        slow.insert_delay = Some(Duration::from_millis(300));
        let store: Arc<dyn Persistence> = Arc::new(slow);

        let draft = draft(&["Ana", "Bo"]);
        let resolution = ContactResolver::new(store.clone())
            .resolve(&owner(), &draft.people)
            .await
            .unwrap();
        let materializer = RecordMaterializer::new(store);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            materializer.materialize(&draft, &resolution),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(inner.list_records(&owner()).await.unwrap().is_empty());

        let contacts = inner.list_contacts(&owner()).await.unwrap();
        assert_eq!(contacts[0].id, ana);
        assert_eq!(contacts[0].last_interaction_at, None);
    }
}
