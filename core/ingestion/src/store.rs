use anyhow::Result;
use async_trait::async_trait;
use rapport_schemas::{Contact, ContactId, InteractionRecord, OwnerId, RecordId, TagKind};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::database::Database;

/// Owner-scoped record and contact persistence used by the pipeline stages.
///
/// Every method is a single retry-safe step: inserts are keyed by fresh ids,
/// contact creation is lookup-or-create on `(owner, name)`, and linking is a
/// plain field overwrite.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Persist the sibling records of one capture as a unit: all of them
    /// become visible together or none do. Linked records also advance their
    /// contact's last interaction within the same write.
    async fn insert_records(&self, records: &[InteractionRecord]) -> Result<()>;

    async fn get_record(&self, owner_id: &OwnerId, id: &RecordId) -> Result<Option<InteractionRecord>>;

    /// Set the record's contact and drop `person` from its unarchived set
    async fn link_record(
        &self,
        owner_id: &OwnerId,
        id: &RecordId,
        contact_id: &ContactId,
        person: &str,
    ) -> Result<InteractionRecord>;

    async fn find_contacts_by_names(&self, owner_id: &OwnerId, names: &[String]) -> Result<Vec<Contact>>;

    /// Returns the contact and whether this call created it
    async fn get_or_create_contact(
        &self,
        owner_id: &OwnerId,
        name: &str,
        tags: &BTreeSet<String>,
    ) -> Result<(Contact, bool)>;

    /// Monotonic; returns whether the timestamp moved
    async fn advance_last_interaction(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
        at: &str,
    ) -> Result<bool>;

    async fn unlinked_records_mentioning(&self, owner_id: &OwnerId, name: &str) -> Result<Vec<InteractionRecord>>;

    async fn records_for_contact(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
    ) -> Result<Vec<InteractionRecord>>;

    async fn list_contacts(&self, owner_id: &OwnerId) -> Result<Vec<Contact>>;

    async fn list_records(&self, owner_id: &OwnerId) -> Result<Vec<InteractionRecord>>;

    /// The owner's tag vocabulary of the given kind
    async fn tag_names(&self, owner_id: &OwnerId, kind: TagKind) -> Result<BTreeSet<String>>;
}

/// [`Persistence`] over the shared SQLite [`Database`]
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn insert_records(&self, records: &[InteractionRecord]) -> Result<()> {
        self.db.lock().await.insert_records(records)
    }

    async fn get_record(&self, owner_id: &OwnerId, id: &RecordId) -> Result<Option<InteractionRecord>> {
        self.db.lock().await.get_record(owner_id, id)
    }

    async fn link_record(
        &self,
        owner_id: &OwnerId,
        id: &RecordId,
        contact_id: &ContactId,
        person: &str,
    ) -> Result<InteractionRecord> {
        self.db.lock().await.link_record(owner_id, id, contact_id, person)
    }

    async fn find_contacts_by_names(&self, owner_id: &OwnerId, names: &[String]) -> Result<Vec<Contact>> {
        self.db.lock().await.find_contacts_by_names(owner_id, names)
    }

    async fn get_or_create_contact(
        &self,
        owner_id: &OwnerId,
        name: &str,
        tags: &BTreeSet<String>,
    ) -> Result<(Contact, bool)> {
        self.db.lock().await.get_or_create_contact(owner_id, name, tags)
    }

    async fn advance_last_interaction(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
        at: &str,
    ) -> Result<bool> {
        self.db
            .lock()
            .await
            .advance_last_interaction(owner_id, contact_id, at)
    }

    async fn unlinked_records_mentioning(&self, owner_id: &OwnerId, name: &str) -> Result<Vec<InteractionRecord>> {
        self.db.lock().await.unlinked_records_mentioning(owner_id, name)
    }

    async fn records_for_contact(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
    ) -> Result<Vec<InteractionRecord>> {
        self.db.lock().await.records_for_contact(owner_id, contact_id)
    }

    async fn list_contacts(&self, owner_id: &OwnerId) -> Result<Vec<Contact>> {
        self.db.lock().await.list_contacts(owner_id)
    }

    async fn list_records(&self, owner_id: &OwnerId) -> Result<Vec<InteractionRecord>> {
        self.db.lock().await.list_records(owner_id, None)
    }

    async fn tag_names(&self, owner_id: &OwnerId, kind: TagKind) -> Result<BTreeSet<String>> {
        self.db.lock().await.tag_names(owner_id, kind)
    }
}
