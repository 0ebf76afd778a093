use rapport_schemas::{Contact, InteractionRecord, InvariantViolation, OwnerId, RecordId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::ReconciliationError;
use crate::store::Persistence;

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub contact: Contact,
    /// False when an existing contact of that name was reused
    pub contact_created: bool,
    pub record: InteractionRecord,
    /// Other records that named only this person and are now linked too
    pub backfilled: Vec<RecordId>,
}

/// Promotes an unarchived name on a record into a contact and links the
/// record to it.
///
/// Steps run strictly in order and each one is safe to repeat: contact
/// creation is lookup-or-create on the exact name, linking overwrites the
/// record's linkage fields, and the last-interaction update only moves
/// forward. Two concurrent calls for the same record and name converge on a
/// single contact with the record linked to it.
pub struct ReconciliationHandler {
    store: Arc<dyn Persistence>,
    default_tags: BTreeSet<String>,
}

impl ReconciliationHandler {
    pub fn new(store: Arc<dyn Persistence>, default_tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            default_tags: default_tags.into_iter().collect(),
        }
    }

    pub async fn reconcile(
        &self,
        owner_id: &OwnerId,
        record_id: &RecordId,
        person: &str,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let record = self
            .store
            .get_record(owner_id, record_id)
            .await?
            .ok_or_else(|| ReconciliationError::RecordNotFound(record_id.clone()))?;

        if !record.mentioned_people.contains(person) {
            return Err(ReconciliationError::PersonNotMentioned {
                record_id: record_id.clone(),
                person: person.to_string(),
            });
        }

        // Step 1: contact
        let (contact, contact_created) = self
            .store
            .get_or_create_contact(owner_id, person, &self.default_tags)
            .await?;
        if contact_created {
            info!("Reconciliation created contact {} for {}", contact.id, person);
        } else {
            debug!("Reconciliation reusing contact {} for {}", contact.id, person);
        }

        // Step 2: link the originating record
        let record = if record.linked_contact_id.as_ref() == Some(&contact.id)
            && !record.unarchived_people.contains(person)
        {
            record
        } else {
            self.store
                .link_record(owner_id, record_id, &contact.id, person)
                .await
                .map_err(|e| {
                    error!(
                        "Contact {} exists but record {} could not be linked: {:#}",
                        contact.id, record_id, e
                    );
                    ReconciliationError::ReconciliationInconsistency {
                        contact_id: contact.id.clone(),
                        record_id: record_id.clone(),
                        message: format!("{:#}", e),
                    }
                })?
        };

        // Step 3: last interaction
        self.store
            .advance_last_interaction(owner_id, &contact.id, &record.created_at)
            .await?;

        let backfilled = self.backfill(owner_id, &contact, record_id).await;

        info!(
            "Reconciled {} on record {} (contact {}, {} backfilled)",
            person,
            record_id,
            contact.id,
            backfilled.len()
        );

        Ok(ReconciliationOutcome {
            contact,
            contact_created,
            record,
            backfilled,
        })
    }

    /// Link other unlinked records whose only unarchived person is this
    /// contact's name. Best effort: failures are logged and skipped.
    async fn backfill(&self, owner_id: &OwnerId, contact: &Contact, origin: &RecordId) -> Vec<RecordId> {
        let candidates = match self
            .store
            .unlinked_records_mentioning(owner_id, &contact.name)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Backfill lookup for {} failed: {:#}", contact.name, e);
                return Vec::new();
            }
        };

        let only_this_person = BTreeSet::from([contact.name.clone()]);
        let mut linked = Vec::new();
        for record in candidates {
            if &record.id == origin || record.unarchived_people != only_this_person {
                continue;
            }

            match self
                .store
                .link_record(owner_id, &record.id, &contact.id, &contact.name)
                .await
            {
                Ok(record) => {
                    if let Err(e) = self
                        .store
                        .advance_last_interaction(owner_id, &contact.id, &record.created_at)
                        .await
                    {
                        warn!("Could not advance {} after backfill: {:#}", contact.id, e);
                    }
                    linked.push(record.id);
                }
                Err(e) => warn!("Backfill of record {} failed: {:#}", record.id, e),
            }
        }
        linked
    }
}

/// Result of scanning an owner's data for linkage problems
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Contacts no record points at while some unlinked record still names
    /// them, the trace of a reconciliation that stopped after step 1
    pub orphan_contacts: Vec<Contact>,
    pub invariant_violations: Vec<InvariantViolation>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_contacts.is_empty() && self.invariant_violations.is_empty()
    }
}

pub async fn audit_consistency(
    store: &dyn Persistence,
    owner_id: &OwnerId,
) -> anyhow::Result<ConsistencyReport> {
    let mut report = ConsistencyReport::default();

    for contact in store.list_contacts(owner_id).await? {
        if !store.records_for_contact(owner_id, &contact.id).await?.is_empty() {
            continue;
        }
        if !store
            .unlinked_records_mentioning(owner_id, &contact.name)
            .await?
            .is_empty()
        {
            warn!("Orphan contact {} ({})", contact.id, contact.name);
            report.orphan_contacts.push(contact);
        }
    }

    report.invariant_violations = store
        .list_records(owner_id)
        .await?
        .iter()
        .filter_map(|record| record.linkage_state().err())
        .collect();

    Ok(report)
}
