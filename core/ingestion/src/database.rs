use anyhow::{Context, Result};
use rapport_schemas::{
    generate_contact_id, generate_tag_id, now_timestamp, Contact, ContactId, ImportantDate,
    InteractionRecord, OwnerId, RecordId, TagEntry, TagId, TagKind,
};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{DuplicateContact, EmptyName};

const RECORD_COLUMNS: &str = "id, owner_id, raw_text, narrative_text, summary, tags,
     mentioned_people, linked_contact_id, unarchived_people, created_at";

const CONTACT_COLUMNS: &str = "id, owner_id, name, remark, tags, important_dates,
     last_interaction_at, created_at, updated_at";

/// Fields a user may edit directly on a record. `raw_text` is immutable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordEdit {
    pub narrative_text: Option<String>,
    /// `Some(None)` clears the summary
    #[serde(default, deserialize_with = "double_option")]
    pub summary: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContact {
    pub name: String,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub important_dates: Vec<ImportantDate>,
}

/// Contact fields a user may edit. The name is the matching key and is not
/// editable here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactUpdate {
    #[serde(default, deserialize_with = "double_option")]
    pub remark: Option<Option<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub important_dates: Option<Vec<ImportantDate>>,
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnerStats {
    pub records: usize,
    pub contacts: usize,
    pub unarchived_records: usize,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database and ensure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // Contacts (the owner's address book)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                remark TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                important_dates TEXT NOT NULL DEFAULT '[]',
                last_interaction_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (owner_id, name)
            )",
            [],
        )?;

        // Interaction records (one per mentioned person after fan-out)
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                narrative_text TEXT NOT NULL,
                summary TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                mentioned_people TEXT NOT NULL DEFAULT '[]',
                linked_contact_id TEXT,
                unarchived_people TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Per-owner tag vocabularies
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (owner_id, kind, name)
            )",
            [],
        )?;

        // Indexes for performance
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_owner_created ON records(owner_id, created_at DESC)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_contact ON records(linked_contact_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_contacts_owner ON contacts(owner_id, last_interaction_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    fn row_to_record(row: &Row) -> rusqlite::Result<InteractionRecord> {
        let tags: String = row.get(5)?;
        let mentioned: String = row.get(6)?;
        let unarchived: String = row.get(8)?;

        Ok(InteractionRecord {
            id: RecordId(row.get(0)?),
            owner_id: OwnerId(row.get(1)?),
            raw_text: row.get(2)?,
            narrative_text: row.get(3)?,
            summary: row.get(4)?,
            tags: serde_json::from_str(&tags).map_err(json_error)?,
            mentioned_people: serde_json::from_str(&mentioned).map_err(json_error)?,
            linked_contact_id: row.get::<_, Option<String>>(7)?.map(ContactId),
            unarchived_people: serde_json::from_str(&unarchived).map_err(json_error)?,
            created_at: row.get(9)?,
        })
    }

    fn query_records(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<InteractionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(args, Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Insert a batch of sibling records in one transaction: either every
    /// record becomes visible at commit or none does. A linked record also
    /// advances its contact's last interaction inside the same transaction.
    pub fn insert_records(&self, records: &[InteractionRecord]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        for record in records {
            tx.execute(
                "INSERT INTO records (id, owner_id, raw_text, narrative_text, summary, tags,
                                      mentioned_people, linked_contact_id, unarchived_people, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.0,
                    record.owner_id.0,
                    record.raw_text,
                    record.narrative_text,
                    record.summary,
                    serde_json::to_string(&record.tags)?,
                    serde_json::to_string(&record.mentioned_people)?,
                    record.linked_contact_id.as_ref().map(|c| c.0.as_str()),
                    serde_json::to_string(&record.unarchived_people)?,
                    record.created_at,
                ],
            )
            .with_context(|| format!("failed to insert record {}", record.id))?;

            if let Some(ref contact_id) = record.linked_contact_id {
                advance_in(&tx, &record.owner_id, contact_id, &record.created_at)?;
            }
        }

        tx.commit()?;

        debug!("Inserted {} record(s)", records.len());
        Ok(())
    }

    pub fn get_record(&self, owner_id: &OwnerId, id: &RecordId) -> Result<Option<InteractionRecord>> {
        let record = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM records WHERE owner_id = ?1 AND id = ?2",
                    RECORD_COLUMNS
                ),
                params![owner_id.0, id.0],
                Self::row_to_record,
            )
            .optional()?;

        Ok(record)
    }

    /// Point a record at a contact and drop `person` from its unarchived set
    pub fn link_record(
        &self,
        owner_id: &OwnerId,
        id: &RecordId,
        contact_id: &ContactId,
        person: &str,
    ) -> Result<InteractionRecord> {
        let tx = self.conn.unchecked_transaction()?;

        let unarchived: String = tx
            .query_row(
                "SELECT unarchived_people FROM records WHERE owner_id = ?1 AND id = ?2",
                params![owner_id.0, id.0],
                |row| row.get(0),
            )
            .optional()?
            .with_context(|| format!("record {} not found", id))?;

        let mut unarchived: BTreeSet<String> = serde_json::from_str(&unarchived)?;
        unarchived.remove(person);

        tx.execute(
            "UPDATE records SET linked_contact_id = ?3, unarchived_people = ?4
             WHERE owner_id = ?1 AND id = ?2",
            params![
                owner_id.0,
                id.0,
                contact_id.0,
                serde_json::to_string(&unarchived)?
            ],
        )?;

        tx.commit()?;
        debug!("Linked record {} to contact {}", id, contact_id);

        self.get_record(owner_id, id)?
            .with_context(|| format!("record {} vanished after linking", id))
    }

    /// Direct user edit of display fields
    pub fn update_record(
        &self,
        owner_id: &OwnerId,
        id: &RecordId,
        edit: &RecordEdit,
    ) -> Result<Option<InteractionRecord>> {
        let Some(mut record) = self.get_record(owner_id, id)? else {
            return Ok(None);
        };

        if let Some(ref narrative) = edit.narrative_text {
            record.narrative_text = narrative.clone();
        }
        if let Some(ref summary) = edit.summary {
            record.summary = summary.clone();
        }
        if let Some(ref tags) = edit.tags {
            record.tags = tags.clone();
        }

        self.conn.execute(
            "UPDATE records SET narrative_text = ?3, summary = ?4, tags = ?5
             WHERE owner_id = ?1 AND id = ?2",
            params![
                owner_id.0,
                id.0,
                record.narrative_text,
                record.summary,
                serde_json::to_string(&record.tags)?
            ],
        )?;

        Ok(Some(record))
    }

    pub fn delete_record(&self, owner_id: &OwnerId, id: &RecordId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM records WHERE owner_id = ?1 AND id = ?2",
            params![owner_id.0, id.0],
        )?;
        Ok(deleted > 0)
    }

    /// Newest first
    pub fn list_records(&self, owner_id: &OwnerId, limit: Option<usize>) -> Result<Vec<InteractionRecord>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.query_records(
            &format!(
                "SELECT {} FROM records WHERE owner_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                RECORD_COLUMNS
            ),
            params![owner_id.0, limit],
        )
    }

    /// Contact timeline: records linked to `contact_id`, newest first
    pub fn records_for_contact(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
    ) -> Result<Vec<InteractionRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM records WHERE owner_id = ?1 AND linked_contact_id = ?2
                 ORDER BY created_at DESC, id DESC",
                RECORD_COLUMNS
            ),
            params![owner_id.0, contact_id.0],
        )
    }

    /// Records whose mentioned people contain `name`, linked or not
    pub fn records_mentioning(&self, owner_id: &OwnerId, name: &str) -> Result<Vec<InteractionRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM records WHERE owner_id = ?1
                 AND EXISTS (SELECT 1 FROM json_each(records.mentioned_people) WHERE value = ?2)
                 ORDER BY created_at DESC, id DESC",
                RECORD_COLUMNS
            ),
            params![owner_id.0, name],
        )
    }

    /// Unlinked records still listing `name` as unarchived
    pub fn unlinked_records_mentioning(
        &self,
        owner_id: &OwnerId,
        name: &str,
    ) -> Result<Vec<InteractionRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM records WHERE owner_id = ?1 AND linked_contact_id IS NULL
                 AND EXISTS (SELECT 1 FROM json_each(records.unarchived_people) WHERE value = ?2)
                 ORDER BY created_at DESC, id DESC",
                RECORD_COLUMNS
            ),
            params![owner_id.0, name],
        )
    }

    /// Records created in `[start, end]` (RFC3339 bounds), newest first
    pub fn records_in_range(
        &self,
        owner_id: &OwnerId,
        start: &str,
        end: &str,
    ) -> Result<Vec<InteractionRecord>> {
        self.query_records(
            &format!(
                "SELECT {} FROM records WHERE owner_id = ?1
                 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at DESC, id DESC",
                RECORD_COLUMNS
            ),
            params![owner_id.0, start, end],
        )
    }

    pub fn owner_stats(&self, owner_id: &OwnerId) -> Result<OwnerStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, params![owner_id.0], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(OwnerStats {
            records: count("SELECT COUNT(*) FROM records WHERE owner_id = ?1")?,
            contacts: count("SELECT COUNT(*) FROM contacts WHERE owner_id = ?1")?,
            unarchived_records: count(
                "SELECT COUNT(*) FROM records WHERE owner_id = ?1
                 AND linked_contact_id IS NULL AND unarchived_people != '[]'",
            )?,
        })
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
        let tags: String = row.get(4)?;
        let dates: String = row.get(5)?;

        Ok(Contact {
            id: ContactId(row.get(0)?),
            owner_id: OwnerId(row.get(1)?),
            name: row.get(2)?,
            remark: row.get(3)?,
            tags: serde_json::from_str(&tags).map_err(json_error)?,
            important_dates: serde_json::from_str(&dates).map_err(json_error)?,
            last_interaction_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn query_contacts(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Contact>> {
        let mut stmt = self.conn.prepare(sql)?;
        let contacts = stmt
            .query_map(args, Self::row_to_contact)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Create a contact; fails with [`DuplicateContact`] when the name is taken
    pub fn create_contact(&self, owner_id: &OwnerId, new: &NewContact) -> Result<Contact> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EmptyName { kind: "contact" }.into());
        }

        if self.find_contact_by_name(owner_id, name)?.is_some() {
            return Err(DuplicateContact {
                name: name.to_string(),
            }
            .into());
        }

        let now = now_timestamp();
        let contact = Contact {
            id: generate_contact_id(),
            owner_id: owner_id.clone(),
            name: name.to_string(),
            remark: new.remark.clone().filter(|r| !r.trim().is_empty()),
            tags: new.tags.clone(),
            important_dates: new.important_dates.clone(),
            last_interaction_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO contacts (id, owner_id, name, remark, tags, important_dates,
                                             last_interaction_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8)",
            params![
                contact.id.0,
                contact.owner_id.0,
                contact.name,
                contact.remark,
                serde_json::to_string(&contact.tags)?,
                serde_json::to_string(&contact.important_dates)?,
                contact.created_at,
                contact.updated_at,
            ],
        )?;

        if inserted == 0 {
            return Err(DuplicateContact {
                name: contact.name,
            }
            .into());
        }

        info!("Created contact: {} ({})", contact.name, contact.id);
        Ok(contact)
    }

    /// Look up a contact by exact name, creating it with `tags` when absent.
    /// Returns the contact and whether it was created by this call.
    pub fn get_or_create_contact(
        &self,
        owner_id: &OwnerId,
        name: &str,
        tags: &BTreeSet<String>,
    ) -> Result<(Contact, bool)> {
        let now = now_timestamp();
        let id = generate_contact_id();

        let inserted = self.conn.execute(
            "INSERT INTO contacts (id, owner_id, name, remark, tags, important_dates,
                                   last_interaction_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, '[]', NULL, ?5, ?5)
             ON CONFLICT (owner_id, name) DO NOTHING",
            params![id.0, owner_id.0, name, serde_json::to_string(tags)?, now],
        )?;

        let contact = self
            .find_contact_by_name(owner_id, name)?
            .with_context(|| format!("contact {} missing after upsert", name))?;

        if inserted > 0 {
            info!("Created contact: {} ({})", name, contact.id);
        }
        Ok((contact, inserted > 0))
    }

    pub fn get_contact(&self, owner_id: &OwnerId, id: &ContactId) -> Result<Option<Contact>> {
        let contact = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contacts WHERE owner_id = ?1 AND id = ?2",
                    CONTACT_COLUMNS
                ),
                params![owner_id.0, id.0],
                Self::row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    /// Exact, case-sensitive name match
    pub fn find_contact_by_name(&self, owner_id: &OwnerId, name: &str) -> Result<Option<Contact>> {
        let contact = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM contacts WHERE owner_id = ?1 AND name = ?2",
                    CONTACT_COLUMNS
                ),
                params![owner_id.0, name],
                Self::row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    pub fn find_contacts_by_names(&self, owner_id: &OwnerId, names: &[String]) -> Result<Vec<Contact>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..names.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM contacts WHERE owner_id = ?1 AND name IN ({})",
            CONTACT_COLUMNS, placeholders
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let args = std::iter::once(owner_id.0.as_str()).chain(names.iter().map(String::as_str));
        let contacts = stmt
            .query_map(params_from_iter(args), Self::row_to_contact)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Most recently seen first; never-seen contacts last
    pub fn list_contacts(&self, owner_id: &OwnerId) -> Result<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "SELECT {} FROM contacts WHERE owner_id = ?1
                 ORDER BY last_interaction_at IS NULL, last_interaction_at DESC, created_at DESC",
                CONTACT_COLUMNS
            ),
            params![owner_id.0],
        )
    }

    /// Substring search over name and remark
    pub fn search_contacts(&self, owner_id: &OwnerId, keyword: &str) -> Result<Vec<Contact>> {
        let escaped = keyword
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let like = format!("%{}%", escaped);
        self.query_contacts(
            &format!(
                "SELECT {} FROM contacts WHERE owner_id = ?1
                 AND (name LIKE ?2 ESCAPE '\\' OR remark LIKE ?2 ESCAPE '\\')
                 ORDER BY name",
                CONTACT_COLUMNS
            ),
            params![owner_id.0, like],
        )
    }

    pub fn update_contact(
        &self,
        owner_id: &OwnerId,
        id: &ContactId,
        update: &ContactUpdate,
    ) -> Result<Option<Contact>> {
        let Some(mut contact) = self.get_contact(owner_id, id)? else {
            return Ok(None);
        };

        if let Some(ref remark) = update.remark {
            contact.remark = remark.clone().filter(|r| !r.trim().is_empty());
        }
        if let Some(ref tags) = update.tags {
            contact.tags = tags.clone();
        }
        if let Some(ref dates) = update.important_dates {
            contact.important_dates = dates.clone();
        }
        contact.updated_at = now_timestamp();

        self.conn.execute(
            "UPDATE contacts SET remark = ?3, tags = ?4, important_dates = ?5, updated_at = ?6
             WHERE owner_id = ?1 AND id = ?2",
            params![
                owner_id.0,
                id.0,
                contact.remark,
                serde_json::to_string(&contact.tags)?,
                serde_json::to_string(&contact.important_dates)?,
                contact.updated_at,
            ],
        )?;

        Ok(Some(contact))
    }

    /// Delete a contact. Records linked to it become unlinked and list their
    /// mentioned person as unarchived again.
    pub fn delete_contact(&self, owner_id: &OwnerId, id: &ContactId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let unlinked = tx.execute(
            "UPDATE records SET linked_contact_id = NULL, unarchived_people = mentioned_people
             WHERE owner_id = ?1 AND linked_contact_id = ?2",
            params![owner_id.0, id.0],
        )?;

        let deleted = tx.execute(
            "DELETE FROM contacts WHERE owner_id = ?1 AND id = ?2",
            params![owner_id.0, id.0],
        )?;

        tx.commit()?;

        if deleted > 0 {
            info!("Deleted contact {} ({} records unlinked)", id, unlinked);
        }
        Ok(deleted > 0)
    }

    /// Move `last_interaction_at` forward to `at`; never backwards
    pub fn advance_last_interaction(
        &self,
        owner_id: &OwnerId,
        contact_id: &ContactId,
        at: &str,
    ) -> Result<bool> {
        advance_in(&self.conn, owner_id, contact_id, at)
    }

    // ------------------------------------------------------------------
    // Tag vocabularies
    // ------------------------------------------------------------------

    pub fn list_tags(&self, owner_id: &OwnerId, kind: TagKind) -> Result<Vec<TagEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, owner_id, name, created_at FROM tags
             WHERE owner_id = ?1 AND kind = ?2
             ORDER BY created_at DESC, name",
        )?;

        let tags = stmt
            .query_map(params![owner_id.0, kind.as_str()], |row| {
                Ok(TagEntry {
                    id: TagId(row.get(0)?),
                    owner_id: OwnerId(row.get(1)?),
                    kind,
                    name: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tags)
    }

    pub fn tag_names(&self, owner_id: &OwnerId, kind: TagKind) -> Result<BTreeSet<String>> {
        Ok(self
            .list_tags(owner_id, kind)?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    /// Add a tag to the vocabulary; returns the existing entry if present
    pub fn create_tag(&self, owner_id: &OwnerId, kind: TagKind, name: &str) -> Result<TagEntry> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EmptyName { kind: "tag" }.into());
        }

        self.conn.execute(
            "INSERT INTO tags (id, owner_id, kind, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (owner_id, kind, name) DO NOTHING",
            params![
                generate_tag_id().0,
                owner_id.0,
                kind.as_str(),
                name,
                now_timestamp()
            ],
        )?;

        let entry = self.conn.query_row(
            "SELECT id, created_at FROM tags WHERE owner_id = ?1 AND kind = ?2 AND name = ?3",
            params![owner_id.0, kind.as_str(), name],
            |row| {
                Ok(TagEntry {
                    id: TagId(row.get(0)?),
                    owner_id: owner_id.clone(),
                    kind,
                    name: name.to_string(),
                    created_at: row.get(1)?,
                })
            },
        )?;

        Ok(entry)
    }

    pub fn delete_tag(&self, owner_id: &OwnerId, kind: TagKind, id: &TagId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM tags WHERE owner_id = ?1 AND kind = ?2 AND id = ?3",
            params![owner_id.0, kind.as_str(), id.0],
        )?;
        Ok(deleted > 0)
    }
}

fn advance_in(conn: &Connection, owner_id: &OwnerId, contact_id: &ContactId, at: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE contacts SET last_interaction_at = ?3
         WHERE owner_id = ?1 AND id = ?2
         AND (last_interaction_at IS NULL OR last_interaction_at < ?3)",
        params![owner_id.0, contact_id.0, at],
    )?;
    Ok(updated > 0)
}

fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}
