use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Tag used when nothing in the owner's vocabulary fits a capture
pub const UNCATEGORIZED_TAG: &str = "uncategorized";

/// Default tag for contacts created by reconciliation
pub const NEW_CONTACT_TAG: &str = "new-contact";

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Matching key for contacts: names are compared exactly, per owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactKey {
    pub owner_id: OwnerId,
    pub name: String,
}

impl ContactKey {
    pub fn new(owner_id: &OwnerId, name: &str) -> Self {
        Self {
            owner_id: owner_id.clone(),
            name: name.to_string(),
        }
    }
}

// ============================================================================
// Interaction Record Schema
// ============================================================================

/// One persisted account of a social interaction.
///
/// After materialization `mentioned_people` holds at most one name. The
/// linkage fields obey the invariant checked by [`InteractionRecord::linkage_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub raw_text: String,
    pub narrative_text: String,
    pub summary: Option<String>,
    pub tags: BTreeSet<String>,
    pub mentioned_people: BTreeSet<String>,
    pub linked_contact_id: Option<ContactId>,
    pub unarchived_people: BTreeSet<String>,
    pub created_at: String, // RFC3339
}

/// The three legal linkage shapes of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LinkageState {
    /// Mentioned person is archived as this contact
    Linked(ContactId),
    /// Nobody was mentioned
    Unmentioned,
    /// Mentioned people with no contact yet
    Unarchived(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("record {record_id} violates linkage invariant: {reason}")]
pub struct InvariantViolation {
    pub record_id: RecordId,
    pub reason: String,
}

impl InteractionRecord {
    /// Classify the record's linkage, or report how it breaks the invariant
    pub fn linkage_state(&self) -> Result<LinkageState, InvariantViolation> {
        let violation = |reason: &str| InvariantViolation {
            record_id: self.id.clone(),
            reason: reason.to_string(),
        };

        match &self.linked_contact_id {
            Some(contact_id) => {
                if self.unarchived_people.is_empty() {
                    Ok(LinkageState::Linked(contact_id.clone()))
                } else {
                    Err(violation("linked record still lists unarchived people"))
                }
            }
            None if self.mentioned_people.is_empty() => {
                if self.unarchived_people.is_empty() {
                    Ok(LinkageState::Unmentioned)
                } else {
                    Err(violation("unarchived people listed but nobody mentioned"))
                }
            }
            None => {
                if self.unarchived_people == self.mentioned_people {
                    Ok(LinkageState::Unarchived(self.unarchived_people.clone()))
                } else {
                    Err(violation(
                        "unlinked record must list every mentioned person as unarchived",
                    ))
                }
            }
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked_contact_id.is_some()
    }

    /// The single mentioned person of a materialized record
    pub fn person(&self) -> Option<&str> {
        self.mentioned_people.iter().next().map(String::as_str)
    }
}

// ============================================================================
// Contact Schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub owner_id: OwnerId,
    pub name: String,
    pub remark: Option<String>,
    pub tags: BTreeSet<String>,
    pub important_dates: Vec<ImportantDate>,
    pub last_interaction_at: Option<String>, // RFC3339
    pub created_at: String,                  // RFC3339
    pub updated_at: String,                  // RFC3339
}

impl Contact {
    pub fn key(&self) -> ContactKey {
        ContactKey::new(&self.owner_id, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportantDate {
    pub name: String,
    pub value: String,
    pub calendar_type: CalendarType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarType {
    #[serde(rename = "solar")]
    Solar,
    #[serde(rename = "lunar")]
    Lunar,
}

impl CalendarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarType::Solar => "solar",
            CalendarType::Lunar => "lunar",
        }
    }
}

// ============================================================================
// Tag Vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    #[serde(rename = "person")]
    Person,
    #[serde(rename = "event")]
    Event,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Person => "person",
            TagKind::Event => "event",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "person" => Some(TagKind::Person),
            "event" => Some(TagKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEntry {
    pub id: TagId,
    pub owner_id: OwnerId,
    pub kind: TagKind,
    pub name: String,
    pub created_at: String, // RFC3339
}

// ============================================================================
// Text-generation Messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_record_id() -> RecordId {
    RecordId(format!("rec_{}", ulid::Ulid::new()))
}

pub fn generate_contact_id() -> ContactId {
    ContactId(format!("ct_{}", ulid::Ulid::new()))
}

pub fn generate_tag_id() -> TagId {
    TagId(format!("tag_{}", ulid::Ulid::new()))
}

/// Current time as fixed-width RFC3339 (microseconds, `Z`), so stored
/// timestamps order correctly as plain strings.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
