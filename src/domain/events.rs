//! Journal events recorded during a run.
//!
//! Every slot resolution, card build and packaging result is appended to the
//! run journal so a run can be inspected after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::content_key::ContentKey;

/// A single event in the append-only run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Vocabulary entry (if applicable)
    pub entry_id: Option<String>,

    /// Media slot (if applicable)
    pub slot: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Content key the event concerns (if applicable)
    pub key: Option<ContentKey>,

    /// Human-readable summary (no credentials)
    pub summary: String,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            entry_id: None,
            slot: None,
            event_type,
            key: None,
            summary: summary.into(),
            error: None,
        }
    }

    /// Attach the entry and slot the event concerns
    pub fn for_slot(mut self, entry_id: &str, slot: &str) -> Self {
        self.entry_id = Some(entry_id.to_string());
        self.slot = Some(slot.to_string());
        self
    }

    /// Attach the entry the event concerns
    pub fn for_entry(mut self, entry_id: &str) -> Self {
        self.entry_id = Some(entry_id.to_string());
        self
    }

    pub fn with_key(mut self, key: ContentKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events that can occur during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    SlotCacheHit,
    SlotGenerated,
    SlotSkipped,
    SlotFailed,
    CardBuilt,
    CardFailed,
    DeckFinalized,
    RunFailed,
}
