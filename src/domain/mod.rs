//! Domain types for vocadeck.
//!
//! This module contains the plain data structures that flow through a run:
//! - Entry: vocabulary records and their enriched form
//! - Artifact: records of generated media
//! - Card: note types and backend-ready field sets
//! - Report / Events: what happened during a run

pub mod artifact;
pub mod card;
pub mod entry;
pub mod events;
pub mod report;

// Re-export commonly used types
pub use artifact::{ArtifactRecord, MediaKind};
pub use card::{note_guid, stable_id, CardField, CardFieldSet, CardTemplate, NoteType};
pub use entry::{
    EnrichedEntry, EntryKind, FailureKind, MediaCompleteness, MediaReference, MediaRequest,
    SkipReason, SlotOutcome, VocabularyEntry,
};
pub use events::{Event, EventType};
pub use report::{CardFailure, DeckOutcome, MediaStats, RunReport};
