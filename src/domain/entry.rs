//! Vocabulary entries and their enriched form.
//!
//! A `VocabularyEntry` comes from upstream and is never mutated. Enrichment
//! wraps it in an `EnrichedEntry` carrying one outcome per media slot.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::artifact::MediaKind;
use crate::core::content_key::{ContentKey, GenerationParams};

/// Kind of vocabulary item; selects the card mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Phrase,
    Other,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryKind::Noun => "noun",
            EntryKind::Verb => "verb",
            EntryKind::Adjective => "adjective",
            EntryKind::Adverb => "adverb",
            EntryKind::Phrase => "phrase",
            EntryKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for EntryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "noun" | "n" | "substantiv" => Ok(EntryKind::Noun),
            "verb" | "v" => Ok(EntryKind::Verb),
            "adjective" | "adj" => Ok(EntryKind::Adjective),
            "adverb" | "adv" => Ok(EntryKind::Adverb),
            "phrase" | "expression" | "sentence" => Ok(EntryKind::Phrase),
            "other" | "" => Ok(EntryKind::Other),
            _ => anyhow::bail!("Unknown entry kind: {}", s),
        }
    }
}

/// A media requirement declared by an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRequest {
    /// Slot name (e.g. "word_audio", "example_audio", "image")
    pub slot: String,

    /// What to produce
    pub kind: MediaKind,

    /// Text to vocalize or concept to illustrate
    pub text: String,

    /// Entry-level generation parameters (language, voice, ...)
    #[serde(default)]
    pub params: GenerationParams,
}

impl MediaRequest {
    pub fn audio(slot: impl Into<String>, text: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            slot: slot.into(),
            kind: MediaKind::Audio,
            text: text.into(),
            params,
        }
    }

    pub fn image(slot: impl Into<String>, text: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            slot: slot.into(),
            kind: MediaKind::Image,
            text: text.into(),
            params,
        }
    }
}

/// A typed vocabulary record produced by the upstream loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    /// Stable identifier (unique within a deck)
    pub id: String,

    /// Kind tag
    pub kind: EntryKind,

    /// Field name -> value
    pub fields: BTreeMap<String, String>,

    /// Media-eligible fields with their generation parameters
    #[serde(default)]
    pub media: Vec<MediaRequest>,

    /// Free-form tags carried through to the card
    #[serde(default)]
    pub tags: Vec<String>,
}

impl VocabularyEntry {
    pub fn new(id: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            id: id.into(),
            kind,
            fields: BTreeMap::new(),
            media: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Add a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Declare a media slot
    pub fn with_media(mut self, request: MediaRequest) -> Self {
        self.media.push(request);
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Non-empty field value
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// A resolved pointer to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Fingerprint of the artifact
    pub key: ContentKey,

    /// Kind of media
    pub kind: MediaKind,

    /// File name used inside the deck package
    pub media_name: String,

    /// Absolute location of the stored file
    pub path: PathBuf,
}

/// Why a slot was intentionally left empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No adapter configured for this media kind
    NoAdapter,

    /// Nothing to generate from (payload empty after normalization)
    EmptyPayload,
}

/// Why a slot could not be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote service kept failing after the retry budget was spent
    TransientService,

    /// The adapter can never satisfy this input
    PermanentRequest,

    /// The adapter's quota is exhausted for this run
    QuotaExceeded,

    /// The artifact could not be written to the store
    StoreWrite,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::TransientService => "transient_service",
            FailureKind::PermanentRequest => "permanent_request",
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::StoreWrite => "store_write",
        };
        f.write_str(name)
    }
}

/// Outcome of one media slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotOutcome {
    Resolved { reference: MediaReference },
    Skipped { reason: SkipReason },
    Failed { failure: FailureKind },
}

impl SlotOutcome {
    /// The media reference, if the slot resolved
    pub fn reference(&self) -> Option<&MediaReference> {
        match self {
            SlotOutcome::Resolved { reference } => Some(reference),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, SlotOutcome::Resolved { .. })
    }
}

/// Media completeness of an enriched entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCompleteness {
    /// Every declared slot resolved (or none were declared)
    Complete,

    /// Some slots resolved, some absent
    Partial,

    /// Slots were declared but none resolved
    Missing,
}

/// An entry plus the outcome of each of its media slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEntry {
    /// The original, untouched entry
    pub entry: VocabularyEntry,

    /// Slot name -> outcome
    pub slots: BTreeMap<String, SlotOutcome>,
}

impl EnrichedEntry {
    pub fn new(entry: VocabularyEntry) -> Self {
        Self {
            entry,
            slots: BTreeMap::new(),
        }
    }

    /// Media reference bound to a slot, if any
    pub fn media(&self, slot: &str) -> Option<&MediaReference> {
        self.slots.get(slot).and_then(SlotOutcome::reference)
    }

    /// Failure kinds recorded against this entry
    pub fn failures(&self) -> impl Iterator<Item = (&str, FailureKind)> {
        self.slots.iter().filter_map(|(slot, outcome)| match outcome {
            SlotOutcome::Failed { failure } => Some((slot.as_str(), *failure)),
            _ => None,
        })
    }

    pub fn completeness(&self) -> MediaCompleteness {
        let total = self.slots.len();
        let resolved = self.slots.values().filter(|o| o.is_resolved()).count();

        if resolved == total {
            MediaCompleteness::Complete
        } else if resolved == 0 {
            MediaCompleteness::Missing
        } else {
            MediaCompleteness::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_key::derive;

    fn reference(text: &str) -> MediaReference {
        let key = derive(MediaKind::Audio, text, &GenerationParams::new());
        MediaReference {
            media_name: format!("{}.mp3", key),
            path: PathBuf::from(format!("/store/{}.mp3", key)),
            key,
            kind: MediaKind::Audio,
        }
    }

    #[test]
    fn test_entry_kind_from_str() {
        assert_eq!("Noun".parse::<EntryKind>().unwrap(), EntryKind::Noun);
        assert_eq!("adj".parse::<EntryKind>().unwrap(), EntryKind::Adjective);
        assert_eq!("".parse::<EntryKind>().unwrap(), EntryKind::Other);
        assert!("pronoun-ish".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_blank_field_is_absent() {
        let entry = VocabularyEntry::new("1", EntryKind::Noun)
            .with_field("word", "Hund")
            .with_field("example", "   ");

        assert_eq!(entry.field("word"), Some("Hund"));
        assert_eq!(entry.field("example"), None);
        assert_eq!(entry.field("missing"), None);
    }

    #[test]
    fn test_completeness() {
        let entry = VocabularyEntry::new("1", EntryKind::Noun);

        let mut enriched = EnrichedEntry::new(entry);
        assert_eq!(enriched.completeness(), MediaCompleteness::Complete);

        enriched.slots.insert(
            "word_audio".to_string(),
            SlotOutcome::Resolved { reference: reference("Hund") },
        );
        assert_eq!(enriched.completeness(), MediaCompleteness::Complete);

        enriched.slots.insert(
            "image".to_string(),
            SlotOutcome::Failed { failure: FailureKind::PermanentRequest },
        );
        assert_eq!(enriched.completeness(), MediaCompleteness::Partial);
        assert_eq!(
            enriched.failures().collect::<Vec<_>>(),
            vec![("image", FailureKind::PermanentRequest)]
        );

        enriched.slots.remove("word_audio");
        assert_eq!(enriched.completeness(), MediaCompleteness::Missing);
    }

    #[test]
    fn test_slot_outcome_serialization() {
        let outcome = SlotOutcome::Skipped { reason: SkipReason::NoAdapter };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"status":"skipped","reason":"no_adapter"}"#);
    }
}
