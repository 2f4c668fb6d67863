//! Turn enriched entries into backend-neutral card field sets.
//!
//! Mappings are defined per entry kind, either built in or loaded from YAML:
//!
//! ```yaml
//! noun:
//!   fields:
//!     - { note_field: Word, field: word, required: true }
//!     - { note_field: WordAudio, media: word_audio }
//! verb:
//!   note_type: { name: Verbs, fields: [Infinitive, Audio], templates: [...] }
//!   fields:
//!     - { note_field: Infinitive, field: word, required: true }
//!     - { note_field: Audio, media: word_audio }
//! ```
//!
//! Kinds absent from a YAML file are unmapped and their entries fail to build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    note_guid, CardField, CardFieldSet, EnrichedEntry, EntryKind, MediaKind, MediaReference,
    NoteType,
};

/// Why an entry could not become a card
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardBuildError {
    #[error("entry '{entry_id}' is missing required field '{field}'")]
    MissingField { entry_id: String, field: String },

    #[error("entry '{entry_id}' has kind '{kind}' with no note mapping")]
    UnmappedKind { entry_id: String, kind: EntryKind },
}

/// Where one note field takes its value from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource<'a> {
    /// An entry field
    Entry { field: &'a str, required: bool },

    /// A media slot
    Media { slot: &'a str },
}

/// One note field and its source; exactly one of `field`/`media` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub note_field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,

    /// Only meaningful for entry fields
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn entry(note_field: &str, field: &str, required: bool) -> Self {
        Self {
            note_field: note_field.to_string(),
            field: Some(field.to_string()),
            media: None,
            required,
        }
    }

    pub fn media(note_field: &str, slot: &str) -> Self {
        Self {
            note_field: note_field.to_string(),
            field: None,
            media: Some(slot.to_string()),
            required: false,
        }
    }

    pub fn source(&self) -> Option<FieldSource<'_>> {
        match (&self.field, &self.media) {
            (Some(field), None) => Some(FieldSource::Entry {
                field,
                required: self.required,
            }),
            (None, Some(slot)) => Some(FieldSource::Media { slot }),
            _ => None,
        }
    }
}

fn default_note_type() -> Arc<NoteType> {
    Arc::new(NoteType::vocabulary())
}

/// Note type plus field mappings for one entry kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMapping {
    #[serde(default = "default_note_type")]
    pub note_type: Arc<NoteType>,

    pub fields: Vec<FieldMapping>,
}

impl NoteMapping {
    /// Mapping onto the built-in vocabulary note type
    pub fn vocabulary() -> Self {
        Self {
            note_type: default_note_type(),
            fields: vec![
                FieldMapping::entry("Word", "word", true),
                FieldMapping::entry("Translation", "translation", true),
                FieldMapping::entry("Example", "example", false),
                FieldMapping::media("WordAudio", "word_audio"),
                FieldMapping::media("ExampleAudio", "example_audio"),
                FieldMapping::media("Image", "image"),
                FieldMapping::entry("Notes", "notes", false),
            ],
        }
    }

    /// Check that every mapping has one source and targets a known field
    pub fn validate(&self) -> Result<()> {
        if self.note_type.fields.is_empty() {
            anyhow::bail!("Note type '{}' has no fields", self.note_type.name);
        }
        if self.note_type.templates.is_empty() {
            anyhow::bail!("Note type '{}' has no card templates", self.note_type.name);
        }

        for mapping in &self.fields {
            if mapping.source().is_none() {
                anyhow::bail!(
                    "Mapping for '{}' must set exactly one of 'field' or 'media'",
                    mapping.note_field
                );
            }
            if !self.note_type.fields.contains(&mapping.note_field) {
                anyhow::bail!(
                    "Note type '{}' has no field '{}'",
                    self.note_type.name,
                    mapping.note_field
                );
            }
        }

        Ok(())
    }
}

/// Mapping per entry kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardMappings {
    by_kind: BTreeMap<EntryKind, NoteMapping>,
}

impl Default for CardMappings {
    /// Built-in vocabulary mapping for every kind
    fn default() -> Self {
        let kinds = [
            EntryKind::Noun,
            EntryKind::Verb,
            EntryKind::Adjective,
            EntryKind::Adverb,
            EntryKind::Phrase,
            EntryKind::Other,
        ];
        let mapping = NoteMapping::vocabulary();

        Self {
            by_kind: kinds.into_iter().map(|k| (k, mapping.clone())).collect(),
        }
    }
}

impl CardMappings {
    /// Load mappings from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mappings file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid mappings file: {}", path.display()))
    }

    /// Parse mappings from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let by_kind: BTreeMap<EntryKind, NoteMapping> =
            serde_yaml::from_str(content).context("Failed to parse mappings YAML")?;

        for (kind, mapping) in &by_kind {
            mapping
                .validate()
                .with_context(|| format!("Invalid mapping for kind '{}'", kind))?;
        }

        Ok(Self { by_kind })
    }

    /// Mappings from an optional file, built-ins otherwise
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn get(&self, kind: EntryKind) -> Option<&NoteMapping> {
        self.by_kind.get(&kind)
    }
}

/// Builds one `CardFieldSet` per enriched entry
#[derive(Debug, Clone, Default)]
pub struct CardBuilder {
    mappings: CardMappings,
}

impl CardBuilder {
    pub fn new(mappings: CardMappings) -> Self {
        Self { mappings }
    }

    pub fn build(&self, enriched: &EnrichedEntry) -> Result<CardFieldSet, CardBuildError> {
        let entry = &enriched.entry;
        let mapping = self
            .mappings
            .get(entry.kind)
            .ok_or_else(|| CardBuildError::UnmappedKind {
                entry_id: entry.id.clone(),
                kind: entry.kind,
            })?;

        let mut rendered: BTreeMap<&str, String> = BTreeMap::new();
        let mut media: Vec<PathBuf> = Vec::new();

        for field_mapping in &mapping.fields {
            let value = match field_mapping.source() {
                Some(FieldSource::Entry { field, required }) => match entry.field(field) {
                    Some(value) => value.to_string(),
                    None if required => {
                        return Err(CardBuildError::MissingField {
                            entry_id: entry.id.clone(),
                            field: field.to_string(),
                        })
                    }
                    None => String::new(),
                },
                Some(FieldSource::Media { slot }) => match enriched.media(slot) {
                    Some(reference) => {
                        if !media.contains(&reference.path) {
                            media.push(reference.path.clone());
                        }
                        render_media(reference)
                    }
                    None => String::new(),
                },
                None => String::new(),
            };

            rendered.insert(field_mapping.note_field.as_str(), value);
        }

        let fields = mapping
            .note_type
            .fields
            .iter()
            .map(|name| CardField {
                name: name.clone(),
                value: rendered.remove(name.as_str()).unwrap_or_default(),
            })
            .collect();

        Ok(CardFieldSet {
            entry_id: entry.id.clone(),
            guid: note_guid(&entry.id),
            note_type: mapping.note_type.clone(),
            fields,
            media,
            tags: entry.tags.iter().map(|t| sanitize_tag(t)).filter(|t| !t.is_empty()).collect(),
        })
    }
}

/// Anki markup for a media reference
pub fn render_media(reference: &MediaReference) -> String {
    match reference.kind {
        MediaKind::Audio => format!("[sound:{}]", reference.media_name),
        MediaKind::Image => format!("<img src=\"{}\">", reference.media_name),
    }
}

/// Anki tags cannot contain whitespace
fn sanitize_tag(tag: &str) -> String {
    tag.split_whitespace().collect::<Vec<_>>().join("_")
}
