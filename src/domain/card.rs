//! Note types and the field sets handed to packaging backends.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One card template of a note type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTemplate {
    pub name: String,

    /// Question side (Anki template syntax, e.g. `{{Word}}`)
    pub front: String,

    /// Answer side
    pub back: String,
}

/// Definition of a note type: ordered fields, card templates and styling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteType {
    pub name: String,

    /// Ordered field names; the first one is the sort field
    pub fields: Vec<String>,

    pub templates: Vec<CardTemplate>,

    #[serde(default)]
    pub css: String,
}

impl NoteType {
    /// Deterministic numeric id derived from the note type name
    pub fn id(&self) -> i64 {
        stable_id(&format!("note-type:{}", self.name))
    }

    /// Built-in vocabulary note type used when no mapping file is configured
    pub fn vocabulary() -> Self {
        Self {
            name: "Vocadeck Vocabulary".to_string(),
            fields: vec![
                "Word".to_string(),
                "Translation".to_string(),
                "Example".to_string(),
                "WordAudio".to_string(),
                "ExampleAudio".to_string(),
                "Image".to_string(),
                "Notes".to_string(),
            ],
            templates: vec![
                CardTemplate {
                    name: "Recognition".to_string(),
                    front: "<div class=\"word\">{{Word}}</div>{{WordAudio}}".to_string(),
                    back: "{{FrontSide}}<hr id=\"answer\"><div class=\"translation\">{{Translation}}</div>\
                           {{Image}}<div class=\"example\">{{Example}}</div>{{ExampleAudio}}\
                           <div class=\"notes\">{{Notes}}</div>"
                        .to_string(),
                },
                CardTemplate {
                    name: "Recall".to_string(),
                    front: "<div class=\"translation\">{{Translation}}</div>{{Image}}".to_string(),
                    back: "{{FrontSide}}<hr id=\"answer\"><div class=\"word\">{{Word}}</div>\
                           {{WordAudio}}<div class=\"example\">{{Example}}</div>"
                        .to_string(),
                },
            ],
            css: ".card { font-family: sans-serif; font-size: 22px; text-align: center; }\n\
                  .word { font-size: 32px; font-weight: bold; }\n\
                  .example { font-style: italic; color: #555; }\n\
                  img { max-width: 320px; }\n"
                .to_string(),
        }
    }
}

/// A single rendered field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardField {
    pub name: String,
    pub value: String,
}

/// Everything a backend needs to emit one note
///
/// Consumed exactly once by a backend's `add_card`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFieldSet {
    /// Id of the vocabulary entry this card came from
    pub entry_id: String,

    /// Stable note GUID (derived from the entry id)
    pub guid: String,

    /// Note type the fields belong to
    pub note_type: Arc<NoteType>,

    /// Rendered fields, in note-type order
    pub fields: Vec<CardField>,

    /// Media files referenced by the fields
    pub media: Vec<PathBuf>,

    pub tags: Vec<String>,
}

impl CardFieldSet {
    /// Value of a field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Field values in order
    pub fn values(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.value.as_str()).collect()
    }
}

/// Positive id (fits in 53 bits) derived from a string
pub fn stable_id(seed: &str) -> i64 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let id = (u64::from_le_bytes(bytes) & ((1 << 53) - 1)) as i64;
    id.max(1)
}

/// Note GUID derived from an entry id (base-16, 20 chars)
pub fn note_guid(entry_id: &str) -> String {
    let digest = Sha256::digest(format!("note:{}", entry_id).as_bytes());
    hex::encode(&digest[..10])
}
