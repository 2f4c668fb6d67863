//! CrowdAnki export backend.
//!
//! Writes the directory layout the CrowdAnki add-on imports
//! (`<Deck>/deck.json` plus `<Deck>/media/`), zipped into a single file.
//! Nothing time-dependent goes into the package: identical decks produce
//! byte-identical files, so the output can live in version control.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use super::{
    entry_options, safe_file_name, write_package, BackendError, CardHandle, DeckContents,
    DeckHandle, MediaId, PackageSummary, PackagingBackend,
};
use crate::domain::{CardFieldSet, NoteType};

/// Writes CrowdAnki archives; decks stay open and can be finalized repeatedly
#[derive(Default)]
pub struct CrowdAnkiBackend {
    decks: HashMap<usize, DeckContents>,
    next_handle: usize,
}

impl CrowdAnkiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn deck_mut(&mut self, deck: DeckHandle) -> Result<&mut DeckContents, BackendError> {
        self.decks
            .get_mut(&deck.0)
            .ok_or(BackendError::UnknownDeck(deck.0))
    }
}

impl PackagingBackend for CrowdAnkiBackend {
    fn name(&self) -> &str {
        "crowdanki"
    }

    fn extension(&self) -> &str {
        "zip"
    }

    fn create_deck(&mut self, name: &str) -> DeckHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.decks.insert(handle, DeckContents::new(name));
        DeckHandle(handle)
    }

    fn add_card(&mut self, deck: DeckHandle, card: CardFieldSet) -> Result<CardHandle, BackendError> {
        Ok(self.deck_mut(deck)?.add_card(card))
    }

    fn add_media_file(&mut self, deck: DeckHandle, path: &Path) -> Result<MediaId, BackendError> {
        self.deck_mut(deck)?.add_media(path)
    }

    fn finalize(&mut self, deck: DeckHandle, output: &Path) -> Result<PackageSummary, BackendError> {
        let contents = self
            .decks
            .get(&deck.0)
            .ok_or(BackendError::UnknownDeck(deck.0))?;

        let folder = safe_file_name(&contents.name);
        let deck_json = serde_json::to_string_pretty(&deck_document(contents))?;
        let options = entry_options();

        write_package(output, |zip| {
            zip.start_file(format!("{}/deck.json", folder), options)?;
            zip.write_all(deck_json.as_bytes())?;

            for (name, source) in &contents.media {
                let bytes = std::fs::read(source)
                    .map_err(|_| BackendError::MediaNotFound(source.clone()))?;
                zip.start_file(format!("{}/media/{}", folder, name), options)?;
                zip.write_all(&bytes)?;
            }
            Ok(())
        })?;

        info!(
            deck = %contents.name,
            cards = contents.cards.len(),
            media = contents.media.len(),
            path = %output.display(),
            "Wrote CrowdAnki archive"
        );

        Ok(PackageSummary {
            path: output.to_path_buf(),
            cards: contents.cards.len(),
            media_files: contents.media.len(),
        })
    }
}

/// UUID derived from a seed string
fn stable_uuid(seed: &str) -> Uuid {
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn deck_document(contents: &DeckContents) -> Value {
    let deck_uuid = stable_uuid(&format!("deck:{}", contents.name));
    let config_uuid = stable_uuid(&format!("deck-config:{}", contents.name));

    let mut note_models: BTreeMap<String, &NoteType> = BTreeMap::new();
    for card in &contents.cards {
        note_models
            .entry(model_uuid(&card.note_type).to_string())
            .or_insert(card.note_type.as_ref());
    }

    let notes: Vec<Value> = contents
        .cards
        .iter()
        .map(|card| {
            json!({
                "__type__": "Note",
                "data": "",
                "fields": card.values(),
                "flags": 0,
                "guid": card.guid,
                "note_model_uuid": model_uuid(&card.note_type).to_string(),
                "tags": card.tags,
            })
        })
        .collect();

    json!({
        "__type__": "Deck",
        "children": [],
        "crowdanki_uuid": deck_uuid.to_string(),
        "deck_config_uuid": config_uuid.to_string(),
        "deck_configurations": [deck_configuration(&contents.name, config_uuid)],
        "desc": "",
        "dyn": 0,
        "extendNew": 10,
        "extendRev": 50,
        "media_files": contents.media.keys().collect::<Vec<_>>(),
        "name": contents.name,
        "note_models": note_models
            .iter()
            .map(|(uuid, note_type)| note_model(uuid, note_type))
            .collect::<Vec<_>>(),
        "notes": notes,
    })
}

fn model_uuid(note_type: &NoteType) -> Uuid {
    stable_uuid(&format!("note-model:{}", note_type.name))
}

fn note_model(uuid: &str, note_type: &NoteType) -> Value {
    let fields: Vec<Value> = note_type
        .fields
        .iter()
        .enumerate()
        .map(|(ord, name)| {
            json!({
                "font": "Arial",
                "media": [],
                "name": name,
                "ord": ord,
                "rtl": false,
                "size": 20,
                "sticky": false,
            })
        })
        .collect();

    let templates: Vec<Value> = note_type
        .templates
        .iter()
        .enumerate()
        .map(|(ord, template)| {
            json!({
                "afmt": template.back,
                "bafmt": "",
                "bqfmt": "",
                "did": null,
                "name": template.name,
                "ord": ord,
                "qfmt": template.front,
            })
        })
        .collect();

    json!({
        "__type__": "NoteModel",
        "crowdanki_uuid": uuid,
        "css": note_type.css,
        "flds": fields,
        "latexPost": "\\end{document}",
        "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n",
        "name": note_type.name,
        "req": (0..note_type.templates.len()).map(|ord| json!([ord, "any", [0]])).collect::<Vec<_>>(),
        "sortf": 0,
        "tags": [],
        "tmpls": templates,
        "type": 0,
        "vers": [],
    })
}

fn deck_configuration(deck_name: &str, uuid: Uuid) -> Value {
    json!({
        "__type__": "DeckConfig",
        "autoplay": true,
        "crowdanki_uuid": uuid.to_string(),
        "dyn": false,
        "lapse": { "delays": [10], "leechAction": 0, "leechFails": 8, "minInt": 1, "mult": 0 },
        "maxTaken": 60,
        "name": deck_name,
        "new": { "bury": true, "delays": [1, 10], "initialFactor": 2500, "ints": [1, 4, 7], "order": 1, "perDay": 20 },
        "replayq": true,
        "rev": { "bury": true, "ease4": 1.3, "fuzz": 0.05, "ivlFct": 1, "maxIvl": 36500, "perDay": 200 },
        "timer": 0,
    })
}
