//! Anki package (`.apkg`) backend.
//!
//! An `.apkg` is a zip holding a `collection.anki2` SQLite database
//! (schema version 11), the media files renamed to `0`, `1`, ... and a
//! `media` JSON map from those numbers back to file names.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{
    entry_options, strip_html, write_package, BackendError, CardHandle, DeckContents,
    DeckHandle, MediaId, PackageSummary, PackagingBackend,
};
use crate::domain::{stable_id, CardFieldSet, NoteType};

const SCHEMA: &str = "
CREATE TABLE col (
    id integer primary key, crt integer not null, mod integer not null,
    scm integer not null, ver integer not null, dty integer not null,
    usn integer not null, ls integer not null, conf text not null,
    models text not null, decks text not null, dconf text not null,
    tags text not null
);
CREATE TABLE notes (
    id integer primary key, guid text not null, mid integer not null,
    mod integer not null, usn integer not null, tags text not null,
    flds text not null, sfld integer not null, csum integer not null,
    flags integer not null, data text not null
);
CREATE TABLE cards (
    id integer primary key, nid integer not null, did integer not null,
    ord integer not null, mod integer not null, usn integer not null,
    type integer not null, queue integer not null, due integer not null,
    ivl integer not null, factor integer not null, reps integer not null,
    lapses integer not null, left integer not null, odue integer not null,
    odid integer not null, flags integer not null, data text not null
);
CREATE TABLE revlog (
    id integer primary key, cid integer not null, usn integer not null,
    ease integer not null, ivl integer not null, lastIvl integer not null,
    factor integer not null, time integer not null, type integer not null
);
CREATE TABLE graves (
    usn integer not null, oid integer not null, type integer not null
);
CREATE INDEX ix_notes_usn on notes (usn);
CREATE INDEX ix_cards_usn on cards (usn);
CREATE INDEX ix_revlog_usn on revlog (usn);
CREATE INDEX ix_cards_nid on cards (nid);
CREATE INDEX ix_cards_sched on cards (did, queue, due);
CREATE INDEX ix_revlog_cid on revlog (cid);
CREATE INDEX ix_notes_csum on notes (csum);
";

/// Anki field separator
const FIELD_SEPARATOR: &str = "\x1f";

enum DeckSlot {
    Open(DeckContents),
    Finalized(String),
}

/// Writes `.apkg` files; each deck can be finalized once
#[derive(Default)]
pub struct ApkgBackend {
    decks: HashMap<usize, DeckSlot>,
    next_handle: usize,
}

impl ApkgBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_deck(&mut self, deck: DeckHandle) -> Result<&mut DeckContents, BackendError> {
        match self.decks.get_mut(&deck.0) {
            Some(DeckSlot::Open(contents)) => Ok(contents),
            Some(DeckSlot::Finalized(name)) => Err(BackendError::AlreadyFinalized(name.clone())),
            None => Err(BackendError::UnknownDeck(deck.0)),
        }
    }
}

impl PackagingBackend for ApkgBackend {
    fn name(&self) -> &str {
        "apkg"
    }

    fn extension(&self) -> &str {
        "apkg"
    }

    fn create_deck(&mut self, name: &str) -> DeckHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.decks.insert(handle, DeckSlot::Open(DeckContents::new(name)));
        DeckHandle(handle)
    }

    fn add_card(&mut self, deck: DeckHandle, card: CardFieldSet) -> Result<CardHandle, BackendError> {
        Ok(self.open_deck(deck)?.add_card(card))
    }

    fn add_media_file(&mut self, deck: DeckHandle, path: &Path) -> Result<MediaId, BackendError> {
        self.open_deck(deck)?.add_media(path)
    }

    fn finalize(&mut self, deck: DeckHandle, output: &Path) -> Result<PackageSummary, BackendError> {
        // Take the contents out first so the deck is consumed even if writing fails
        let contents = match self.decks.remove(&deck.0) {
            Some(DeckSlot::Open(contents)) => contents,
            Some(DeckSlot::Finalized(name)) => {
                self.decks.insert(deck.0, DeckSlot::Finalized(name.clone()));
                return Err(BackendError::AlreadyFinalized(name));
            }
            None => return Err(BackendError::UnknownDeck(deck.0)),
        };
        self.decks
            .insert(deck.0, DeckSlot::Finalized(contents.name.clone()));

        let build_dir = tempfile::tempdir()?;
        let collection_path = build_dir.path().join("collection.anki2");
        write_collection(&collection_path, &contents)?;

        let collection = std::fs::read(&collection_path)?;
        let options = entry_options();

        write_package(output, |zip| {
            zip.start_file("collection.anki2", options)?;
            zip.write_all(&collection)?;

            let mut media_map = BTreeMap::new();
            for (index, (name, source)) in contents.media.iter().enumerate() {
                let bytes = std::fs::read(source)
                    .map_err(|_| BackendError::MediaNotFound(source.clone()))?;
                zip.start_file(index.to_string(), options)?;
                zip.write_all(&bytes)?;
                media_map.insert(index.to_string(), name.clone());
            }

            zip.start_file("media", options)?;
            zip.write_all(serde_json::to_string(&media_map)?.as_bytes())?;
            Ok(())
        })?;

        info!(
            deck = %contents.name,
            cards = contents.cards.len(),
            media = contents.media.len(),
            path = %output.display(),
            "Wrote Anki package"
        );

        Ok(PackageSummary {
            path: output.to_path_buf(),
            cards: contents.cards.len(),
            media_files: contents.media.len(),
        })
    }
}

/// Create and fill `collection.anki2`
fn write_collection(path: &Path, contents: &DeckContents) -> Result<(), BackendError> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;

    let now = Utc::now();
    let now_secs = now.timestamp();
    let now_millis = now.timestamp_millis();
    let deck_id = stable_id(&format!("deck:{}", contents.name));

    let mut note_types: BTreeMap<i64, &NoteType> = BTreeMap::new();
    for card in &contents.cards {
        note_types.entry(card.note_type.id()).or_insert(card.note_type.as_ref());
    }
    let current_model = note_types
        .keys()
        .next()
        .copied()
        .unwrap_or_else(|| NoteType::vocabulary().id());

    let models: serde_json::Map<String, Value> = note_types
        .iter()
        .map(|(id, note_type)| (id.to_string(), model_json(note_type, deck_id, now_secs)))
        .collect();

    let mut decks = serde_json::Map::new();
    decks.insert("1".to_string(), deck_json(1, "Default", now_secs));
    decks.insert(deck_id.to_string(), deck_json(deck_id, &contents.name, now_secs));

    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO col VALUES (1, ?1, ?2, ?3, 11, 0, 0, 0, ?4, ?5, ?6, ?7, '{}')",
        params![
            now_secs,
            now_millis,
            now_millis,
            collection_conf(deck_id, current_model).to_string(),
            Value::Object(models).to_string(),
            Value::Object(decks).to_string(),
            deck_config_json().to_string(),
        ],
    )?;

    for (position, card) in contents.cards.iter().enumerate() {
        let note_id = stable_id(&format!("note:{}", card.guid));
        let values = card.values();
        let sort_field = strip_html(values.first().copied().unwrap_or_default());

        tx.execute(
            "INSERT INTO notes VALUES (?1, ?2, ?3, ?4, -1, ?5, ?6, ?7, ?8, 0, '')",
            params![
                note_id,
                card.guid,
                card.note_type.id(),
                now_secs,
                format_tags(&card.tags),
                values.join(FIELD_SEPARATOR),
                sort_field,
                field_checksum(&sort_field),
            ],
        )?;

        for ord in 0..card.note_type.templates.len() {
            tx.execute(
                "INSERT INTO cards VALUES (?1, ?2, ?3, ?4, ?5, -1, 0, 0, ?6, 0, 0, 0, 0, 0, 0, 0, 0, '')",
                params![
                    stable_id(&format!("card:{}:{}", card.guid, ord)),
                    note_id,
                    deck_id,
                    ord as i64,
                    now_secs,
                    (position + 1) as i64,
                ],
            )?;
        }
    }

    tx.commit()?;
    debug!(path = %path.display(), notes = contents.cards.len(), "Wrote collection");
    Ok(())
}

/// Anki stores tags space-separated with surrounding spaces
fn format_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(" {} ", tags.join(" "))
    }
}

/// Duplicate-detection checksum over the sort field
///
/// Anki itself uses the first 32 bits of a SHA-1; it recomputes checksums
/// when checking the database, so any stable 32-bit digest works here.
fn field_checksum(sort_field: &str) -> i64 {
    let digest = Sha256::digest(sort_field.as_bytes());
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(bytes) as i64
}

fn model_json(note_type: &NoteType, deck_id: i64, now_secs: i64) -> Value {
    let fields: Vec<Value> = note_type
        .fields
        .iter()
        .enumerate()
        .map(|(ord, name)| {
            json!({
                "name": name,
                "ord": ord,
                "sticky": false,
                "rtl": false,
                "font": "Arial",
                "size": 20,
                "media": [],
            })
        })
        .collect();

    let templates: Vec<Value> = note_type
        .templates
        .iter()
        .enumerate()
        .map(|(ord, template)| {
            json!({
                "name": template.name,
                "ord": ord,
                "qfmt": template.front,
                "afmt": template.back,
                "did": null,
                "bqfmt": "",
                "bafmt": "",
            })
        })
        .collect();

    let requirements: Vec<Value> = (0..note_type.templates.len())
        .map(|ord| json!([ord, "any", [0]]))
        .collect();

    json!({
        "id": note_type.id(),
        "name": note_type.name,
        "type": 0,
        "mod": now_secs,
        "usn": -1,
        "sortf": 0,
        "did": deck_id,
        "tmpls": templates,
        "flds": fields,
        "css": note_type.css,
        "latexPre": "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n",
        "latexPost": "\\end{document}",
        "tags": [],
        "vers": [],
        "req": requirements,
    })
}

fn deck_json(id: i64, name: &str, now_secs: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "mod": now_secs,
        "usn": -1,
        "lrnToday": [0, 0],
        "revToday": [0, 0],
        "newToday": [0, 0],
        "timeToday": [0, 0],
        "collapsed": false,
        "browserCollapsed": false,
        "desc": "",
        "dyn": 0,
        "conf": 1,
        "extendNew": 10,
        "extendRev": 50,
    })
}

fn deck_config_json() -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": 0,
            "usn": 0,
            "maxTaken": 60,
            "timer": 0,
            "autoplay": true,
            "replayq": true,
            "dyn": false,
            "new": {
                "delays": [1, 10],
                "ints": [1, 4, 7],
                "initialFactor": 2500,
                "order": 1,
                "perDay": 20,
                "bury": true,
            },
            "rev": {
                "perDay": 200,
                "ease4": 1.3,
                "fuzz": 0.05,
                "maxIvl": 36500,
                "ivlFct": 1,
                "bury": true,
            },
            "lapse": {
                "delays": [10],
                "mult": 0,
                "minInt": 1,
                "leechFails": 8,
                "leechAction": 0,
            },
        }
    })
}

fn collection_conf(deck_id: i64, current_model: i64) -> Value {
    json!({
        "nextPos": 1,
        "estTimes": true,
        "activeDecks": [deck_id],
        "sortType": "noteFld",
        "timeLim": 0,
        "sortBackwards": false,
        "addToCur": true,
        "curDeck": deck_id,
        "newBury": true,
        "newSpread": 0,
        "dueCounts": true,
        "curModel": current_model.to_string(),
        "collapseTime": 1200,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{note_guid, CardField};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn card(entry_id: &str, word: &str) -> CardFieldSet {
        let note_type = Arc::new(NoteType::vocabulary());
        let fields = note_type
            .fields
            .iter()
            .map(|name| CardField {
                name: name.clone(),
                value: if name == "Word" { word.to_string() } else { String::new() },
            })
            .collect();

        CardFieldSet {
            entry_id: entry_id.to_string(),
            guid: note_guid(entry_id),
            note_type,
            fields,
            media: Vec::new(),
            tags: vec!["lesson_1".to_string()],
        }
    }

    #[test]
    fn test_collection_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("collection.anki2");

        let mut contents = DeckContents::new("German");
        contents.add_card(card("1", "<b>Hund</b>"));
        contents.add_card(card("2", "Katze"));
        write_collection(&path, &contents).unwrap();

        let conn = Connection::open(&path).unwrap();
        let notes: i64 = conn.query_row("SELECT count(*) FROM notes", [], |r| r.get(0)).unwrap();
        let cards: i64 = conn.query_row("SELECT count(*) FROM cards", [], |r| r.get(0)).unwrap();
        let ver: i64 = conn.query_row("SELECT ver FROM col", [], |r| r.get(0)).unwrap();
        assert_eq!(notes, 2);
        assert_eq!(cards, 4); // two templates per note
        assert_eq!(ver, 11);

        let (flds, sfld, tags): (String, String, String) = conn
            .query_row(
                "SELECT flds, sfld, tags FROM notes WHERE guid = ?1",
                params![note_guid("1")],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert!(flds.starts_with("<b>Hund</b>\x1f"));
        assert_eq!(sfld, "Hund");
        assert_eq!(tags, " lesson_1 ");

        let decks: String = conn.query_row("SELECT decks FROM col", [], |r| r.get(0)).unwrap();
        assert!(decks.contains("\"German\""));
    }

    #[test]
    fn test_finalize_consumes_deck() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("out.apkg");

        let mut backend = ApkgBackend::new();
        let deck = backend.create_deck("German");
        backend.add_card(deck, card("1", "Hund")).unwrap();

        let summary = backend.finalize(deck, &output).unwrap();
        assert_eq!(summary.cards, 1);
        assert!(output.is_file());

        assert!(matches!(
            backend.finalize(deck, &output),
            Err(BackendError::AlreadyFinalized(name)) if name == "German"
        ));
        assert!(matches!(
            backend.add_card(deck, card("2", "Katze")),
            Err(BackendError::AlreadyFinalized(_))
        ));
        assert!(matches!(
            backend.finalize(DeckHandle(99), &output),
            Err(BackendError::UnknownDeck(99))
        ));
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(format_tags(&[]), "");
        assert_eq!(format_tags(&["a".to_string(), "b".to_string()]), " a b ");
    }
}
