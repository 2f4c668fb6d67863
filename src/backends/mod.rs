//! Deck packaging backends.
//!
//! A backend receives decks, cards and media files through a narrow,
//! synchronous interface and writes one package per deck on `finalize`.
//! Everything upstream of this trait is format-agnostic: switching from
//! `.apkg` to CrowdAnki changes only which backend is constructed.

pub mod apkg;
pub mod crowdanki;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::CardFieldSet;

pub use apkg::ApkgBackend;
pub use crowdanki::CrowdAnkiBackend;

/// Errors raised by packaging backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown deck handle {0}")]
    UnknownDeck(usize),

    #[error("deck '{0}' was already finalized")]
    AlreadyFinalized(String),

    #[error("media file not found: {}", .0.display())]
    MediaNotFound(PathBuf),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque handle to a deck created on a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeckHandle(pub(crate) usize);

/// Position of a card within its deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardHandle(pub usize);

/// Name of a media file inside the package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaId(pub String);

/// What `finalize` wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub path: PathBuf,
    pub cards: usize,
    pub media_files: usize,
}

/// A deck packaging format
pub trait PackagingBackend: Send {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// File extension of the packages this backend writes
    fn extension(&self) -> &str;

    fn create_deck(&mut self, name: &str) -> DeckHandle;

    /// Add a card; a card with the same GUID replaces the earlier one
    fn add_card(&mut self, deck: DeckHandle, card: CardFieldSet) -> Result<CardHandle, BackendError>;

    /// Register a media file; files are deduplicated by file name
    fn add_media_file(&mut self, deck: DeckHandle, path: &Path) -> Result<MediaId, BackendError>;

    /// Write the package to `output`
    fn finalize(&mut self, deck: DeckHandle, output: &Path) -> Result<PackageSummary, BackendError>;
}

/// Selects a backend implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Apkg,
    #[serde(alias = "crowd_anki")]
    Crowdanki,
}

impl BackendKind {
    pub fn create(self) -> Box<dyn PackagingBackend> {
        match self {
            BackendKind::Apkg => Box::new(ApkgBackend::new()),
            BackendKind::Crowdanki => Box::new(CrowdAnkiBackend::new()),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Apkg => f.write_str("apkg"),
            BackendKind::Crowdanki => f.write_str("crowdanki"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "apkg" | "anki" => Ok(BackendKind::Apkg),
            "crowdanki" | "crowd_anki" | "crowd-anki" => Ok(BackendKind::Crowdanki),
            _ => anyhow::bail!("Unknown backend: {} (expected 'apkg' or 'crowdanki')", s),
        }
    }
}

/// Cards and media collected for one deck
#[derive(Debug, Clone, Default)]
pub(crate) struct DeckContents {
    pub name: String,
    pub cards: Vec<CardFieldSet>,

    /// Package file name -> source path, sorted for stable output
    pub media: BTreeMap<String, PathBuf>,
}

impl DeckContents {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_card(&mut self, card: CardFieldSet) -> CardHandle {
        if let Some(index) = self.cards.iter().position(|c| c.guid == card.guid) {
            warn!(
                deck = %self.name,
                entry = %card.entry_id,
                "Duplicate note GUID, replacing earlier card"
            );
            self.cards[index] = card;
            return CardHandle(index);
        }

        self.cards.push(card);
        CardHandle(self.cards.len() - 1)
    }

    pub fn add_media(&mut self, path: &Path) -> Result<MediaId, BackendError> {
        if !path.is_file() {
            return Err(BackendError::MediaNotFound(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| BackendError::MediaNotFound(path.to_path_buf()))?;

        self.media.entry(name.clone()).or_insert_with(|| path.to_path_buf());
        Ok(MediaId(name))
    }
}

/// Zip entry options with a fixed timestamp so identical input gives
/// byte-identical packages
pub(crate) fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
}

/// Build a zip next to `output` and move it into place once complete
pub(crate) fn write_package<F>(output: &Path, build: F) -> Result<(), BackendError>
where
    F: FnOnce(&mut ZipWriter<File>) -> Result<(), BackendError>,
{
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let partial = output.with_extension("part");
    let result = (|| {
        let mut zip = ZipWriter::new(File::create(&partial)?);
        build(&mut zip)?;
        let mut file = zip.finish()?;
        file.flush()?;
        Ok::<(), BackendError>(())
    })();

    match result {
        Ok(()) => {
            std::fs::rename(&partial, output)?;
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

/// Text content of a field value (tags removed), as used for sort fields
pub(crate) fn strip_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_tag = false;

    for c in value.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.trim().to_string()
}

/// Filesystem-safe version of a deck name
pub(crate) fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == ' ' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "deck".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("apkg".parse::<BackendKind>().unwrap(), BackendKind::Apkg);
        assert_eq!("CrowdAnki".parse::<BackendKind>().unwrap(), BackendKind::Crowdanki);
        assert!("csv".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Crowdanki.create().name(), "crowdanki");
    }

    #[test]
    fn test_media_dedup_by_file_name() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("x.mp3"), b"1").unwrap();
        std::fs::write(b.join("x.mp3"), b"1").unwrap();

        let mut deck = DeckContents::new("d");
        assert_eq!(deck.add_media(&a.join("x.mp3")).unwrap(), MediaId("x.mp3".to_string()));
        deck.add_media(&b.join("x.mp3")).unwrap();
        assert_eq!(deck.media.len(), 1);
        assert_eq!(deck.media["x.mp3"], a.join("x.mp3"));

        assert!(matches!(
            deck.add_media(&a.join("missing.mp3")),
            Err(BackendError::MediaNotFound(_))
        ));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<b>der</b> Hund"), "der Hund");
        assert_eq!(strip_html("[sound:x.mp3]"), "[sound:x.mp3]");
        assert_eq!(strip_html("a > b"), "a > b");
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("German::Basics"), "German__Basics");
        assert_eq!(safe_file_name("///"), "___");
        assert_eq!(safe_file_name("  "), "deck");
    }
}
