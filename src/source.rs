//! CSV vocabulary loader.
//!
//! Expected header: `id,kind,word,translation[,example][,image][,tags]`.
//! Any other column is carried through as an entry field, so custom note
//! mappings can reference it.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::content_key::GenerationParams;
use crate::domain::{EntryKind, MediaRequest, VocabularyEntry};

/// Columns with a fixed meaning; everything else becomes a plain field
const RESERVED_COLUMNS: &[&str] = &["id", "kind", "tags"];

/// Generation parameters applied to every row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDefaults {
    /// Spoken language of `word` and `example` (e.g. "de-DE")
    pub language: String,

    pub voice: Option<String>,

    /// Language image concepts are written in (e.g. "en")
    pub image_language: String,

    /// Prepended to row-number ids so several files can share one deck
    pub id_prefix: Option<String>,
}

impl Default for SourceDefaults {
    fn default() -> Self {
        Self {
            language: "de-DE".to_string(),
            voice: None,
            image_language: "en".to_string(),
            id_prefix: None,
        }
    }
}

impl SourceDefaults {
    fn audio_params(&self) -> GenerationParams {
        let mut params = GenerationParams::new().with("language", &self.language);
        if let Some(voice) = &self.voice {
            params.insert("voice", voice);
        }
        params
    }

    fn image_params(&self) -> GenerationParams {
        GenerationParams::new().with("language", &self.image_language)
    }
}

/// Load entries from one CSV file
pub fn load_csv(path: &Path, defaults: &SourceDefaults) -> Result<Vec<VocabularyEntry>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open vocabulary file: {}", path.display()))?;

    let entries = parse_csv(file, defaults)
        .with_context(|| format!("Failed to parse vocabulary file: {}", path.display()))?;

    debug!(path = %path.display(), entries = entries.len(), "Loaded vocabulary");
    Ok(entries)
}

/// Load several files into one entry list.
///
/// Row-number ids are prefixed with the file stem when more than one file
/// is given; later duplicates of an explicit id are dropped with a warning.
pub fn load_inputs(paths: &[PathBuf], defaults: &SourceDefaults) -> Result<Vec<VocabularyEntry>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        let mut file_defaults = defaults.clone();
        if paths.len() > 1 && file_defaults.id_prefix.is_none() {
            file_defaults.id_prefix = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string());
        }

        for entry in load_csv(path, &file_defaults)? {
            if seen.insert(entry.id.clone()) {
                entries.push(entry);
            } else {
                warn!(id = %entry.id, path = %path.display(), "Duplicate entry id, skipping row");
            }
        }
    }

    Ok(entries)
}

/// Parse CSV content into entries
pub fn parse_csv<R: Read>(reader: R, defaults: &SourceDefaults) -> Result<Vec<VocabularyEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    if !headers.iter().any(|h| h == "word") {
        anyhow::bail!("CSV header must contain a 'word' column");
    }

    let mut entries = Vec::new();

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;
        let record = record.with_context(|| format!("Malformed CSV row {}", row))?;

        let column = |name: &str| column_value(&headers, &record, name);

        let id = match column("id") {
            Some(id) => id.to_string(),
            None => match &defaults.id_prefix {
                Some(prefix) => format!("{}-{}", prefix, row),
                None => row.to_string(),
            },
        };

        let kind = column("kind")
            .map(|k| {
                k.parse::<EntryKind>().unwrap_or_else(|_| {
                    debug!(row, kind = k, "Unknown entry kind, using 'other'");
                    EntryKind::Other
                })
            })
            .unwrap_or(EntryKind::Other);

        let mut entry = VocabularyEntry::new(id, kind);

        for (name, value) in headers.iter().zip(record.iter()) {
            if !RESERVED_COLUMNS.contains(&name.as_str()) && !value.is_empty() {
                entry.fields.insert(name.clone(), value.to_string());
            }
        }

        if let Some(tags) = column("tags") {
            entry.tags = tags
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(word) = column("word") {
            entry
                .media
                .push(MediaRequest::audio("word_audio", word, defaults.audio_params()));
        }
        if let Some(example) = column("example") {
            entry
                .media
                .push(MediaRequest::audio("example_audio", example, defaults.audio_params()));
        }
        if let Some(concept) = column("image").or_else(|| column("translation")) {
            entry
                .media
                .push(MediaRequest::image("image", concept, defaults.image_params()));
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// Non-empty value of a named column
fn column_value<'r>(headers: &[String], record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|i| record.get(i))
        .filter(|v| !v.is_empty())
}
