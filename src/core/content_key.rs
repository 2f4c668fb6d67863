//! Content fingerprints used as artifact cache keys.
//!
//! A key is the SHA-256 of a length-framed encoding of
//! `(media kind, normalized payload, generation params)`. Two requests share
//! a key exactly when they would send identical generation requests, which
//! is why normalization only folds variation known not to change the output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::MediaKind;

/// Bumped whenever the framing below changes, so old artifacts stop matching
const KEY_VERSION: &str = "vocadeck-key/1";

/// Hex-encoded SHA-256 fingerprint of a generation request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Wrap an already-computed hex digest (e.g. read back from the index)
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value.as_str()).ok_or_else(|| format!("invalid content key: {:?}", value))
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation parameters that affect the produced artifact (voice, language, ...)
///
/// Backed by a `BTreeMap` so iteration order, and therefore the fingerprint,
/// is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(BTreeMap<String, String>);

impl GenerationParams {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Merge another parameter set in; values from `other` win
    pub fn merged(&self, other: &GenerationParams) -> GenerationParams {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(merged)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Which textual variation may be folded away before fingerprinting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    /// Lower-case the payload. Only safe when the generator is case-insensitive
    /// for the content in question (e.g. speech for most languages).
    #[serde(default)]
    pub fold_case: bool,
}

impl NormalizationRule {
    /// Trim and collapse internal whitespace runs; optionally fold case.
    ///
    /// Diacritics and punctuation are never touched: "schon" and "schön" are
    /// different words and must not share an artifact.
    pub fn normalize(&self, text: &str) -> String {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.fold_case {
            collapsed.to_lowercase()
        } else {
            collapsed
        }
    }
}

/// Derive the fingerprint for an already-normalized payload
pub fn derive(kind: MediaKind, normalized_payload: &str, params: &GenerationParams) -> ContentKey {
    let mut hasher = Sha256::new();
    frame(&mut hasher, KEY_VERSION);
    frame(&mut hasher, kind.as_str());
    frame(&mut hasher, normalized_payload);

    hasher.update((params.0.len() as u64).to_le_bytes());
    for (name, value) in params.iter() {
        frame(&mut hasher, name);
        frame(&mut hasher, value);
    }

    ContentKey(hex::encode(hasher.finalize()))
}

/// Length-prefix each component so ("ab", "c") and ("a", "bc") never collide
fn frame(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}
