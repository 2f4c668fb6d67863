//! Generated media artifacts tracked by the artifact store.
//!
//! An artifact is created on first successful generation and never mutated
//! afterwards; the store only ever reads or supersedes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::content_key::ContentKey;

/// A persisted record of a generated media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Fingerprint the artifact was generated for
    pub key: ContentKey,

    /// File path relative to the store root (e.g. `objects/ab/ab12...mp3`)
    pub file_name: String,

    /// Kind of media
    pub kind: MediaKind,

    /// Size in bytes
    pub size_bytes: u64,

    /// When the artifact was committed
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new record stamped with the current time
    pub fn new(key: ContentKey, file_name: String, kind: MediaKind, size_bytes: u64) -> Self {
        Self {
            key,
            file_name,
            kind,
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Bare file name (last path component), as used inside deck packages
    pub fn media_name(&self) -> &str {
        self.file_name
            .rsplit('/')
            .next()
            .unwrap_or(self.file_name.as_str())
    }
}

/// Kinds of generatable media
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Spoken audio
    Audio,

    /// Illustrative image
    Image,
}

impl MediaKind {
    /// Stable tag used in fingerprints and index lines
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "audio" | "sound" | "speech" => Ok(MediaKind::Audio),
            "image" | "picture" | "img" => Ok(MediaKind::Image),
            _ => anyhow::bail!("Unknown media kind: {}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_key::{derive, GenerationParams};

    #[test]
    fn test_media_name_strips_directories() {
        let key = derive(MediaKind::Audio, "hallo", &GenerationParams::new());
        let record = ArtifactRecord::new(
            key.clone(),
            format!("objects/{}/{}.mp3", &key.as_str()[..2], key),
            MediaKind::Audio,
            42,
        );

        assert_eq!(record.media_name(), format!("{}.mp3", key));
    }

    #[test]
    fn test_record_serialization() {
        let key = derive(MediaKind::Image, "tree", &GenerationParams::new());
        let record = ArtifactRecord::new(key, "objects/aa/x.jpg".to_string(), MediaKind::Image, 7);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"image\""));

        let parsed: ArtifactRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_media_kind_from_str() {
        assert_eq!("audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert_eq!("Image".parse::<MediaKind>().unwrap(), MediaKind::Image);
        assert!("video".parse::<MediaKind>().is_err());
    }
}
