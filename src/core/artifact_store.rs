//! Durable, content-addressed store for generated media.
//!
//! Layout:
//!
//! ```text
//! <root>/
//! ├── index.jsonl              # one ArtifactRecord per line, append-only
//! └── objects/
//!     └── <key[0:2]>/
//!         └── <key>.<ext>      # file named by fingerprint, never by source text
//! ```
//!
//! The index is loaded into memory on open so lookups never scan the
//! directory. The store is unbounded: there is no eviction, records are
//! only superseded when their file was deleted from outside.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs2::FileExt;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::content_key::ContentKey;
use crate::domain::{ArtifactRecord, MediaKind};

const INDEX_FILE: &str = "index.jsonl";
const OBJECTS_DIR: &str = "objects";

/// Errors that can occur in the artifact store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt index line {line} in {path}: {reason}")]
    CorruptIndex {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-kind totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub count: usize,
    pub bytes: u64,
}

/// Snapshot of what the store holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub by_kind: BTreeMap<MediaKind, KindStats>,
    pub corrupt_index_lines: usize,
}

impl StoreStats {
    pub fn total_count(&self) -> usize {
        self.by_kind.values().map(|s| s.count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.by_kind.values().map(|s| s.bytes).sum()
    }
}

/// Directory-backed artifact registry
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    index_path: PathBuf,
    records: RwLock<HashMap<ContentKey, ArtifactRecord>>,

    /// Serializes the check-rename-register section of `commit`
    commit_lock: Mutex<()>,

    corrupt_lines: usize,
}

impl ArtifactStore {
    /// Open (or create) a store rooted at `root` and load its index
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR)).await?;

        let index_path = root.join(INDEX_FILE);
        let (records, corrupt_lines) = Self::load_index(&index_path).await?;

        debug!(
            root = %root.display(),
            records = records.len(),
            corrupt_lines,
            "Opened artifact store"
        );

        Ok(Self {
            root,
            index_path,
            records: RwLock::new(records),
            commit_lock: Mutex::new(()),
            corrupt_lines,
        })
    }

    /// Read the index; unparseable lines are skipped and counted
    async fn load_index(
        index_path: &Path,
    ) -> Result<(HashMap<ContentKey, ArtifactRecord>, usize), StoreError> {
        let mut records = HashMap::new();
        let mut corrupt = 0;

        if !index_path.exists() {
            return Ok((records, corrupt));
        }

        let file = File::open(index_path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let parsed = serde_json::from_str::<ArtifactRecord>(&line)
                .map_err(|e| e.to_string())
                .and_then(|record| {
                    if is_object_path(&record.file_name) {
                        Ok(record)
                    } else {
                        Err(format!("file outside {}/: {}", OBJECTS_DIR, record.file_name))
                    }
                });

            match parsed {
                // Later lines supersede earlier ones for the same key
                Ok(record) => {
                    records.insert(record.key.clone(), record);
                }
                Err(reason) => {
                    let err = StoreError::CorruptIndex {
                        path: index_path.to_path_buf(),
                        line: line_no,
                        reason,
                    };
                    warn!(error = %err, "Skipping corrupt index line");
                    corrupt += 1;
                }
            }
        }

        Ok((records, corrupt))
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of index lines skipped on open
    pub fn corrupt_lines(&self) -> usize {
        self.corrupt_lines
    }

    /// Look up a committed artifact.
    ///
    /// In-memory map check plus a local stat; a record whose file has been
    /// removed from disk is reported as absent.
    pub fn lookup(&self, key: &ContentKey) -> Option<ArtifactRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(key)
            .filter(|record| self.path_of(record).is_file())
            .cloned()
    }

    /// Resolve a record to its file location
    pub fn path_of(&self, record: &ArtifactRecord) -> PathBuf {
        self.root.join(&record.file_name)
    }

    /// Write an artifact and register it.
    ///
    /// First writer wins: if the key is already committed (by an earlier run,
    /// or by a concurrent call that got there first) the existing record is
    /// returned and nothing is overwritten.
    pub async fn commit(
        &self,
        key: &ContentKey,
        bytes: &[u8],
        kind: MediaKind,
        extension: &str,
    ) -> Result<ArtifactRecord, StoreError> {
        if let Some(existing) = self.lookup(key) {
            return Ok(existing);
        }

        let shard = &key.as_str()[..2];
        let file_name = format!(
            "{}/{}/{}.{}",
            OBJECTS_DIR,
            shard,
            key,
            sanitize_extension(extension)
        );
        let final_path = self.root.join(&file_name);
        let shard_dir = self.root.join(OBJECTS_DIR).join(shard);

        fs::create_dir_all(&shard_dir)
            .await
            .map_err(|source| StoreError::Write {
                path: shard_dir.clone(),
                source,
            })?;

        // Write outside the lock so commits for different keys overlap
        let temp_path = shard_dir.join(format!(".{}.{}.tmp", key.short(), Uuid::new_v4()));
        fs::write(&temp_path, bytes)
            .await
            .map_err(|source| StoreError::Write {
                path: temp_path.clone(),
                source,
            })?;

        let _guard = self.commit_lock.lock().await;

        if let Some(existing) = self.lookup(key) {
            let _ = fs::remove_file(&temp_path).await;
            debug!(key = %key.short(), "Commit lost race, reusing existing artifact");
            return Ok(existing);
        }

        if let Err(source) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Write {
                path: final_path,
                source,
            });
        }

        let record = ArtifactRecord::new(key.clone(), file_name, kind, bytes.len() as u64);

        if let Err(source) = self.append_index(&record) {
            let _ = fs::remove_file(&final_path).await;
            return Err(StoreError::Write {
                path: self.index_path.clone(),
                source,
            });
        }

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), record.clone());

        debug!(key = %key.short(), size = record.size_bytes, "Committed artifact");
        Ok(record)
    }

    /// Append one record to the index under an exclusive file lock, so two
    /// processes sharing a store never interleave partial lines
    fn append_index(&self, record: &ArtifactRecord) -> std::io::Result<()> {
        let json = serde_json::to_string(record).map_err(std::io::Error::other)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)?;

        file.lock_exclusive()?;
        let result = file
            .write_all(format!("{}\n", json).as_bytes())
            .and_then(|_| file.flush());
        let _ = FileExt::unlock(&file);

        result
    }

    /// Number of registered records
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count and size per media kind
    pub fn stats(&self) -> StoreStats {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut stats = StoreStats {
            corrupt_index_lines: self.corrupt_lines,
            ..Default::default()
        };

        for record in records.values() {
            let entry = stats.by_kind.entry(record.kind).or_default();
            entry.count += 1;
            entry.bytes += record.size_bytes;
        }

        stats
    }

    /// Records whose file no longer exists on disk
    pub fn verify(&self) -> Vec<ArtifactRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut missing: Vec<ArtifactRecord> = records
            .values()
            .filter(|record| !self.path_of(record).is_file())
            .cloned()
            .collect();

        missing.sort_by(|a, b| a.key.cmp(&b.key));
        missing
    }
}

/// Index records may only point at files below `objects/`
fn is_object_path(file_name: &str) -> bool {
    match file_name.strip_prefix(OBJECTS_DIR).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains('\\')),
        None => false,
    }
}

/// Keep extensions short and filesystem-safe
fn sanitize_extension(extension: &str) -> String {
    let cleaned: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect::<String>()
        .to_ascii_lowercase();

    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}
