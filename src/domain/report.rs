//! Per-run report consumed by the caller for logging and exit codes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{EnrichedEntry, FailureKind, MediaCompleteness};

/// Slot-level counters from the enrichment stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    /// Slots served from the artifact store or an earlier slot in this run
    pub cache_hits: usize,

    /// Slots whose artifact was generated and committed in this run
    pub generated: usize,

    /// Slots intentionally left empty
    pub skipped: usize,

    /// Failed slots grouped by failure kind
    pub failed: BTreeMap<FailureKind, usize>,
}

impl MediaStats {
    pub fn record_failure(&mut self, kind: FailureKind) {
        *self.failed.entry(kind).or_insert(0) += 1;
    }

    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    pub fn total_slots(&self) -> usize {
        self.cache_hits + self.generated + self.skipped + self.failed_total()
    }
}

/// A card that could not be built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFailure {
    pub entry_id: String,
    pub reason: String,
}

/// Terminal outcome of the packaging stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeckOutcome {
    Finalized {
        path: PathBuf,
        cards: usize,
        media_files: usize,
    },
    Failed {
        error: String,
    },
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of entries processed
    pub entries: usize,

    pub media: MediaStats,

    /// Entries whose declared slots all resolved
    pub entries_complete: usize,

    /// Entries with some (not all) slots absent
    pub entries_partial: usize,

    /// Entries with declared slots and none resolved
    pub entries_missing_media: usize,

    pub cards_built: usize,
    pub card_failures: Vec<CardFailure>,

    /// Packaging outcome; `None` until the backend stage runs
    pub deck: Option<DeckOutcome>,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            completed_at: None,
            entries: 0,
            media: MediaStats::default(),
            entries_complete: 0,
            entries_partial: 0,
            entries_missing_media: 0,
            cards_built: 0,
            card_failures: Vec::new(),
            deck: None,
        }
    }

    /// Tally completeness for a set of enriched entries
    pub fn record_entries(&mut self, enriched: &[EnrichedEntry]) {
        self.entries += enriched.len();
        for entry in enriched {
            match entry.completeness() {
                MediaCompleteness::Complete => self.entries_complete += 1,
                MediaCompleteness::Partial => self.entries_partial += 1,
                MediaCompleteness::Missing => self.entries_missing_media += 1,
            }
        }
    }

    /// The deck was written and every card built
    pub fn is_clean(&self) -> bool {
        self.card_failures.is_empty() && matches!(self.deck, Some(DeckOutcome::Finalized { .. }))
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Run {}", self.run_id),
            format!(
                "  Entries: {} ({} complete media, {} partial, {} without media)",
                self.entries, self.entries_complete, self.entries_partial, self.entries_missing_media
            ),
            format!(
                "  Media: {} cache hits, {} generated, {} skipped, {} failed",
                self.media.cache_hits,
                self.media.generated,
                self.media.skipped,
                self.media.failed_total()
            ),
        ];

        for (kind, count) in &self.media.failed {
            lines.push(format!("    {}: {}", kind, count));
        }

        lines.push(format!(
            "  Cards: {} built, {} failed",
            self.cards_built,
            self.card_failures.len()
        ));
        for failure in &self.card_failures {
            lines.push(format!("    {}: {}", failure.entry_id, failure.reason));
        }

        match &self.deck {
            Some(DeckOutcome::Finalized {
                path,
                cards,
                media_files,
            }) => lines.push(format!(
                "  Deck: {} ({} cards, {} media files)",
                path.display(),
                cards,
                media_files
            )),
            Some(DeckOutcome::Failed { error }) => lines.push(format!("  Deck: FAILED - {}", error)),
            None => lines.push("  Deck: not written".to_string()),
        }

        lines.join("\n")
    }
}
