//! Run orchestration: enrich, build cards, package.
//!
//! A run never aborts on a single bad slot or card; those are recorded in
//! the report. Only a packaging failure fails the run, and even then the
//! partial report is returned inside the error.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::card_builder::CardBuilder;
use super::enricher::Enricher;
use super::journal::RunJournal;
use crate::backends::{BackendError, DeckHandle, PackagingBackend};
use crate::domain::{CardFailure, DeckOutcome, Event, EventType, RunReport, VocabularyEntry};

/// A run whose deck could not be written
#[derive(Debug, Error)]
#[error("run {} failed while packaging: {source}", .report.run_id)]
pub struct RunError {
    #[source]
    pub source: BackendError,

    /// Everything that happened up to the failure
    pub report: Box<RunReport>,
}

/// Drives one pipeline run end to end
pub struct Orchestrator {
    enricher: Enricher,
    cards: CardBuilder,

    /// Where run journals go; `None` disables journaling
    runs_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(enricher: Enricher, cards: CardBuilder) -> Self {
        Self {
            enricher,
            cards,
            runs_dir: None,
        }
    }

    /// Journal every run under `runs_dir/<run_id>/`
    pub fn with_journal_dir(mut self, runs_dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = Some(runs_dir.into());
        self
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    /// Enrich `entries`, build their cards and write one deck to `output`
    #[instrument(skip(self, entries, backend), fields(deck = %deck_name, backend = backend.name()))]
    pub async fn run(
        &self,
        entries: Vec<VocabularyEntry>,
        backend: &mut dyn PackagingBackend,
        deck_name: &str,
        output: &Path,
    ) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let mut report = RunReport::new(run_id);
        info!(%run_id, entries = entries.len(), "Starting run");

        let journal = self.open_journal(run_id).await;
        emit(
            journal.as_ref(),
            EventType::RunStarted,
            format!("{} entries into deck '{}'", entries.len(), deck_name),
            |e| e,
        )
        .await;

        let enrichment = self.enricher.enrich(entries, journal.as_ref()).await;
        report.media = enrichment.stats;
        report.record_entries(&enrichment.entries);

        let deck = backend.create_deck(deck_name);

        for enriched in &enrichment.entries {
            let entry_id = enriched.entry.id.as_str();

            let card = match self.cards.build(enriched) {
                Ok(card) => card,
                Err(e) => {
                    warn!(entry = entry_id, error = %e, "Card build failed");
                    emit(journal.as_ref(), EventType::CardFailed, "card not built".to_string(), |ev| {
                        ev.for_entry(entry_id).with_error(e.to_string())
                    })
                    .await;
                    report.card_failures.push(CardFailure {
                        entry_id: entry_id.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = add_to_deck(backend, deck, card) {
                return Err(self.fail(journal.as_ref(), report, e).await);
            }

            report.cards_built += 1;
            emit(journal.as_ref(), EventType::CardBuilt, "card built".to_string(), |ev| {
                ev.for_entry(entry_id)
            })
            .await;
        }

        let summary = match backend.finalize(deck, output) {
            Ok(summary) => summary,
            Err(e) => return Err(self.fail(journal.as_ref(), report, e).await),
        };

        emit(
            journal.as_ref(),
            EventType::DeckFinalized,
            format!(
                "{} cards, {} media files -> {}",
                summary.cards,
                summary.media_files,
                summary.path.display()
            ),
            |e| e,
        )
        .await;

        report.deck = Some(DeckOutcome::Finalized {
            path: summary.path,
            cards: summary.cards,
            media_files: summary.media_files,
        });
        report.completed_at = Some(chrono::Utc::now());

        finish_journal(journal.as_ref(), &report).await;
        info!(%run_id, cards = report.cards_built, "Run complete");

        Ok(report)
    }

    async fn open_journal(&self, run_id: Uuid) -> Option<RunJournal> {
        let runs_dir = self.runs_dir.as_ref()?;
        match RunJournal::open(runs_dir, run_id).await {
            Ok(journal) => Some(journal),
            Err(e) => {
                warn!(%run_id, error = %e, "Run journal unavailable, continuing without it");
                None
            }
        }
    }

    async fn fail(&self, journal: Option<&RunJournal>, mut report: RunReport, error: BackendError) -> RunError {
        warn!(run_id = %report.run_id, error = %error, "Packaging failed");

        emit(journal, EventType::RunFailed, "packaging failed".to_string(), |e| {
            e.with_error(error.to_string())
        })
        .await;

        report.deck = Some(DeckOutcome::Failed {
            error: error.to_string(),
        });
        report.completed_at = Some(chrono::Utc::now());
        finish_journal(journal, &report).await;

        RunError {
            source: error,
            report: Box::new(report),
        }
    }
}

/// Register a card's media, then the card itself
fn add_to_deck(
    backend: &mut dyn PackagingBackend,
    deck: DeckHandle,
    card: crate::domain::CardFieldSet,
) -> Result<(), BackendError> {
    for path in &card.media {
        backend.add_media_file(deck, path)?;
    }
    backend.add_card(deck, card)?;
    Ok(())
}

async fn emit(
    journal: Option<&RunJournal>,
    event_type: EventType,
    summary: String,
    build: impl FnOnce(Event) -> Event,
) {
    if let Some(journal) = journal {
        journal
            .record(build(Event::new(journal.run_id(), event_type, summary)))
            .await;
    }
}

async fn finish_journal(journal: Option<&RunJournal>, report: &RunReport) {
    if let Some(journal) = journal {
        if let Err(e) = journal.write_report(report).await {
            warn!(run_id = %report.run_id, error = %e, "Failed to write run report");
        }
    }
}
