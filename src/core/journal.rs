//! Append-only run journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) under
//! `<runs_dir>/<run_id>/events.jsonl`, next to the final `report.json`.
//! The journal is diagnostic: a failed append is logged, never fatal.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Event, RunReport};

/// File-based journal for one run
pub struct RunJournal {
    run_id: Uuid,

    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Serializes appends from concurrent slot resolutions
    write_lock: Mutex<()>,
}

impl RunJournal {
    /// Create or open the journal for a run under `runs_dir`
    pub async fn open(runs_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = runs_dir.join(run_id.to_string());

        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_id,
            run_dir,
            events_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;

        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Append, logging instead of failing
    pub async fn record(&self, event: Event) {
        if let Err(e) = self.append(&event).await {
            warn!(run_id = %self.run_id, error = %e, "Failed to append journal event");
        }
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Write the final report next to the events
    pub async fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let path = self.run_dir.join("report.json");
        let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;

        Ok(path)
    }

    /// List all run IDs under `runs_dir`, oldest first.
    ///
    /// Runs are ordered by the `started_at` of their report; a run without a
    /// readable report falls back to its directory's modification time.
    pub async fn list_runs(runs_dir: &Path) -> Result<Vec<Uuid>> {
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(runs_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(run_id) = entry.file_name().to_str().and_then(|n| Uuid::parse_str(n).ok()) else {
                continue;
            };

            let started_at = match Self::read_report(&entry.path()).await {
                Some(report) => report.started_at,
                None => entry
                    .metadata()
                    .await?
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            };
            runs.push((started_at, run_id));
        }

        runs.sort();
        Ok(runs.into_iter().map(|(_, run_id)| run_id).collect())
    }

    /// Report of a finished run, if it has one
    pub async fn read_report(run_dir: &Path) -> Option<RunReport> {
        let content = fs::read_to_string(run_dir.join("report.json")).await.ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_test_journal() -> (RunJournal, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let journal = RunJournal::open(temp_dir.path(), Uuid::new_v4()).await.unwrap();
        (journal, temp_dir)
    }

    #[tokio::test]
    async fn test_append_and_replay() {
        let (journal, _temp) = create_test_journal().await;
        let run_id = journal.run_id();

        journal
            .append(&Event::new(run_id, EventType::RunStarted, "3 entries"))
            .await
            .unwrap();
        journal
            .record(Event::new(run_id, EventType::CardBuilt, "card").for_entry("1"))
            .await;

        let events = journal.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].entry_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_produce_whole_lines() {
        let (journal, _temp) = create_test_journal().await;
        let journal = Arc::new(journal);

        let mut handles = Vec::new();
        for i in 0..20 {
            let journal = journal.clone();
            handles.push(tokio::spawn(async move {
                let event = Event::new(journal.run_id(), EventType::SlotGenerated, format!("slot {}", i));
                journal.append(&event).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(journal.replay().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_write_report_and_list_runs() {
        let (journal, temp) = create_test_journal().await;
        let report = RunReport::new(journal.run_id());

        let path = journal.write_report(&report).await.unwrap();
        let parsed: RunReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.run_id, journal.run_id());

        let runs = RunJournal::list_runs(temp.path()).await.unwrap();
        assert_eq!(runs, vec![journal.run_id()]);
    }

    #[tokio::test]
    async fn test_list_runs_orders_by_start_time() {
        let temp = TempDir::new().unwrap();
        let older = Uuid::from_u128(u128::MAX);
        let newer = Uuid::from_u128(1);

        for (run_id, minutes_ago) in [(older, 30), (newer, 5)] {
            let journal = RunJournal::open(temp.path(), run_id).await.unwrap();
            let mut report = RunReport::new(run_id);
            report.started_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
            journal.write_report(&report).await.unwrap();
        }

        // No report yet: ordered by directory mtime, so it comes last
        let unfinished = Uuid::from_u128(2);
        RunJournal::open(temp.path(), unfinished).await.unwrap();

        let runs = RunJournal::list_runs(temp.path()).await.unwrap();
        assert_eq!(runs, vec![older, newer, unfinished]);
    }
}
