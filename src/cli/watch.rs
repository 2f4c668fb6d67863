//! Rebuild-on-change mode.
//!
//! Watches the directories holding the input files (and the note mapping
//! file, if configured) and rebuilds the deck after edits settle. Media
//! already in the artifact store is reused, so rebuilds only generate what
//! the edit introduced.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{build_once, expand_inputs, BuildArgs};
use crate::config::ResolvedConfig;

/// Quiet period before a burst of file events triggers a rebuild
const DEBOUNCE: Duration = Duration::from_millis(750);

/// Build once, then rebuild on every settled change until Ctrl-C
pub async fn watch(cfg: &ResolvedConfig, args: BuildArgs) -> Result<()> {
    rebuild(cfg, &args).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })?;

    let dirs = watch_dirs(&expand_inputs(&args.inputs)?, cfg.deck.mappings.as_deref());
    for dir in &dirs {
        debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)?;
        info!("Watching {}", dir.display());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Watcher stopping...");
                break;
            }
            received = rx.recv() => match received {
                Some(Ok(events)) => {
                    let changed: Vec<&Path> = events
                        .iter()
                        .map(|event| event.path.as_path())
                        .filter(|path| is_relevant(path, &args.output, cfg.deck.mappings.as_deref()))
                        .collect();

                    if changed.is_empty() {
                        continue;
                    }
                    for path in &changed {
                        debug!(path = %path.display(), "Input changed");
                    }
                    rebuild(cfg, &args).await;
                }
                Some(Err(e)) => warn!("Watcher error: {:?}", e),
                None => {
                    error!("Watcher channel disconnected");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// One rebuild; failures are logged and the watcher keeps running
async fn rebuild(cfg: &ResolvedConfig, args: &BuildArgs) {
    match build_once(cfg, args).await {
        Ok(report) if report.is_clean() => info!(cards = report.cards_built, "Deck rebuilt"),
        Ok(report) => warn!(
            cards = report.cards_built,
            failed = report.card_failures.len(),
            "Deck rebuilt with card failures"
        ),
        Err(e) => error!("Rebuild failed: {:#}", e),
    }
}

/// Directories to watch: parents of every input plus the mapping file's
fn watch_dirs(inputs: &[PathBuf], mappings: Option<&Path>) -> BTreeSet<PathBuf> {
    inputs
        .iter()
        .map(PathBuf::as_path)
        .chain(mappings)
        .map(|path| match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        })
        .collect()
}

/// CSV edits and mapping edits trigger a rebuild; the deck we write does not
fn is_relevant(path: &Path, output: &Path, mappings: Option<&Path>) -> bool {
    if path.file_name() == output.file_name() {
        return false;
    }
    if mappings.is_some_and(|m| m.file_name() == path.file_name()) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_dirs_dedupes_parents() {
        let inputs = vec![
            PathBuf::from("/data/a.csv"),
            PathBuf::from("/data/b.csv"),
            PathBuf::from("words.csv"),
        ];
        let dirs = watch_dirs(&inputs, Some(Path::new("/cfg/mappings.yaml")));

        let expected: BTreeSet<PathBuf> = ["/data", ".", "/cfg"].iter().map(PathBuf::from).collect();
        assert_eq!(dirs, expected);
    }

    #[test]
    fn test_relevant_paths() {
        let output = Path::new("/out/deck.apkg");
        let mappings = Some(Path::new("/cfg/mappings.yaml"));

        assert!(is_relevant(Path::new("/data/a.CSV"), output, mappings));
        assert!(is_relevant(Path::new("/cfg/mappings.yaml"), output, mappings));
        assert!(!is_relevant(Path::new("/out/deck.apkg"), output, mappings));
        assert!(!is_relevant(Path::new("/data/notes.txt"), output, None));
    }
}
