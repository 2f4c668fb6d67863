//! vocadeck - Anki deck builder with generated media
//!
//! Turns vocabulary spreadsheets into flashcard decks. Each entry is
//! enriched with synthesized speech and a matching image, then packaged
//! through a replaceable backend.
//!
//! # Architecture
//!
//! Generated media is cached by content:
//! - Every generation request is fingerprinted into a `ContentKey`
//! - The artifact store maps keys to files and survives across runs
//! - Within a run each key is resolved at most once, however many
//!   entries share it
//! - A failed slot degrades its entry instead of aborting the run
//!
//! # Modules
//!
//! - `adapters`: Generation services (speech, image search, translation)
//! - `backends`: Deck packaging (apkg, CrowdAnki)
//! - `core`: Keys, artifact store, enricher, card builder, orchestrator
//! - `domain`: Data structures (entries, artifacts, cards, events, reports)
//! - `source`: CSV vocabulary loader
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Build a deck
//! vocadeck build words/*.csv -o german.apkg
//!
//! # Rebuild whenever a file changes
//! vocadeck watch words.csv -o german.apkg
//!
//! # Check the artifact cache
//! vocadeck store stats
//! ```

pub mod adapters;
pub mod backends;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod source;

// Re-export main types at crate root for convenience
pub use backends::{ApkgBackend, BackendKind, CrowdAnkiBackend, PackagingBackend};
pub use crate::core::{ArtifactStore, CardBuilder, ContentKey, Enricher, Orchestrator};
pub use domain::{EnrichedEntry, Event, EventType, RunReport, VocabularyEntry};
