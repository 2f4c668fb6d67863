//! Core pipeline logic.
//!
//! This module contains:
//! - ContentKey: Fingerprints of generation requests
//! - ArtifactStore: Content-keyed media cache
//! - Enricher: Resolves media slots through the store and adapters
//! - CardBuilder: Maps enriched entries to note fields
//! - RunJournal: Append-only per-run event log
//! - Orchestrator: Main execution engine

pub mod artifact_store;
pub mod card_builder;
pub mod content_key;
pub mod enricher;
pub mod journal;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use artifact_store::{ArtifactStore, KindStats, StoreError, StoreStats};
pub use card_builder::{CardBuildError, CardBuilder, CardMappings, FieldMapping, NoteMapping};
pub use content_key::{ContentKey, GenerationParams, NormalizationRule};
pub use enricher::{Enricher, Enrichment};
pub use journal::RunJournal;
pub use orchestrator::{Orchestrator, RunError};
pub use retry::RetryPolicy;
