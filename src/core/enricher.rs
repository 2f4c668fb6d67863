//! Media enrichment: resolve every declared media slot of every entry.
//!
//! For each slot the enricher normalizes the payload, derives its content
//! key and then either reuses a stored artifact or calls the matching
//! adapter and commits the result. Within one `enrich` call each key is
//! resolved at most once, whether it succeeds or fails: concurrent slots
//! sharing a key wait on the same in-flight resolution instead of calling
//! the adapter again.
//!
//! A slot that cannot be resolved degrades to `Skipped` or `Failed`; the
//! entry itself always survives enrichment.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::artifact_store::ArtifactStore;
use super::content_key::{derive, ContentKey, GenerationParams, NormalizationRule};
use super::journal::RunJournal;
use super::retry::RetryPolicy;
use crate::adapters::{
    GeneratedMedia, GenerationError, GenerationRequest, ImageFinder, SpeechSynthesizer,
};
use crate::domain::{
    ArtifactRecord, EnrichedEntry, Event, EventType, FailureKind, MediaKind, MediaReference,
    MediaRequest, MediaStats, SkipReason, SlotOutcome, VocabularyEntry,
};

/// Result of enriching a batch of entries
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// One enriched entry per input entry, in input order
    pub entries: Vec<EnrichedEntry>,

    pub stats: MediaStats,
}

/// Adapter selected for a media kind
#[derive(Clone)]
enum Generator {
    Speech(Arc<dyn SpeechSynthesizer>),
    Image(Arc<dyn ImageFinder>),
}

impl Generator {
    fn name(&self) -> &str {
        match self {
            Generator::Speech(adapter) => adapter.name(),
            Generator::Image(adapter) => adapter.name(),
        }
    }

    fn key_params(&self) -> GenerationParams {
        match self {
            Generator::Speech(adapter) => adapter.key_params(),
            Generator::Image(adapter) => adapter.key_params(),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        match self {
            Generator::Speech(adapter) => adapter.generate(request).await,
            Generator::Image(adapter) => adapter.generate(request).await,
        }
    }
}

/// Memoized outcome for one content key
#[derive(Debug, Clone)]
struct Resolution {
    result: Result<MediaReference, FailureKind>,

    /// The artifact was produced by an adapter call (not found in the store)
    generated: bool,
}

impl Resolution {
    fn failed(failure: FailureKind) -> Self {
        Self {
            result: Err(failure),
            generated: false,
        }
    }
}

/// State scoped to a single `enrich` call
struct RunState<'a> {
    journal: Option<&'a RunJournal>,
    inflight: Mutex<HashMap<ContentKey, Arc<OnceCell<Resolution>>>>,
    speech_quota_exhausted: AtomicBool,
    image_quota_exhausted: AtomicBool,
    stats: Mutex<MediaStats>,
}

impl<'a> RunState<'a> {
    fn new(journal: Option<&'a RunJournal>) -> Self {
        Self {
            journal,
            inflight: Mutex::new(HashMap::new()),
            speech_quota_exhausted: AtomicBool::new(false),
            image_quota_exhausted: AtomicBool::new(false),
            stats: Mutex::new(MediaStats::default()),
        }
    }

    /// Shared cell for a key; the first caller to initialize it does the work
    fn cell_for(&self, key: &ContentKey) -> Arc<OnceCell<Resolution>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn quota_gate(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Audio => &self.speech_quota_exhausted,
            MediaKind::Image => &self.image_quota_exhausted,
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut MediaStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut stats);
    }

    fn into_stats(self) -> MediaStats {
        self.stats.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event_type: EventType, summary: String, build: impl FnOnce(Event) -> Event) {
        if let Some(journal) = self.journal {
            journal
                .record(build(Event::new(journal.run_id(), event_type, summary)))
                .await;
        }
    }
}

/// Resolves media slots against the artifact store and adapters
pub struct Enricher {
    store: Arc<ArtifactStore>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    images: Option<Arc<dyn ImageFinder>>,
    retry: RetryPolicy,
    normalization: NormalizationRule,
    concurrency: usize,
}

impl Enricher {
    /// Enricher with no adapters: every slot is skipped unless configured
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self {
            store,
            speech: None,
            images: None,
            retry: RetryPolicy::default(),
            normalization: NormalizationRule::default(),
            concurrency: 4,
        }
    }

    pub fn with_speech(mut self, adapter: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(adapter);
        self
    }

    pub fn with_images(mut self, adapter: Arc<dyn ImageFinder>) -> Self {
        self.images = Some(adapter);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_normalization(mut self, rule: NormalizationRule) -> Self {
        self.normalization = rule;
        self
    }

    /// Number of entries enriched concurrently (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    fn generator_for(&self, kind: MediaKind) -> Option<Generator> {
        match kind {
            MediaKind::Audio => self.speech.clone().map(Generator::Speech),
            MediaKind::Image => self.images.clone().map(Generator::Image),
        }
    }

    /// Content key a request would resolve to, if it would be resolved at all
    pub fn content_key_for(&self, request: &MediaRequest) -> Option<ContentKey> {
        let generator = self.generator_for(request.kind)?;
        let payload = self.normalization.normalize(&request.text);
        if payload.is_empty() {
            return None;
        }
        let params = generator.key_params().merged(&request.params);
        Some(derive(request.kind, &payload, &params))
    }

    /// Enrich a batch of entries.
    ///
    /// Output order equals input order regardless of concurrency.
    pub async fn enrich(&self, entries: Vec<VocabularyEntry>, journal: Option<&RunJournal>) -> Enrichment {
        let state = RunState::new(journal);
        let total = entries.len();

        let enriched: Vec<EnrichedEntry> = stream::iter(entries)
            .map(|entry| self.enrich_entry(&state, entry))
            .buffered(self.concurrency)
            .collect()
            .await;

        let stats = state.into_stats();
        info!(
            entries = total,
            cache_hits = stats.cache_hits,
            generated = stats.generated,
            skipped = stats.skipped,
            failed = stats.failed_total(),
            "Enrichment complete"
        );

        Enrichment {
            entries: enriched,
            stats,
        }
    }

    async fn enrich_entry(&self, state: &RunState<'_>, entry: VocabularyEntry) -> EnrichedEntry {
        // At concurrency 1 slots run one at a time too, so a quota error on
        // one slot gates the next slot of the same entry
        let outcomes = if self.concurrency <= 1 {
            let mut outcomes = Vec::with_capacity(entry.media.len());
            for request in &entry.media {
                outcomes.push(self.resolve_slot(state, &entry.id, request).await);
            }
            outcomes
        } else {
            futures::future::join_all(
                entry
                    .media
                    .iter()
                    .map(|request| self.resolve_slot(state, &entry.id, request)),
            )
            .await
        };

        let slots: BTreeMap<String, SlotOutcome> = entry
            .media
            .iter()
            .map(|request| request.slot.clone())
            .zip(outcomes)
            .collect();

        EnrichedEntry { entry, slots }
    }

    async fn resolve_slot(&self, state: &RunState<'_>, entry_id: &str, request: &MediaRequest) -> SlotOutcome {
        let Some(generator) = self.generator_for(request.kind) else {
            return self.skip(state, entry_id, request, SkipReason::NoAdapter).await;
        };

        let payload = self.normalization.normalize(&request.text);
        if payload.is_empty() {
            return self.skip(state, entry_id, request, SkipReason::EmptyPayload).await;
        }

        let params = generator.key_params().merged(&request.params);
        let key = derive(request.kind, &payload, &params);
        let cell = state.cell_for(&key);

        let mut produced_here = false;
        let resolution = cell
            .get_or_init(|| {
                produced_here = true;
                let generation = GenerationRequest {
                    kind: request.kind,
                    text: payload,
                    params,
                };
                self.produce(state, generator, key.clone(), generation)
            })
            .await
            .clone();

        match resolution.result {
            Ok(reference) => {
                let generated = produced_here && resolution.generated;
                debug!(entry = entry_id, slot = %request.slot, key = %key.short(), generated, "Slot resolved");
                state.update_stats(|stats| {
                    if generated {
                        stats.generated += 1;
                    } else {
                        stats.cache_hits += 1;
                    }
                });

                let (event_type, verb) = if generated {
                    (EventType::SlotGenerated, "generated")
                } else {
                    (EventType::SlotCacheHit, "reused")
                };
                state
                    .emit(
                        event_type,
                        format!("{} {} ({})", verb, request.slot, reference.media_name),
                        |e| e.for_slot(entry_id, &request.slot).with_key(key),
                    )
                    .await;

                SlotOutcome::Resolved { reference }
            }
            Err(failure) => {
                warn!(entry = entry_id, slot = %request.slot, key = %key.short(), %failure, "Slot failed");
                state.update_stats(|stats| stats.record_failure(failure));
                state
                    .emit(
                        EventType::SlotFailed,
                        format!("{} failed", request.slot),
                        |e| {
                            e.for_slot(entry_id, &request.slot)
                                .with_key(key)
                                .with_error(failure.to_string())
                        },
                    )
                    .await;

                SlotOutcome::Failed { failure }
            }
        }
    }

    async fn skip(
        &self,
        state: &RunState<'_>,
        entry_id: &str,
        request: &MediaRequest,
        reason: SkipReason,
    ) -> SlotOutcome {
        debug!(entry = entry_id, slot = %request.slot, ?reason, "Skipping media slot");
        state.update_stats(|stats| stats.skipped += 1);
        state
            .emit(
                EventType::SlotSkipped,
                format!("{} skipped ({:?})", request.slot, reason),
                |e| e.for_slot(entry_id, &request.slot),
            )
            .await;

        SlotOutcome::Skipped { reason }
    }

    /// Store lookup, then adapter call with bounded retry, then commit
    async fn produce(
        &self,
        state: &RunState<'_>,
        generator: Generator,
        key: ContentKey,
        request: GenerationRequest,
    ) -> Resolution {
        if let Some(record) = self.store.lookup(&key) {
            debug!(key = %key.short(), "Artifact store hit");
            return Resolution {
                result: Ok(self.reference(&record)),
                generated: false,
            };
        }

        let gate = state.quota_gate(request.kind);
        let mut attempt = 1;

        loop {
            if gate.load(Ordering::SeqCst) {
                return Resolution::failed(FailureKind::QuotaExceeded);
            }

            match generator.generate(&request).await {
                Ok(media) if media.bytes.is_empty() => {
                    warn!(adapter = generator.name(), key = %key.short(), "Adapter returned no bytes");
                    return Resolution::failed(FailureKind::PermanentRequest);
                }
                Ok(media) => {
                    return match self
                        .store
                        .commit(&key, &media.bytes, request.kind, &media.extension)
                        .await
                    {
                        Ok(record) => {
                            debug!(
                                adapter = generator.name(),
                                key = %key.short(),
                                attempts = attempt,
                                "Generated artifact"
                            );
                            Resolution {
                                result: Ok(self.reference(&record)),
                                generated: true,
                            }
                        }
                        Err(e) => {
                            warn!(key = %key.short(), error = %e, "Failed to store artifact");
                            Resolution::failed(FailureKind::StoreWrite)
                        }
                    };
                }
                Err(GenerationError::QuotaExceeded(detail)) => {
                    if !gate.swap(true, Ordering::SeqCst) {
                        error!(
                            adapter = generator.name(),
                            detail = %detail,
                            "Quota exhausted; remaining {} requests fail without calling the adapter",
                            request.kind
                        );
                    }
                    return Resolution::failed(FailureKind::QuotaExceeded);
                }
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        adapter = generator.name(),
                        key = %key.short(),
                        attempt,
                        ?delay,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        adapter = generator.name(),
                        key = %key.short(),
                        attempts = attempt,
                        error = %e,
                        "Media generation failed"
                    );
                    return Resolution::failed(e.failure_kind());
                }
            }
        }
    }

    fn reference(&self, record: &ArtifactRecord) -> MediaReference {
        MediaReference {
            key: record.key.clone(),
            kind: record.kind,
            media_name: record.media_name().to_string(),
            path: self.store.path_of(record),
        }
    }
}
