//! Shared fixtures for integration tests: in-process fake adapters that
//! count how often they are called.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vocadeck::adapters::{
    GeneratedMedia, GenerationError, GenerationRequest, ImageFinder, SpeechSynthesizer,
};
use vocadeck::core::{ArtifactStore, GenerationParams};
use vocadeck::domain::{EntryKind, MediaRequest, VocabularyEntry};

/// Decides the adapter's answer from the request and the 1-based call number
pub type Script =
    Box<dyn Fn(&GenerationRequest, usize) -> Result<GeneratedMedia, GenerationError> + Send + Sync>;

/// A generator whose behavior is scripted per call
pub struct FakeGenerator {
    name: &'static str,
    extension: &'static str,
    calls: AtomicUsize,
    script: Option<Script>,
    delay: Duration,
}

impl FakeGenerator {
    fn new(name: &'static str, extension: &'static str) -> Self {
        Self {
            name,
            extension,
            calls: AtomicUsize::new(0),
            script: None,
            delay: Duration::ZERO,
        }
    }

    /// Succeeds for every request with bytes derived from the text
    pub fn speech() -> Self {
        Self::new("fake-speech", "mp3")
    }

    pub fn images() -> Self {
        Self::new("fake-images", "jpg")
    }

    pub fn with_script(
        mut self,
        script: impl Fn(&GenerationRequest, usize) -> Result<GeneratedMedia, GenerationError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.script = Some(Box::new(script));
        self
    }

    /// Sleep before answering, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn media_for(&self, request: &GenerationRequest) -> GeneratedMedia {
        GeneratedMedia::new(
            format!("{}:{}", self.name, request.text).into_bytes(),
            self.extension,
        )
    }

    async fn answer(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Some(script) => script(request, call),
            None => Ok(self.media_for(request)),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeGenerator {
    fn name(&self) -> &str {
        self.name
    }

    fn key_params(&self) -> GenerationParams {
        GenerationParams::new().with("provider", self.name)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        self.answer(request).await
    }
}

#[async_trait]
impl ImageFinder for FakeGenerator {
    fn name(&self) -> &str {
        self.name
    }

    fn key_params(&self) -> GenerationParams {
        GenerationParams::new().with("provider", self.name)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        self.answer(request).await
    }
}

/// Bytes a successful fake answer carries
pub fn ok_media(request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
    Ok(GeneratedMedia::new(
        format!("scripted:{}", request.text).into_bytes(),
        "mp3",
    ))
}

pub async fn open_store(dir: &TempDir) -> Arc<ArtifactStore> {
    Arc::new(ArtifactStore::open(dir.path().join("store")).await.unwrap())
}

/// A noun with word audio and an image slot
pub fn noun(id: &str, word: &str, translation: &str) -> VocabularyEntry {
    VocabularyEntry::new(id, EntryKind::Noun)
        .with_field("word", word)
        .with_field("translation", translation)
        .with_media(MediaRequest::audio(
            "word_audio",
            word,
            GenerationParams::new().with("language", "de-DE"),
        ))
        .with_media(MediaRequest::image(
            "image",
            translation,
            GenerationParams::new().with("language", "en"),
        ))
}

/// An entry with only a word audio slot
pub fn spoken(id: &str, word: &str) -> VocabularyEntry {
    VocabularyEntry::new(id, EntryKind::Phrase)
        .with_field("word", word)
        .with_field("translation", word)
        .with_media(MediaRequest::audio(
            "word_audio",
            word,
            GenerationParams::new().with("language", "de-DE"),
        ))
}
