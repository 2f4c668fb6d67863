//! Command-line interface for vocadeck.
//!
//! Provides commands for building decks, rebuilding on change, inspecting
//! the artifact store and past runs, and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::{
    primary_language, EspeakAdapter, GoogleTtsAdapter, LibreTranslateAdapter, PixabayImageAdapter,
    Translator,
};
use crate::backends::BackendKind;
use crate::config::{self, paths, ImageProvider, ResolvedConfig, SpeechProvider, TranslationProvider};
use crate::core::{
    ArtifactStore, CardBuilder, CardMappings, Enricher, NormalizationRule, Orchestrator, RunJournal,
};
use crate::domain::{DeckOutcome, RunReport};
use crate::source::{self, SourceDefaults};

pub mod watch;

/// vocadeck - Build Anki decks with generated audio and images
#[derive(Parser, Debug)]
#[command(name = "vocadeck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a deck from vocabulary CSV files
    Build(BuildArgs),

    /// Build a deck, then rebuild whenever an input changes
    Watch(BuildArgs),

    /// Inspect the artifact store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Artifact counts and sizes per media kind
    Stats,

    /// List index records whose file is missing
    Verify,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// CSV files or glob patterns
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Package file to write
    #[arg(short, long)]
    pub output: PathBuf,

    /// Packaging backend (apkg or crowdanki)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Deck name shown in Anki
    #[arg(long)]
    pub deck_name: Option<String>,

    /// Entries enriched concurrently
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Do not write a run journal
    #[arg(long)]
    pub no_journal: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Build(args) => {
                let cfg = config::config()?;
                let report = build_once(cfg, &args).await?;
                if !report.card_failures.is_empty() {
                    anyhow::bail!("{} card(s) failed to build", report.card_failures.len());
                }
                Ok(())
            }
            Commands::Watch(args) => watch::watch(config::config()?, args).await,
            Commands::Store { command } => execute_store(command).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Config => show_config(),
        }
    }
}

/// Expand paths and glob patterns into a sorted, deduplicated file list
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        if pattern.contains(['*', '?', '[']) {
            let matches = glob::glob(pattern)
                .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
            let mut found: Vec<PathBuf> = matches.filter_map(|m| m.ok()).filter(|p| p.is_file()).collect();
            if found.is_empty() {
                warn!(pattern = %pattern, "Pattern matched no files");
            }
            found.sort();
            paths.extend(found);
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    paths.dedup();
    if paths.is_empty() {
        anyhow::bail!("No input files");
    }
    Ok(paths)
}

/// Row defaults taken from the speech and image settings
pub fn source_defaults(cfg: &ResolvedConfig) -> SourceDefaults {
    SourceDefaults {
        language: cfg.speech.language.clone(),
        voice: cfg.speech.voice.clone(),
        image_language: cfg.image.concept_language.clone(),
        id_prefix: None,
    }
}

/// Wire configured adapters into an enricher over `store`
pub fn build_enricher(cfg: &ResolvedConfig, store: Arc<ArtifactStore>, concurrency: usize) -> Enricher {
    let mut enricher = Enricher::new(store)
        .with_retry_policy(cfg.retry.clone())
        .with_normalization(NormalizationRule {
            fold_case: cfg.enrichment.fold_case,
        })
        .with_concurrency(concurrency);

    match cfg.speech.provider {
        SpeechProvider::Google => match &cfg.credentials.speech_api_key {
            Some(key) => {
                let mut adapter = GoogleTtsAdapter::new(key.clone(), cfg.speech.language.clone())
                    .with_speaking_rate(cfg.speech.speaking_rate);
                if let Some(voice) = &cfg.speech.voice {
                    adapter = adapter.with_voice(voice.clone());
                }
                enricher = enricher.with_speech(Arc::new(adapter));
            }
            None => warn!(
                env = %cfg.speech.api_key_env,
                "Speech API key not set, audio slots will be skipped"
            ),
        },
        SpeechProvider::Espeak => {
            let voice = cfg
                .speech
                .voice
                .clone()
                .unwrap_or_else(|| primary_language(&cfg.speech.language));
            let mut adapter = EspeakAdapter::new(voice)
                .with_words_per_minute((150.0 * cfg.speech.speaking_rate).round().max(80.0) as u32);
            if let Some(binary) = &cfg.speech.binary {
                adapter = adapter.with_binary_path(binary.clone());
            }
            enricher = enricher.with_speech(Arc::new(adapter));
        }
        SpeechProvider::None => {}
    }

    match cfg.image.provider {
        ImageProvider::Pixabay => match &cfg.credentials.image_api_key {
            Some(key) => {
                let mut adapter = PixabayImageAdapter::new(key.clone())
                    .with_query_language(cfg.image.query_language.clone());
                if let Some(translator) = build_translator(cfg) {
                    adapter = adapter.with_translator(translator);
                }
                enricher = enricher.with_images(Arc::new(adapter));
            }
            None => warn!(
                env = %cfg.image.api_key_env,
                "Image API key not set, image slots will be skipped"
            ),
        },
        ImageProvider::None => {}
    }

    enricher
}

fn build_translator(cfg: &ResolvedConfig) -> Option<Arc<dyn Translator>> {
    match cfg.translation.provider {
        TranslationProvider::Libretranslate => {
            let mut adapter = LibreTranslateAdapter::new(cfg.translation.url.clone());
            if let Some(key) = &cfg.credentials.translation_api_key {
                adapter = adapter.with_api_key(key.clone());
            }
            Some(Arc::new(adapter))
        }
        TranslationProvider::None => None,
    }
}

/// Assemble an orchestrator for one build
pub async fn prepare_orchestrator(cfg: &ResolvedConfig, args: &BuildArgs) -> Result<Orchestrator> {
    let store = ArtifactStore::open(&cfg.store)
        .await
        .with_context(|| format!("Failed to open artifact store: {}", cfg.store.display()))?;
    if store.corrupt_lines() > 0 {
        warn!(lines = store.corrupt_lines(), "Artifact index has corrupt lines");
    }

    let mappings = CardMappings::load(cfg.deck.mappings.as_ref())?;
    let concurrency = args.concurrency.unwrap_or(cfg.enrichment.concurrency);
    let enricher = build_enricher(cfg, Arc::new(store), concurrency);

    let mut orchestrator = Orchestrator::new(enricher, CardBuilder::new(mappings));
    if !args.no_journal {
        orchestrator = orchestrator.with_journal_dir(cfg.runs_dir());
    }
    Ok(orchestrator)
}

/// Load inputs, run the pipeline once and print the report
pub async fn build_once(cfg: &ResolvedConfig, args: &BuildArgs) -> Result<RunReport> {
    let inputs = expand_inputs(&args.inputs)?;
    let entries = source::load_inputs(&inputs, &source_defaults(cfg))?;
    info!(files = inputs.len(), entries = entries.len(), "Loaded vocabulary");

    let orchestrator = prepare_orchestrator(cfg, args).await?;
    let backend_kind = args.backend.unwrap_or(cfg.deck.backend);
    let mut backend = backend_kind.create();
    let deck_name = args.deck_name.as_deref().unwrap_or(&cfg.deck.name);

    ensure_parent(&args.output)?;

    match orchestrator
        .run(entries, backend.as_mut(), deck_name, &args.output)
        .await
    {
        Ok(report) => {
            println!("{}", report.summary());
            Ok(report)
        }
        Err(e) => {
            println!("{}", e.report.summary());
            Err(e.into())
        }
    }
}

fn ensure_parent(output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    Ok(())
}

async fn execute_store(command: StoreCommands) -> Result<()> {
    let root = paths::artifact_store()?;
    let store = ArtifactStore::open(&root)
        .await
        .with_context(|| format!("Failed to open artifact store: {}", root.display()))?;

    match command {
        StoreCommands::Stats => {
            let stats = store.stats();
            println!("Store: {}", root.display());
            println!();
            println!("{:<10} {:>8} {:>14}", "KIND", "COUNT", "BYTES");
            println!("{}", "-".repeat(34));
            for (kind, kind_stats) in &stats.by_kind {
                println!("{:<10} {:>8} {:>14}", kind.to_string(), kind_stats.count, kind_stats.bytes);
            }
            println!("{:<10} {:>8} {:>14}", "total", stats.total_count(), stats.total_bytes());
            if stats.corrupt_index_lines > 0 {
                println!();
                println!("Corrupt index lines skipped: {}", stats.corrupt_index_lines);
            }
            Ok(())
        }
        StoreCommands::Verify => {
            let missing = store.verify();
            if missing.is_empty() {
                println!("All {} artifacts present", store.len());
                return Ok(());
            }
            for record in &missing {
                println!("missing  {}  {}", record.key.short(), store.path_of(record).display());
            }
            anyhow::bail!("{} artifact(s) missing from {}", missing.len(), root.display())
        }
    }
}

async fn list_runs(limit: usize) -> Result<()> {
    let runs_dir = paths::runs()?;
    let mut runs = RunJournal::list_runs(&runs_dir).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    // Newest first
    runs.reverse();

    println!("{:<38} {:<22} {:>7} {:<10}", "RUN ID", "STARTED", "CARDS", "DECK");
    println!("{}", "-".repeat(80));

    let mut shown = 0;
    for run_id in runs {
        if shown == limit {
            break;
        }

        match RunJournal::read_report(&runs_dir.join(run_id.to_string())).await {
            Some(report) => {
                let deck = match &report.deck {
                    Some(DeckOutcome::Finalized { .. }) => "written",
                    Some(DeckOutcome::Failed { .. }) => "failed",
                    None => "-",
                };
                println!(
                    "{:<38} {:<22} {:>7} {:<10}",
                    run_id,
                    report.started_at.format("%Y-%m-%d %H:%M:%S"),
                    report.cards_built,
                    deck
                );
            }
            None => println!("{:<38} {:<22} {:>7} {:<10}", run_id, "-", "-", "incomplete"),
        }
        shown += 1;
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;
    let rendered = serde_yaml::to_string(&cfg.summary()).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
