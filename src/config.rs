//! Configuration for vocadeck.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VOCADECK_HOME, VOCADECK_STORE)
//! 2. Config file (.vocadeck/config.yaml)
//! 3. Defaults (~/.vocadeck)
//!
//! Config file discovery:
//! - Searches current directory and parents for .vocadeck/config.yaml
//! - Paths in config file are relative to the .vocadeck/ directory
//!
//! API keys are never written in the config file; it names the environment
//! variable holding each key, and the value is read once here.

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backends::BackendKind;
use crate::core::retry::RetryPolicy;

/// Directory holding the config file, searched for from the cwd upwards
pub const CONFIG_DIR: &str = ".vocadeck";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub speech: SpeechSettings,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub translation: TranslationSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub enrichment: EnrichmentSettings,
    #[serde(default)]
    pub deck: DeckSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory: run journals live here (relative to .vocadeck/)
    pub home: Option<String>,
    /// Artifact store directory (relative to .vocadeck/)
    pub store: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechProvider {
    #[default]
    Google,
    Espeak,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub provider: SpeechProvider,
    /// Locale spoken on cards (e.g. "de-DE")
    pub language: String,
    pub voice: Option<String>,
    pub speaking_rate: f32,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Path to the espeak-ng binary
    pub binary: Option<String>,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            provider: SpeechProvider::Google,
            language: "de-DE".to_string(),
            voice: None,
            speaking_rate: 1.0,
            api_key_env: "GOOGLE_TTS_API_KEY".to_string(),
            binary: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageProvider {
    #[default]
    Pixabay,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub provider: ImageProvider,
    pub api_key_env: String,
    /// Language search queries are sent in
    pub query_language: String,
    /// Language image concepts are written in
    pub concept_language: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            provider: ImageProvider::Pixabay,
            api_key_env: "PIXABAY_API_KEY".to_string(),
            query_language: "en".to_string(),
            concept_language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationProvider {
    Libretranslate,
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub provider: TranslationProvider,
    pub url: String,
    pub api_key_env: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::None,
            url: "https://libretranslate.com".to_string(),
            api_key_env: "LIBRETRANSLATE_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    /// Entries enriched concurrently; 1 is fully sequential
    pub concurrency: usize,
    /// Case-fold payloads before fingerprinting
    pub fold_case: bool,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fold_case: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckSettings {
    pub name: String,
    pub backend: BackendKind,
    /// YAML note-mapping file
    pub mappings: Option<PathBuf>,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            name: "Vocabulary".to_string(),
            backend: BackendKind::Apkg,
            mappings: None,
        }
    }
}

/// API keys read from the environment at load time
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub speech_api_key: Option<String>,
    pub image_api_key: Option<String>,
    pub translation_api_key: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to vocadeck home (run journals)
    pub home: PathBuf,
    /// Absolute path to the artifact store
    pub store: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub speech: SpeechSettings,
    pub image: ImageSettings,
    pub translation: TranslationSettings,
    pub retry: RetryPolicy,
    pub enrichment: EnrichmentSettings,
    /// Deck settings; `mappings` is resolved to an absolute path
    pub deck: DeckSettings,
    pub credentials: Credentials,
}

/// Printable view of the resolved configuration (keys shown as set/unset)
#[derive(Debug, Serialize)]
pub struct ConfigSummary<'a> {
    pub home: &'a Path,
    pub store: &'a Path,
    pub config_file: Option<&'a Path>,
    pub speech: &'a SpeechSettings,
    pub image: &'a ImageSettings,
    pub translation: &'a TranslationSettings,
    pub retry: &'a RetryPolicy,
    pub enrichment: &'a EnrichmentSettings,
    pub deck: &'a DeckSettings,
    pub credentials: CredentialStatus,
}

#[derive(Debug, Serialize)]
pub struct CredentialStatus {
    pub speech_api_key: &'static str,
    pub image_api_key: &'static str,
    pub translation_api_key: &'static str,
}

fn set_or_unset(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "unset"
    }
}

impl ResolvedConfig {
    /// Directory holding per-run journals
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn summary(&self) -> ConfigSummary<'_> {
        ConfigSummary {
            home: &self.home,
            store: &self.store,
            config_file: self.config_file.as_deref(),
            speech: &self.speech,
            image: &self.image,
            translation: &self.translation,
            retry: &self.retry,
            enrichment: &self.enrichment,
            deck: &self.deck,
            credentials: CredentialStatus {
                speech_api_key: set_or_unset(&self.credentials.speech_api_key),
                image_api_key: set_or_unset(&self.credentials.image_api_key),
                translation_api_key: set_or_unset(&self.credentials.translation_api_key),
            },
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine file settings, environment and defaults
fn resolve_config<F>(config_path: Option<&Path>, file: ConfigFile, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config_dir = config_path.and_then(Path::parent);

    let home = match (env("VOCADECK_HOME"), &file.paths.home, config_dir) {
        (Some(env_home), _, _) => PathBuf::from(env_home),
        (None, Some(home), Some(dir)) => resolve_path(dir, home),
        _ => dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR),
    };

    let store = match (env("VOCADECK_STORE"), &file.paths.store, config_dir) {
        (Some(env_store), _, _) => PathBuf::from(env_store),
        (None, Some(store), Some(dir)) => resolve_path(dir, store),
        _ => home.join("store"),
    };

    let mut deck = file.deck;
    if let (Some(mappings), Some(dir)) = (&deck.mappings, config_dir) {
        deck.mappings = Some(resolve_path(dir, &mappings.to_string_lossy()));
    }

    let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());
    let credentials = Credentials {
        speech_api_key: non_empty(&file.speech.api_key_env),
        image_api_key: non_empty(&file.image.api_key_env),
        translation_api_key: non_empty(&file.translation.api_key_env),
    };

    Ok(ResolvedConfig {
        home,
        store,
        config_file: config_path.map(Path::to_path_buf),
        speech: file.speech,
        image: file.image,
        translation: file.translation,
        retry: file.retry,
        enrichment: file.enrichment,
        deck,
        credentials,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_path = find_config_file();

    let file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve_config(config_path.as_deref(), file, |name| std::env::var(name).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the runs directory ($VOCADECK_HOME/runs)
pub fn runs_dir() -> Result<PathBuf> {
    Ok(config()?.runs_dir())
}

/// Get the artifact store directory.
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.store.clone())
}
