//! Text-to-speech adapters.
//!
//! `GoogleTtsAdapter` talks to the Cloud Text-to-Speech REST API.
//! `EspeakAdapter` runs a local `espeak-ng` binary and needs no account.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{classify_status, GeneratedMedia, GenerationError, GenerationRequest, SpeechSynthesizer};
use crate::core::content_key::GenerationParams;

const GOOGLE_TTS_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Google Cloud Text-to-Speech
pub struct GoogleTtsAdapter {
    api_key: String,
    endpoint: String,
    language: String,
    voice: Option<String>,
    speaking_rate: f32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: Option<String>,
}

impl GoogleTtsAdapter {
    pub fn new(api_key: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: GOOGLE_TTS_URL.to_string(),
            language: language.into(),
            voice: None,
            speaking_rate: 1.0,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speaking_rate(mut self, rate: f32) -> Self {
        self.speaking_rate = rate;
        self
    }

    /// Point at a different endpoint (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let language = request.params.get("language").unwrap_or(self.language.as_str());

        let mut voice = serde_json::json!({ "languageCode": language });
        if let Some(name) = request.params.get("voice").or(self.voice.as_deref()) {
            voice["name"] = serde_json::Value::String(name.to_string());
        }

        serde_json::json!({
            "input": { "text": request.text },
            "voice": voice,
            "audioConfig": {
                "audioEncoding": "MP3",
                "speakingRate": self.speaking_rate,
            },
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTtsAdapter {
    fn name(&self) -> &str {
        "google_tts"
    }

    fn key_params(&self) -> GenerationParams {
        let mut params = GenerationParams::new()
            .with("provider", "google_tts")
            .with("encoding", "mp3")
            .with("language", &self.language)
            .with("speaking_rate", format!("{:.2}", self.speaking_rate));
        if let Some(voice) = &self.voice {
            params.insert("voice", voice);
        }
        params
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: SynthesizeResponse = response.json().await?;
        let encoded = parsed.audio_content.ok_or_else(|| {
            GenerationError::PermanentRequest("response carried no audio content".to_string())
        })?;

        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| GenerationError::Transient(format!("invalid audio payload: {}", e)))?;

        if bytes.is_empty() {
            return Err(GenerationError::PermanentRequest(
                "service returned empty audio".to_string(),
            ));
        }

        debug!(bytes = bytes.len(), "Synthesized speech via Google TTS");
        Ok(GeneratedMedia::new(bytes, "mp3"))
    }
}

/// Local speech synthesis through `espeak-ng`
pub struct EspeakAdapter {
    binary_path: String,
    voice: String,
    words_per_minute: u32,
    timeout: Duration,
}

impl EspeakAdapter {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            binary_path: "espeak-ng".to_string(),
            voice: voice.into(),
            words_per_minute: 150,
            timeout: Duration::from_secs(20),
        }
    }

    /// Create an adapter with a custom binary path
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    pub fn with_words_per_minute(mut self, wpm: u32) -> Self {
        self.words_per_minute = wpm;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakAdapter {
    fn name(&self) -> &str {
        "espeak"
    }

    fn key_params(&self) -> GenerationParams {
        GenerationParams::new()
            .with("provider", "espeak")
            .with("voice", &self.voice)
            .with("wpm", self.words_per_minute.to_string())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        let voice = request
            .params
            .get("voice")
            .or_else(|| request.params.get("language"))
            .unwrap_or(self.voice.as_str());

        let wpm = self.words_per_minute.to_string();

        let child = Command::new(&self.binary_path)
            .args(["-v", voice, "-s", wpm.as_str(), "--stdout"])
            .arg(&request.text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GenerationError::PermanentRequest(format!(
                    "failed to spawn {}: {}",
                    self.binary_path, e
                ))
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                GenerationError::Transient(format!("espeak timed out after {:?}", self.timeout))
            })?
            .map_err(|e| GenerationError::Transient(format!("failed to wait for espeak: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::PermanentRequest(format!(
                "espeak exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        if output.stdout.is_empty() {
            return Err(GenerationError::PermanentRequest(
                "espeak produced no audio".to_string(),
            ));
        }

        Ok(GeneratedMedia::new(output.stdout, "wav"))
    }
}
