//! LibreTranslate client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{classify_status, GenerationError, Translator};

/// Client for a LibreTranslate instance
pub struct LibreTranslateAdapter {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

impl LibreTranslateAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/translate", self.base_url)
    }
}

#[async_trait]
impl Translator for LibreTranslateAdapter {
    fn name(&self) -> &str {
        "libretranslate"
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, GenerationError> {
        let mut body = serde_json::json!({
            "q": text,
            "source": source,
            "target": target,
            "format": "text",
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = serde_json::Value::String(key.clone());
        }

        let response = self.client.post(self.endpoint()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: TranslateResponse = response.json().await?;
        let translated = parsed.translated_text.trim().to_string();

        if translated.is_empty() {
            return Err(GenerationError::PermanentRequest(format!(
                "no translation for '{}'",
                text
            )));
        }

        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let adapter = LibreTranslateAdapter::new("http://localhost:5000/");
        assert_eq!(adapter.endpoint(), "http://localhost:5000/translate");
        assert_eq!(adapter.name(), "libretranslate");
    }
}
