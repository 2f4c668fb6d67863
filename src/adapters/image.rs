//! Image adapter backed by the Pixabay search API.
//!
//! Pixabay indexes English keywords best, so concepts in other languages
//! are translated first when a translator is configured. The translation is
//! an internal step: the content key is built from the untranslated concept
//! plus the adapter's parameters, and translation errors surface with the
//! same classification as search errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    classify_status, primary_language, GeneratedMedia, GenerationError, GenerationRequest,
    ImageFinder, Translator,
};
use crate::core::content_key::GenerationParams;

const PIXABAY_URL: &str = "https://pixabay.com/api/";

/// Pixabay photo search
pub struct PixabayImageAdapter {
    api_key: String,
    endpoint: String,
    query_language: String,
    translator: Option<Arc<dyn Translator>>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    #[serde(rename = "webformatURL")]
    webformat_url: String,
}

impl PixabayImageAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: PIXABAY_URL.to_string(),
            query_language: "en".to_string(),
            translator: None,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Language search queries are sent in
    pub fn with_query_language(mut self, language: impl Into<String>) -> Self {
        self.query_language = language.into();
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Concept text in the query language
    async fn query_for(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let source = request
            .params
            .get("language")
            .map(primary_language)
            .unwrap_or_else(|| self.query_language.clone());

        match &self.translator {
            Some(translator) if source != self.query_language => {
                let translated = translator
                    .translate(&request.text, &source, &self.query_language)
                    .await?;
                debug!(
                    translator = translator.name(),
                    from = %request.text,
                    to = %translated,
                    "Translated image query"
                );
                Ok(translated)
            }
            _ => Ok(request.text.clone()),
        }
    }
}

#[async_trait]
impl ImageFinder for PixabayImageAdapter {
    fn name(&self) -> &str {
        "pixabay"
    }

    fn key_params(&self) -> GenerationParams {
        GenerationParams::new()
            .with("provider", "pixabay")
            .with("image_type", "photo")
            .with("query_language", &self.query_language)
            .with("translated", self.translator.is_some().to_string())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GenerationError> {
        let query = self.query_for(request).await?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", query.as_str()),
                ("lang", self.query_language.as_str()),
                ("image_type", "photo"),
                ("safesearch", "true"),
                ("per_page", "3"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let search: SearchResponse = response.json().await?;
        let hit = search.hits.into_iter().next().ok_or_else(|| {
            GenerationError::PermanentRequest(format!("no images found for '{}'", query))
        })?;

        let download = self.client.get(&hit.webformat_url).send().await?;
        let status = download.status();
        if !status.is_success() {
            return Err(classify_status(status, ""));
        }

        let bytes = download.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(GenerationError::Transient("downloaded empty image".to_string()));
        }

        Ok(GeneratedMedia::new(bytes, extension_from_url(&hit.webformat_url)))
    }
}

/// Image extension from a download URL; defaults to jpg
fn extension_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit_once('.') {
        Some((_, ext)) if matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp") => {
            ext.to_ascii_lowercase()
        }
        _ => "jpg".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MediaKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UppercaseTranslator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for UppercaseTranslator {
        fn name(&self) -> &str {
            "upper"
        }

        async fn translate(&self, text: &str, _source: &str, _target: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_uppercase())
        }
    }

    fn request(text: &str, language: &str) -> GenerationRequest {
        GenerationRequest {
            kind: MediaKind::Image,
            text: text.to_string(),
            params: GenerationParams::new().with("language", language),
        }
    }

    #[tokio::test]
    async fn test_query_translated_only_for_foreign_language() {
        let translator = Arc::new(UppercaseTranslator {
            calls: AtomicUsize::new(0),
        });
        let adapter = PixabayImageAdapter::new("KEY").with_translator(translator.clone());

        assert_eq!(adapter.query_for(&request("Baum", "de-DE")).await.unwrap(), "BAUM");
        assert_eq!(adapter.query_for(&request("tree", "en-US")).await.unwrap(), "tree");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_untranslated_without_translator() {
        let adapter = PixabayImageAdapter::new("KEY");
        assert_eq!(adapter.query_for(&request("Baum", "de")).await.unwrap(), "Baum");
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(extension_from_url("https://cdn.pixabay.com/photo/a_640.png"), "png");
        assert_eq!(extension_from_url("https://cdn.pixabay.com/photo/a_640.JPG?x=1"), "jpg");
        assert_eq!(extension_from_url("https://cdn.pixabay.com/photo/noext"), "jpg");
    }
}
