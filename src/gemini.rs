//! HTTP backend for the Generative Language REST API.
//!
//! Two endpoints are used:
//!
//! ```text
//! GET  {base}/models?pageSize=…            model catalog
//! POST {base}/models/{id}:generateContent  one page → text
//! ```
//!
//! The API key travels in the `x-goog-api-key` header rather than the query
//! string so it never shows up in logged URLs.

use crate::backend::{normalise_model_id, ModelDescriptor, PageRequest, VisionBackend};
use crate::config::PipelineConfig;
use crate::error::{BackendError, MedNotesError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Safety categories overridden on every request.
pub const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Catalog method name that marks a model as usable for extraction.
const GENERATE_METHOD: &str = "generateContent";

/// Catalog page size and page cap.
const CATALOG_PAGE_SIZE: u32 = 1000;
const MAX_CATALOG_PAGES: usize = 10;

/// Client for the Gemini `generateContent` and `models` endpoints.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Build a client with the given key, endpoint and per-request timeout.
    pub fn new(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, MedNotesError> {
        if api_key.trim().is_empty() {
            return Err(MedNotesError::MissingApiKey);
        }
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key.trim())
            .map_err(|e| MedNotesError::InvalidConfig(format!("invalid API key: {e}")))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| MedNotesError::HttpClient(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, MedNotesError> {
        let key = config
            .api_key
            .as_deref()
            .ok_or(MedNotesError::MissingApiKey)?;
        Self::new(
            key,
            &config.base_url,
            Duration::from_secs(config.api_timeout_secs),
        )
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            normalise_model_id(model)
        )
    }

    fn catalog_url(&self) -> String {
        format!("{}/models", self.base_url)
    }
}

#[async_trait]
impl VisionBackend for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_CATALOG_PAGES {
            let mut req = self
                .http
                .get(self.catalog_url())
                .query(&[("pageSize", CATALOG_PAGE_SIZE.to_string())]);
            if let Some(ref token) = page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let retry_after = retry_after_secs(resp.headers());
                let body = resp.text().await.unwrap_or_default();
                return Err(BackendError::from_status(
                    status.as_u16(),
                    "",
                    &body,
                    retry_after,
                ));
            }

            let parsed: ListModelsResponse = resp.json().await?;
            models.extend(parsed.models.into_iter().map(ModelDescriptor::from));

            match parsed.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Catalog returned {} models", models.len());
        Ok(models)
    }

    async fn generate(&self, model: &str, request: &PageRequest) -> Result<String, BackendError> {
        let body = GenerateContentRequest::from_page(request);
        let url = self.generate_url(model);
        debug!(
            "POST {} ({} base64 bytes, {})",
            url,
            request.data_base64.len(),
            request.mime_type
        );

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(
                status.as_u16(),
                normalise_model_id(model),
                &text,
                retry_after,
            ));
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        parsed.into_text()
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

// ── Wire types: request ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
    generation_config: GenerationConfig,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_page(request: &'a PageRequest) -> Self {
        let threshold = request.safety_threshold.as_api_str();
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text {
                        text: &request.prompt,
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &request.mime_type,
                            data: &request.data_base64,
                        },
                    },
                ],
            }],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold,
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

// ── Wire types: responses ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenate the text parts of the first candidate.
    fn into_text(self) -> Result<String, BackendError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(BackendError::Blocked { reason });
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text);
        }
        match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST")) => {
                Err(BackendError::Blocked {
                    reason: reason.to_string(),
                })
            }
            _ => Err(BackendError::EmptyResponse),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<CatalogEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    name: String,
    display_name: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl From<CatalogEntry> for ModelDescriptor {
    fn from(entry: CatalogEntry) -> Self {
        let supports_generation = entry
            .supported_generation_methods
            .iter()
            .any(|m| m == GENERATE_METHOD);
        ModelDescriptor {
            id: normalise_model_id(&entry.name).to_string(),
            display_name: entry.display_name,
            supports_generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyThreshold;
    use serde_json::{json, Value};

    fn sample_request() -> PageRequest {
        PageRequest {
            prompt: "Extract the text.".into(),
            mime_type: "image/png".into(),
            data_base64: "aGVsbG8=".into(),
            temperature: 0.1,
            max_output_tokens: 1024,
            safety_threshold: SafetyThreshold::BlockNone,
        }
    }

    #[test]
    fn request_body_carries_prompt_image_and_safety_overrides() {
        let req = sample_request();
        let body: Value = serde_json::to_value(GenerateContentRequest::from_page(&req)).unwrap();

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "Extract the text.");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], "aGVsbG8=");

        let settings = body["safetySettings"].as_array().unwrap();
        assert_eq!(settings.len(), 4);
        for category in SAFETY_CATEGORIES {
            assert!(settings
                .iter()
                .any(|s| s["category"] == *category && s["threshold"] == "BLOCK_NONE"));
        }
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn response_text_parts_are_joined() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "# Diagnosis\n" }, { "text": "Fever." }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(resp.into_text().unwrap(), "# Diagnosis\nFever.");
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        assert_eq!(
            resp.into_text().unwrap_err(),
            BackendError::Blocked {
                reason: "SAFETY".into()
            }
        );
    }

    #[test]
    fn empty_candidate_is_an_error() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "STOP" }]
        }))
        .unwrap();
        assert_eq!(resp.into_text().unwrap_err(), BackendError::EmptyResponse);

        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .unwrap();
        assert!(matches!(resp.into_text(), Err(BackendError::Blocked { .. })));
    }

    #[test]
    fn catalog_entries_map_to_descriptors() {
        let resp: ListModelsResponse = serde_json::from_value(json!({
            "models": [
                {
                    "name": "models/gemini-1.5-flash",
                    "displayName": "Gemini 1.5 Flash",
                    "supportedGenerationMethods": ["generateContent", "countTokens"]
                },
                {
                    "name": "models/text-embedding-004",
                    "supportedGenerationMethods": ["embedContent"]
                }
            ]
        }))
        .unwrap();
        let models: Vec<ModelDescriptor> =
            resp.models.into_iter().map(ModelDescriptor::from).collect();
        assert_eq!(models[0].id, "gemini-1.5-flash");
        assert!(models[0].supports_generation);
        assert_eq!(models[0].display_name.as_deref(), Some("Gemini 1.5 Flash"));
        assert!(!models[1].supports_generation);
    }

    #[test]
    fn urls_are_built_from_short_ids() {
        let client = GeminiClient::new("k", "https://example.test/v1beta/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(
            client.generate_url("models/gemini-1.5-flash"),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(client.catalog_url(), "https://example.test/v1beta/models");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            GeminiClient::new("  ", crate::config::DEFAULT_BASE_URL, Duration::from_secs(1)),
            Err(MedNotesError::MissingApiKey)
        ));
    }

    #[test]
    fn retry_after_header_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after_secs(&headers), Some(12));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after_secs(&headers), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client =
            GeminiClient::new("k", "http://127.0.0.1:9/v1beta", Duration::from_secs(2)).unwrap();
        let err = client.list_models().await.unwrap_err();
        assert!(err.is_retryable(), "got: {err:?}");
    }
}
