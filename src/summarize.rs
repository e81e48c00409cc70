//! Generative-AI summarization.
//!
//! Defines the [`Summarizer`] trait and its implementations:
//! - **[`DisabledSummarizer`]**: returns errors; used when no provider is configured.
//! - **[`GeminiSummarizer`]**: calls the Gemini `generateContent` REST endpoint
//!   with the file content inlined as base64.
//!
//! The prompt is chosen by [`ContentCategory`]. Content with no category is
//! answered locally with [`UNSUPPORTED_SUMMARY`] and never sent to the
//! endpoint; use [`summarize_content`] to get that behavior.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SummarizerConfig;

/// Summary recorded for content the model is not asked about.
pub const UNSUPPORTED_SUMMARY: &str = "Unsupported format for AI analysis.";

/// Returned when the endpoint answers with no text.
pub const EMPTY_SUMMARY: &str = "No analysis available.";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Coarse content category; selects the task prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    Image,
    Document,
    Audio,
    Unsupported,
}

impl ContentCategory {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            ContentCategory::Image
        } else if mime.starts_with("audio/") {
            ContentCategory::Audio
        } else if mime.starts_with("text/")
            || matches!(mime.as_str(), "application/pdf" | "application/json")
        {
            ContentCategory::Document
        } else {
            ContentCategory::Unsupported
        }
    }

    pub fn prompt(&self) -> Option<&'static str> {
        match self {
            ContentCategory::Image => Some(
                "Briefly analyze this image. Describe what it is, name the main objects \
                 or read any visible text. Answer in at most 20 words.",
            ),
            ContentCategory::Document => {
                Some("Summarize the content of this document in one concise sentence.")
            }
            ContentCategory::Audio => Some(
                "Transcribe the key points of this audio and summarize them in one concise sentence.",
            ),
            ContentCategory::Unsupported => None,
        }
    }
}

/// A single summarization call.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
    pub prompt: &'a str,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String>;
}

/// Pick the prompt for `mime_type` and run the summarizer, or answer
/// [`UNSUPPORTED_SUMMARY`] without a call.
pub async fn summarize_content(
    summarizer: &dyn Summarizer,
    bytes: &[u8],
    mime_type: &str,
) -> Result<String> {
    let Some(prompt) = ContentCategory::from_mime(mime_type).prompt() else {
        debug!(mime_type, "content type not analyzable");
        return Ok(UNSUPPORTED_SUMMARY.to_string());
    };
    summarizer
        .summarize(SummaryRequest {
            bytes,
            mime_type,
            prompt,
        })
        .await
}

// ============ Disabled ============

pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn summarize(&self, _request: SummaryRequest<'_>) -> Result<String> {
        bail!("Summarizer is disabled")
    }
}

// ============ Gemini ============

/// Summarizer backed by the Gemini REST API.
///
/// Requires `GEMINI_API_KEY` in the environment.
pub struct GeminiSummarizer {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow!("GEMINI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl Summarizer for GeminiSummarizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String> {
        let body = request_body(&request);
        let url = self.endpoint();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return Ok(parse_gemini_response(&json));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "summarizer request failed, retrying");
                        last_err = Some(anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "summarizer request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Summarization failed after retries")))
    }
}

fn request_body(request: &SummaryRequest<'_>) -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(request.bytes);
    serde_json::json!({
        "contents": [{
            "parts": [
                { "inline_data": { "mime_type": request.mime_type, "data": data } },
                { "text": request.prompt },
            ]
        }]
    })
}

/// Join the text parts of the first candidate. A response without text is
/// answered with [`EMPTY_SUMMARY`].
fn parse_gemini_response(json: &serde_json::Value) -> String {
    let text: String = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        EMPTY_SUMMARY.to_string()
    } else {
        text.to_string()
    }
}

/// Instantiate the configured summarizer.
pub fn create_summarizer(config: &SummarizerConfig) -> Result<Arc<dyn Summarizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSummarizer)),
        "gemini" => Ok(Arc::new(GeminiSummarizer::new(config)?)),
        other => bail!("Unknown summarizer provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Summarizer for Counting {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} bytes", request.bytes.len()))
        }
    }

    #[test]
    fn test_category_from_mime() {
        assert_eq!(ContentCategory::from_mime("image/png"), ContentCategory::Image);
        assert_eq!(ContentCategory::from_mime("text/plain"), ContentCategory::Document);
        assert_eq!(
            ContentCategory::from_mime("application/pdf"),
            ContentCategory::Document
        );
        assert_eq!(ContentCategory::from_mime("audio/mpeg"), ContentCategory::Audio);
        assert_eq!(
            ContentCategory::from_mime("application/zip"),
            ContentCategory::Unsupported
        );
    }

    #[tokio::test]
    async fn test_unsupported_content_skips_endpoint() {
        let summarizer = Counting(AtomicUsize::new(0));
        let summary = summarize_content(&summarizer, b"PK", "application/zip")
            .await
            .unwrap();
        assert_eq!(summary, UNSUPPORTED_SUMMARY);
        assert_eq!(summarizer.0.load(Ordering::SeqCst), 0);

        let summary = summarize_content(&summarizer, b"abc", "text/plain")
            .await
            .unwrap();
        assert_eq!(summary, "3 bytes");
        assert_eq!(summarizer.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_summarizer_errors() {
        let result = summarize_content(&DisabledSummarizer, b"abc", "text/plain").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_response_joins_parts() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "A cat " }, { "text": "on a sofa." }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json), "A cat on a sofa.");
    }

    #[test]
    fn test_parse_response_without_text() {
        let json = serde_json::json!({ "candidates": [] });
        assert_eq!(parse_gemini_response(&json), EMPTY_SUMMARY);
    }

    #[test]
    fn test_request_body_inlines_base64() {
        let body = request_body(&SummaryRequest {
            bytes: b"hi",
            mime_type: "text/plain",
            prompt: "p",
        });
        assert_eq!(
            body.pointer("/contents/0/parts/0/inline_data/data"),
            Some(&serde_json::json!("aGk="))
        );
        assert_eq!(
            body.pointer("/contents/0/parts/1/text"),
            Some(&serde_json::json!("p"))
        );
    }
}
