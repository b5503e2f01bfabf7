//! Gemini vision extraction backend (Google Generative Language API).

use super::{detect_mime, ExtractionError, ImageUpload, TextExtractor};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const TRANSCRIBE_PROMPT: &str = "You are a hematology assistant. Transcribe this lab \
report image as plain text. First, if printed on the report, emit one line each for \
`Patient Name: ...`, `Patient Age: ...`, `Patient Gender: ...`, `Patient ID: ...` and \
`Test Date: ...`. Then transcribe every blood parameter, one per line, in the form \
`Name: value unit` (for example `Hemoglobin: 13.2 g/dL`). Use the exact parameter names \
as printed. Do not add commentary, markdown, or reference ranges.";

/// Extraction client for the Gemini generateContent endpoint.
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout_secs: u64,
    base_url: String,
}

impl GeminiExtractor {
    /// Create a client, reading the API key from GEMINI_API_KEY. Model and
    /// timeout can be overridden via GEMINI_MODEL / OCR_TIMEOUT_SECS.
    pub fn from_env(client: reqwest::Client) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY not set"))?;

        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let timeout_secs = std::env::var("OCR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(Self {
            client,
            api_key,
            model,
            timeout_secs,
            base_url: GEMINI_API_BASE.to_string(),
        })
    }
}

// ── Gemini API request/response types ────────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn join_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// ── Provider implementation ──────────────────────────────────────────────────

#[async_trait::async_trait]
impl TextExtractor for GeminiExtractor {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn extract(&self, upload: &ImageUpload) -> Result<String, ExtractionError> {
        let mime_type = detect_mime(&upload.data)?;

        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: TRANSCRIBE_PROMPT.to_string(),
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: BASE64.encode(&upload.data),
                        },
                    },
                ],
            }],
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        info!(
            "GeminiExtractor: sending {} ({} bytes, {}) to model {}",
            upload.filename,
            upload.data.len(),
            mime_type,
            self.model
        );

        // The deadline covers the full exchange: a server that returns
        // headers and then stalls the body must still trip the timeout.
        let exchange = async {
            let resp = self.client.post(&url).json(&body).send().await?;

            let status = resp.status();
            if !status.is_success() {
                let message = resp.text().await.unwrap_or_default();
                return Err(match status.as_u16() {
                    401 | 403 => ExtractionError::Auth(message),
                    429 => ExtractionError::Quota(message),
                    code => ExtractionError::Api { status: code, message },
                });
            }

            let parsed: GenerateContentResponse = resp.json().await?;
            Ok(parsed)
        };

        let parsed = tokio::time::timeout(Duration::from_secs(self.timeout_secs), exchange)
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout_secs))??;

        let text = join_text(parsed);

        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyResponse);
        }

        debug!("GeminiExtractor: recognized {} chars", text.len());
        Ok(text)
    }
}
