//! Gemini REST implementation of [`InferenceBackend`].
//!
//! Uses the `v1beta` Files API for storage (resumable upload protocol) and
//! `models/{id}:generateContent` with a response schema for extraction.

use super::{GenerateRequest, GenerateResponse, InferenceBackend, RemoteFile};
use crate::error::{BackendError, DigitizeError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Environment variables checked, in order, for an API key.
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Polls while an uploaded file is still `PROCESSING`.
const ACTIVE_POLLS: u32 = 30;
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, DigitizeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DigitizeError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Build from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env(timeout_secs: u64) -> Result<Self, DigitizeError> {
        let key = API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
            .ok_or_else(|| DigitizeError::BackendNotConfigured {
                hint: format!(
                    "Set {} or pass --api-key-file.",
                    API_KEY_VARS.join(" or ")
                ),
            })?;
        Self::new(key.trim(), timeout_secs)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("x-goog-api-key", &self.api_key)
    }

    async fn get_file(&self, name: &str) -> Result<FileResource, BackendError> {
        let resp = self
            .authed(self.client.get(self.url(&format!("v1beta/{name}"))))
            .send()
            .await?;
        Ok(checked(resp).await?.json().await?)
    }

    async fn wait_active(&self, mut file: FileResource) -> Result<FileResource, BackendError> {
        for _ in 0..ACTIVE_POLLS {
            if file.state.as_deref() != Some("PROCESSING") {
                break;
            }
            debug!("{} still processing", file.name);
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
            file = self.get_file(&file.name).await?;
        }
        match file.state.as_deref() {
            Some("FAILED") => Err(BackendError::InvalidResponse(format!(
                "remote processing failed for {}",
                file.name
            ))),
            _ => Ok(file),
        }
    }
}

/// Turn a non-success status into a classified error, keeping the body text.
async fn checked(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::from_status(status.as_u16(), body))
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    state: Option<String>,
}

impl From<FileResource> for RemoteFile {
    fn from(f: FileResource) -> Self {
        RemoteFile {
            name: f.name,
            display_name: f.display_name,
            uri: f.uri,
            mime_type: f.mime_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<FileResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    candidates_token_count: u32,
}

impl From<GenerateContentResponse> for GenerateResponse {
    fn from(r: GenerateContentResponse) -> Self {
        let first = r.candidates.into_iter().next();
        let finish_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
        let text = first
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .filter(|t| !t.trim().is_empty());
        GenerateResponse {
            text,
            finish_reason,
            output_tokens: r
                .usage_metadata
                .map(|u| u.candidates_token_count)
                .unwrap_or(0),
        }
    }
}

// ── Trait impl ───────────────────────────────────────────────────────────

#[async_trait]
impl InferenceBackend for GeminiBackend {
    async fn list_files(&self) -> Result<Vec<RemoteFile>, BackendError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .authed(self.client.get(self.url("v1beta/files")))
                .query(&[("pageSize", "100")]);
            if let Some(ref token) = page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: ListResponse = checked(req.send().await?).await?.json().await?;
            out.extend(page.files.into_iter().map(RemoteFile::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, BackendError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("read {}: {e}", path.display())))?;

        let start = self
            .authed(self.client.post(self.url("upload/v1beta/files")))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = checked(start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| BackendError::InvalidResponse("missing x-goog-upload-url header".into()))?;

        debug!("Uploading {} ({} bytes) as {}", path.display(), bytes.len(), display_name);
        let finish = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let uploaded: UploadResponse = checked(finish).await?.json().await?;
        let file = self.wait_active(uploaded.file).await?;
        Ok(file.into())
    }

    async fn delete_file(&self, file: &RemoteFile) -> Result<(), BackendError> {
        let resp = self
            .authed(self.client.delete(self.url(&format!("v1beta/{}", file.name))))
            .send()
            .await?;
        checked(resp).await?;
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": request.prompt },
                    { "file_data": {
                        "mime_type": request.file.mime_type,
                        "file_uri": request.file.uri,
                    }},
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
                "maxOutputTokens": request.max_output_tokens,
            },
        });

        let path = format!("v1beta/{}:generateContent", model_path(&request.model));
        let resp = self
            .authed(self.client.post(self.url(&path)))
            .json(&body)
            .send()
            .await?;
        let parsed: GenerateContentResponse = checked(resp).await?.json().await?;
        Ok(parsed.into())
    }
}
