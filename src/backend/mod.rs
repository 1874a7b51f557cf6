//! Remote inference boundary.
//!
//! The page loop needs five things from the hosted model service: list,
//! find, upload and delete stored files, and run one structured generation
//! against a stored file. [`InferenceBackend`] names exactly those. The
//! production implementation is [`gemini::GeminiBackend`]; tests substitute
//! in-memory fakes.

pub mod gemini;

pub use gemini::GeminiBackend;

use crate::error::BackendError;
use crate::pipeline::window::TargetOffset;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A file stored on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Service resource name, e.g. `files/abc123`. Used for deletion.
    pub name: String,
    /// Name chosen at upload time. Used for reuse lookups.
    pub display_name: String,
    /// Reference passed to generation requests.
    pub uri: String,
    pub mime_type: String,
}

/// One structured generation against a stored file.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    /// Prompt already rendered for `target`.
    pub prompt: String,
    pub file: RemoteFile,
    /// Position of the page to digitize within `file`.
    pub target: TargetOffset,
    /// Schema the JSON answer must follow.
    pub response_schema: serde_json::Value,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateResponse {
    /// Concatenated candidate text, if any.
    pub text: Option<String>,
    /// e.g. `STOP`, `MAX_TOKENS`.
    pub finish_reason: Option<String>,
    pub output_tokens: u32,
}

impl GenerateResponse {
    pub fn hit_token_limit(&self) -> bool {
        self.finish_reason.as_deref() == Some("MAX_TOKENS")
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn list_files(&self) -> Result<Vec<RemoteFile>, BackendError>;

    /// The stored file with this display name, if any.
    async fn find_file(&self, display_name: &str) -> Result<Option<RemoteFile>, BackendError> {
        Ok(self
            .list_files()
            .await?
            .into_iter()
            .find(|f| f.display_name == display_name))
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, BackendError>;

    async fn delete_file(&self, file: &RemoteFile) -> Result<(), BackendError>;

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError>;
}

/// Outcome of [`purge_files`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every stored file, continuing past individual failures.
pub async fn purge_files(backend: &Arc<dyn InferenceBackend>) -> Result<PurgeSummary, BackendError> {
    let files = backend.list_files().await?;
    info!("Purging {} remote files", files.len());

    let mut summary = PurgeSummary::default();
    for file in &files {
        match backend.delete_file(file).await {
            Ok(()) => summary.deleted += 1,
            Err(e) => {
                warn!("Failed to delete {} ({}): {}", file.display_name, file.name, e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
