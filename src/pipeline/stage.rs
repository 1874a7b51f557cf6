//! Stage a page window on the remote service.
//!
//! Uploads are keyed by a deterministic display name, so a window already
//! stored (left over from an interrupted run, or an earlier page that
//! produced no data) is reused without touching the local PDF.

use crate::backend::{InferenceBackend, RemoteFile};
use crate::error::DigitizeError;
use crate::pipeline::pdf::SharedPageSource;
use std::sync::Arc;
use tracing::debug;

pub const PDF_MIME: &str = "application/pdf";
pub const PNG_MIME: &str = "image/png";

/// Remote display name for pages `first..=last` of `stem`.
pub fn staged_name(first: usize, last: usize, stem: &str, as_image: bool) -> String {
    let mut name = format!("{first}-{last}__{stem}");
    if as_image {
        name.push_str("_image");
    }
    name
}

/// Make pages `first..=last` available remotely and return the stored file.
///
/// With `as_image` the single page `first` is rendered to PNG; callers
/// guarantee `first == last` in that case.
pub async fn stage_pages(
    backend: &Arc<dyn InferenceBackend>,
    document: &SharedPageSource,
    first: usize,
    last: usize,
    as_image: bool,
) -> Result<RemoteFile, DigitizeError> {
    let name = staged_name(first, last, document.identity(), as_image);

    if let Some(existing) = backend.find_file(&name).await? {
        debug!("Reusing remote file {} ({})", name, existing.name);
        return Ok(existing);
    }

    let suffix = if as_image { ".png" } else { ".pdf" };
    let temp = tempfile::Builder::new()
        .prefix("pages-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| DigitizeError::Internal(format!("tempfile: {e}")))?;

    let doc = Arc::clone(document);
    let dest = temp.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        if as_image {
            doc.write_page_image(first, &dest)
        } else {
            doc.write_pages(first, last, &dest)
        }
    })
    .await
    .map_err(|e| DigitizeError::Internal(format!("Page staging task panicked: {e}")))??;

    let mime = if as_image { PNG_MIME } else { PDF_MIME };
    debug!("Uploading {} as {}", name, mime);
    let file = backend.upload_file(temp.path(), &name, mime).await?;
    // `temp` is dropped (and the local copy deleted) on every return path.
    Ok(file)
}
