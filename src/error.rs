//! Error types for the pipeline-digitizer library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DigitizeError`] — **Fatal**: the run cannot proceed (bad input file,
//!   page range outside the document, unknown schema shape, connection retries
//!   exhausted). Returned as `Err(DigitizeError)` from the top-level functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page produced nothing usable but
//!   the run carries on. Stored inside [`crate::digitize::PageOutcome`] so
//!   callers can inspect partial success after the run.
//!
//! * [`BackendError`] — the classification of a failure at the remote API
//!   boundary. Retry decisions are made on this type alone, which keeps the
//!   retry policy testable without a network.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pipeline-digitizer library.
#[derive(Debug, Error)]
pub enum DigitizeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A page could not be copied out of the scan or rendered to an image.
    #[error("Failed to extract page(s) {first}-{last}: {detail}")]
    PageExtractionFailed {
        first: usize,
        last: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Place libpdfium next to the executable or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Range errors ──────────────────────────────────────────────────────
    /// A single page number lies outside the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// A requested page span runs past the end of the document.
    #[error("Requested pages {start} to {end} but document only has {total} pages")]
    RangeExceedsDocument {
        start: usize,
        end: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed, or a setting could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The declared page shape matches none of the known record shapes.
    #[error("Unsupported page shape '{shape}'. Known shapes: {known}")]
    UnsupportedShape { shape: String, known: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// No inference backend was supplied and none could be built from the environment.
    #[error("Inference backend is not configured.\n{hint}")]
    BackendNotConfigured { hint: String },

    /// The remote API failed in a way the caller did not retry.
    #[error("Remote API error: {0}")]
    Remote(#[from] BackendError),

    /// Every connection retry for a page failed; the whole run stops.
    #[error("Max retries ({attempts}) reached for page {page}. Check your connection and try again.\nLast error: {last_error}")]
    ConnectionRetriesExhausted {
        page: usize,
        attempts: u32,
        last_error: String,
    },

    /// A model answer does not fit the declared page shape.
    #[error("Response does not match the '{shape}' page shape: {source}")]
    ResponseDecode {
        shape: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Table errors ──────────────────────────────────────────────────────
    /// A CSV table could not be read or parsed.
    #[error("Failed to read table '{path}': {detail}")]
    TableReadFailed { path: PathBuf, detail: String },

    /// A table lacks a column the operation requires.
    #[error("{table} table is missing column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A cell could not be interpreted (e.g. a non-numeric length).
    #[error("Invalid value '{value}' in column '{column}' (row {row})")]
    InvalidCell {
        column: String,
        row: usize,
        value: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DigitizeError {
    /// Convenience constructor for CSV write failures, which surface as `csv::Error`.
    pub(crate) fn write_failed(path: impl Into<PathBuf>, err: csv::Error) -> Self {
        let path = path.into();
        let source = match err.into_kind() {
            csv::ErrorKind::Io(io) => io,
            other => std::io::Error::other(format!("{other:?}")),
        };
        DigitizeError::OutputWriteFailed { path, source }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::digitize::PageOutcome`] when a page yields no rows.
/// The run continues with the next page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The model returned nothing usable (empty, undecodable, retries spent,
    /// or a non-retryable API error).
    #[error("Page {page}: no data extracted from pages {first}-{last}")]
    NoData {
        page: usize,
        first: usize,
        last: usize,
    },
}

/// Failure classification at the remote inference boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The service is temporarily overloaded (HTTP 503). Retried with backoff.
    #[error("{status} service overloaded: {message}")]
    Overloaded { status: u16, message: String },

    /// The connection could not be established or timed out.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Any other non-success response. Never retried.
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The response arrived but its body did not have the expected form.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether the extraction client should back off and try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Overloaded { .. })
    }

    /// Whether the page loop should treat this as a connection-level failure.
    pub fn is_connection(&self) -> bool {
        matches!(self, BackendError::Connection(_))
    }

    /// Map an HTTP status and body to the matching variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 503 {
            BackendError::Overloaded { status, message }
        } else {
            BackendError::Api { status, message }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            BackendError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}
