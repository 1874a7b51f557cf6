//! # pipeline-digitizer
//!
//! Digitize scanned pipeline-construction directories into tables with a
//! multimodal LLM, then score the result against hand-coded ground truth.
//!
//! ## Why this crate?
//!
//! The directories are typewritten, multi-column and full of abbreviations;
//! OCR followed by parsing loses the structure. Instead each page (with a
//! neighbouring page or two, since entries spill over page breaks) is
//! uploaded to a multimodal model that answers in a schema-constrained JSON
//! shape, which is flattened straight into CSV rows.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Window   pick the pages that travel with each target page
//!  ├─ 2. Stage    copy them out via pdfium and upload (reusing old uploads)
//!  ├─ 3. Extract  structured generation with 503 backoff
//!  ├─ 4. Flatten  one row per entry, plus model id and absolute page
//!  └─ 5. Output   intermediate/pg<N>.csv per page, one combined CSV per run
//! ```
//!
//! Afterwards [`truth`] cleans hand-coded tables, [`eval`] compares mileage
//! totals, and [`sample`] draws page samples for manual review.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipeline_digitizer::{digitize, DigitizeConfig, PageShape};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend built from GEMINI_API_KEY
//!     let config = DigitizeConfig::builder()
//!         .shape(PageShape::Gov)
//!         .page_window(2)
//!         .build()?;
//!     let output = digitize("directory_1948.pdf", &config).await?;
//!     eprintln!("{}/{} pages digitized", output.succeeded(), output.pages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `digitize` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pipeline-digitizer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod digitize;
pub mod error;
pub mod eval;
pub mod flatten;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod runlog;
pub mod sample;
pub mod schema;
pub mod table;
pub mod truth;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{purge_files, GeminiBackend, InferenceBackend, PurgeSummary, RemoteFile};
pub use config::{Backoff, DigitizeConfig, DigitizeConfigBuilder, PageSelection, Placement, RetryPolicy};
pub use digitize::{digitize, digitize_document, PageOutcome, RunLayout, RunOutput};
pub use error::{BackendError, DigitizeError, PageError};
pub use eval::{evaluate, evaluate_files, EvaluationReport, MileageBreakdown, Score};
pub use flatten::{flatten_json, flatten_page};
pub use progress::{DigitizeProgressCallback, NoopProgressCallback, ProgressCallback};
pub use sample::{sample_pages, write_review_sample};
pub use schema::{Page, PageShape};
pub use table::Table;
pub use truth::{clean_handcoded, clean_handcoded_file};
