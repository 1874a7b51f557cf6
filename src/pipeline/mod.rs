//! Per-page stages of a digitization run.
//!
//! Each submodule implements one step and is testable on its own; the page
//! loop in [`crate::digitize`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! target page ──▶ window ──▶ pdf ──▶ stage ──▶ extract
//!                 (range)   (pdfium) (upload)  (structured output)
//! ```
//!
//! 1. [`window`]  — choose which neighbouring pages travel with the target
//!    page, and validate the requested page range
//! 2. [`pdf`]     — copy the window out of the scan (or render it as PNG);
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`stage`]   — upload the window to remote storage, reusing an earlier
//!    upload of the same window
//! 4. [`extract`] — ask the model for the page as schema-constrained JSON,
//!    with backoff on overloaded responses

pub mod extract;
pub mod pdf;
pub mod stage;
pub mod window;
