//! Progress-callback trait for per-page digitization events.
//!
//! Inject an [`Arc<dyn DigitizeProgressCallback>`] via
//! [`crate::config::DigitizeConfigBuilder::progress_callback`] to receive
//! events as the run processes each page.
//!
//! # Example
//!
//! ```rust
//! use pipeline_digitizer::{DigitizeProgressCallback, DigitizeConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RowCounter {
//!     rows: AtomicUsize,
//! }
//!
//! impl DigitizeProgressCallback for RowCounter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, rows: usize) {
//!         self.rows.fetch_add(rows, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} rows", page_num, total_pages, rows);
//!     }
//! }
//!
//! let counter = Arc::new(RowCounter { rows: AtomicUsize::new(0) });
//!
//! let config = DigitizeConfig::builder()
//!     .progress_callback(counter as Arc<dyn DigitizeProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the page loop as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are processed one at a time, in order.
pub trait DigitizeProgressCallback: Send + Sync {
    /// Called once before the first page.
    ///
    /// # Arguments
    /// * `total_pages` — number of target pages that will be processed
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page is staged.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number in the document
    /// * `total_pages` — number of target pages in the run
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a connection failure forces a page to be re-staged.
    fn on_page_retry(&self, page_num: usize, attempt: u32, error: &str) {
        let _ = (page_num, attempt, error);
    }

    /// Called when a page produced rows.
    ///
    /// # Arguments
    /// * `rows` — number of flattened rows for the page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, rows: usize) {
        let _ = (page_num, total_pages, rows);
    }

    /// Called when a page produced no rows.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the last page.
    ///
    /// # Arguments
    /// * `success_count` — pages that produced rows
    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DigitizeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DigitizeConfig`].
pub type ProgressCallback = Arc<dyn DigitizeProgressCallback>;
