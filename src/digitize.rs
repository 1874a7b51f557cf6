//! Run entry points: digitize a scanned directory page by page.
//!
//! Pages are processed one at a time, in order. Each target page is staged
//! with its window, extracted, flattened and written out before the next
//! page starts, so an interrupted run still leaves every finished page on
//! disk (`intermediate/pg<N>.csv`) and its staged uploads reusable.

use crate::backend::{GeminiBackend, InferenceBackend, RemoteFile};
use crate::config::DigitizeConfig;
use crate::error::{DigitizeError, PageError};
use crate::flatten::page_table;
use crate::pipeline::extract::extract_page;
use crate::pipeline::pdf::{PageSource, PdfDocumentSource, SharedPageSource};
use crate::pipeline::stage::stage_pages;
use crate::pipeline::window::{resolve_selection, select_window, TargetOffset};
use crate::runlog::RunLog;
use crate::schema::Page;
use crate::table::Table;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Column holding the model id on every output row.
pub const MODEL_COLUMN: &str = "model_id";
/// Column holding the 1-indexed PDF page the row came from.
pub const ABSOLUTE_PAGE_COLUMN: &str = "absolute_page_n";

/// Where a run writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub run_dir: PathBuf,
    pub intermediate_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Combined CSV of every successful page.
    pub output_path: PathBuf,
}

impl RunLayout {
    /// A fresh timestamped directory under `root`:
    /// `Run_<YYYY-MM-DD_HH-MM-SS>__by<window>pages`.
    pub fn new(root: impl AsRef<Path>, stem: &str, window: usize, output_name: Option<&str>) -> Self {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let run_dir = root.as_ref().join(format!("Run_{stamp}__by{window}pages"));
        let name = output_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{stem}.csv"));
        Self::at(run_dir, &name)
    }

    /// Use an explicit run directory.
    pub fn at(run_dir: impl Into<PathBuf>, output_name: &str) -> Self {
        let run_dir = run_dir.into();
        Self {
            intermediate_dir: run_dir.join("intermediate"),
            log_dir: run_dir.join("logs"),
            output_path: run_dir.join(output_name),
            run_dir,
        }
    }

    pub fn intermediate_path(&self, page: usize) -> PathBuf {
        self.intermediate_dir.join(format!("pg{page}.csv"))
    }

    fn create(&self) -> Result<(), DigitizeError> {
        for dir in [&self.run_dir, &self.intermediate_dir, &self.log_dir] {
            std::fs::create_dir_all(dir).map_err(|e| DigitizeError::OutputWriteFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// What happened to one target page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub page: usize,
    /// Window uploaded for this page.
    pub first: usize,
    pub last: usize,
    /// Rows contributed to the output.
    pub rows: usize,
    pub error: Option<PageError>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Combined rows, or None when no page produced any.
    pub table: Option<Table>,
    /// Where `table` was written.
    pub output_path: Option<PathBuf>,
    pub pages: Vec<PageOutcome>,
    pub run_dir: PathBuf,
}

impl RunOutput {
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.pages.len() - self.succeeded()
    }
}

/// Digitize a PDF on disk.
///
/// Opens the document, resolves the backend and creates a fresh run
/// directory under `config.output_dir`.
///
/// # Errors
/// Only fatal errors: unreadable input, a page range outside the document,
/// no backend, exhausted connection retries, or an output that cannot be
/// written. Pages that produce no data are reported in
/// [`RunOutput::pages`] instead.
pub async fn digitize(
    input: impl AsRef<Path>,
    config: &DigitizeConfig,
) -> Result<RunOutput, DigitizeError> {
    let input = input.as_ref();
    info!("Starting run: {}", input.display());

    let backend = resolve_backend(config)?;
    let document = PdfDocumentSource::open(input, config.max_rendered_pixels).await?;
    let layout = RunLayout::new(
        &config.output_dir,
        document.identity(),
        config.page_window,
        config.output_name.as_deref(),
    );
    let document: SharedPageSource = Arc::new(document);
    digitize_document(document, backend, &layout, config).await
}

/// Run the page loop over an already-open document.
pub async fn digitize_document(
    document: SharedPageSource,
    backend: Arc<dyn InferenceBackend>,
    layout: &RunLayout,
    config: &DigitizeConfig,
) -> Result<RunOutput, DigitizeError> {
    let run_start = Instant::now();
    let total = document.page_count();
    let (start, count) = resolve_selection(total, &config.pages)?;

    layout.create()?;
    let log = RunLog::open(&layout.log_dir)?;
    log.log_config(config, Path::new(document.identity()), start, count)?;
    info!(
        "Digitizing pages {}-{} of {} ({} per window, {})",
        start,
        start + count - 1,
        total,
        config.page_window,
        config.placement
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(count);
    }

    let mut tables: Vec<Table> = Vec::new();
    let mut outcomes = Vec::with_capacity(count);

    for page in start..start + count {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page, count);
        }
        let (first, last) = select_window(total, page, config.page_window, config.placement)?;
        debug!("Page {}: window {}-{}", page, first, last);

        let (file, extracted) =
            stage_and_extract(&backend, &document, page, first, last, config).await?;

        match extracted.filter(|p| !p.entries.is_empty()) {
            Some(page_data) => {
                let rows = page_rows(&page_data, page, config);
                rows.append_csv(layout.intermediate_path(page))?;
                info!("Page {}: {} rows", page, rows.len());

                if let Err(e) = backend.delete_file(&file).await {
                    warn!("Page {}: could not delete {}: {}", page, file.name, e);
                }
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_complete(page, count, rows.len());
                }
                outcomes.push(PageOutcome {
                    page,
                    first,
                    last,
                    rows: rows.len(),
                    error: None,
                });
                tables.push(rows);
            }
            None => {
                let error = PageError::NoData { page, first, last };
                warn!("{}", error);
                log.append(&error.to_string())?;
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_error(page, count, &error.to_string());
                }
                outcomes.push(PageOutcome {
                    page,
                    first,
                    last,
                    rows: 0,
                    error: Some(error),
                });
            }
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.error.is_none()).count();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(count, succeeded);
    }

    let (table, output_path) = if tables.is_empty() {
        log.append("PROCESS COMPLETE: no data extracted")?;
        (None, None)
    } else {
        let combined = Table::concat(&tables);
        combined.write_csv(&layout.output_path)?;
        log.append(&format!(
            "PROCESS COMPLETE: {} rows from {}/{} pages written to {}",
            combined.len(),
            succeeded,
            count,
            layout.output_path.display()
        ))?;
        (Some(combined), Some(layout.output_path.clone()))
    };

    info!(
        "Run complete: {}/{} pages in {:.1}s",
        succeeded,
        count,
        run_start.elapsed().as_secs_f64()
    );

    Ok(RunOutput {
        table,
        output_path,
        pages: outcomes,
        run_dir: layout.run_dir.clone(),
    })
}

/// The configured backend, or a Gemini backend from the environment.
pub fn resolve_backend(config: &DigitizeConfig) -> Result<Arc<dyn InferenceBackend>, DigitizeError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    Ok(Arc::new(GeminiBackend::from_env(config.api_timeout_secs)?))
}

fn page_rows(page: &Page, absolute_page: usize, config: &DigitizeConfig) -> Table {
    page_table(page)
        .with_constant(MODEL_COLUMN, &config.model)
        .with_constant(ABSOLUTE_PAGE_COLUMN, &absolute_page.to_string())
}

/// Stage the window and extract it, re-staging on connection failures.
async fn stage_and_extract(
    backend: &Arc<dyn InferenceBackend>,
    document: &SharedPageSource,
    page: usize,
    first: usize,
    last: usize,
    config: &DigitizeConfig,
) -> Result<(RemoteFile, Option<Page>), DigitizeError> {
    let policy = &config.connection_retry;
    let mut attempt = 0;
    loop {
        let result = async {
            let file = stage_pages(backend, document, first, last, config.as_image).await?;
            let target = TargetOffset::within(page, first, last);
            let extracted = extract_page(backend, &file, target, config).await?;
            Ok::<_, DigitizeError>((file, extracted))
        }
        .await;

        match result {
            Ok(done) => return Ok(done),
            Err(DigitizeError::Remote(e)) if e.is_connection() => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(DigitizeError::ConnectionRetriesExhausted {
                        page,
                        attempts: policy.max_attempts,
                        last_error: e.to_string(),
                    });
                }
                let wait = policy.delay(attempt - 1);
                warn!(
                    "Page {}: connection failed ({}), attempt {}/{}, retrying in {:?}",
                    page, e, attempt, policy.max_attempts, wait
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_retry(page, attempt, &e.to_string());
                }
                sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}
