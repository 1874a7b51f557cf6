//! Page-loop integration tests against in-memory fakes.
//!
//! No pdfium library and no network are needed: [`FakeScan`] writes stand-in
//! files for each window and [`FakeService`] stores uploads in memory and
//! answers generation requests from a closure.

use async_trait::async_trait;
use pipeline_digitizer::backend::{GenerateRequest, GenerateResponse};
use pipeline_digitizer::digitize::{ABSOLUTE_PAGE_COLUMN, MODEL_COLUMN};
use pipeline_digitizer::pipeline::pdf::{PageSource, SharedPageSource};
use pipeline_digitizer::{
    digitize_document, BackendError, DigitizeConfig, DigitizeError, DigitizeProgressCallback,
    InferenceBackend, PageError, PageSelection, Placement, RemoteFile, RetryPolicy, RunLayout, Table,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeScan {
    pages: usize,
}

impl PageSource for FakeScan {
    fn identity(&self) -> &str {
        "scan"
    }

    fn page_count(&self) -> usize {
        self.pages
    }

    fn write_pages(&self, first: usize, last: usize, dest: &Path) -> Result<(), DigitizeError> {
        std::fs::write(dest, format!("%PDF pages {first}-{last}")).map_err(|e| {
            DigitizeError::OutputWriteFailed {
                path: dest.to_path_buf(),
                source: e,
            }
        })
    }

    fn write_page_image(&self, page: usize, dest: &Path) -> Result<(), DigitizeError> {
        self.write_pages(page, page, dest)
    }
}

type Responder = dyn Fn(&GenerateRequest) -> Result<GenerateResponse, BackendError> + Send + Sync;

struct FakeService {
    files: Mutex<Vec<RemoteFile>>,
    uploads: Mutex<Vec<String>>,
    deletes: Mutex<Vec<String>>,
    generated: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    /// Uploads that fail with a connection error before uploads succeed.
    failing_uploads: AtomicUsize,
    failing_deletes: AtomicBool,
    respond: Box<Responder>,
}

impl FakeService {
    fn new(
        respond: impl Fn(&GenerateRequest) -> Result<GenerateResponse, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            generated: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            failing_uploads: AtomicUsize::new(0),
            failing_deletes: AtomicBool::new(false),
            respond: Box::new(respond),
        })
    }

    fn stored(display_name: &str) -> RemoteFile {
        RemoteFile {
            name: format!("files/{display_name}"),
            display_name: display_name.to_string(),
            uri: format!("https://files.test/{display_name}"),
            mime_type: "application/pdf".into(),
        }
    }

    fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn generated(&self) -> Vec<String> {
        self.generated.lock().unwrap().clone()
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for FakeService {
    async fn list_files(&self) -> Result<Vec<RemoteFile>, BackendError> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        _mime_type: &str,
    ) -> Result<RemoteFile, BackendError> {
        self.uploads.lock().unwrap().push(display_name.to_string());
        if self
            .failing_uploads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Connection("connection reset".into()));
        }
        assert!(path.exists(), "staged file must exist during upload");
        let file = Self::stored(display_name);
        self.files.lock().unwrap().push(file.clone());
        Ok(file)
    }

    async fn delete_file(&self, file: &RemoteFile) -> Result<(), BackendError> {
        self.deletes.lock().unwrap().push(file.display_name.clone());
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::from_status(500, "internal error"));
        }
        self.files.lock().unwrap().retain(|f| f.name != file.name);
        Ok(())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        self.generated
            .lock()
            .unwrap()
            .push(request.file.display_name.clone());
        self.prompts.lock().unwrap().push(request.prompt.clone());
        (self.respond)(request)
    }
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    retries: AtomicUsize,
}

impl DigitizeProgressCallback for Recorder {
    fn on_page_start(&self, _: usize, _: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_retry(&self, _: usize, _: u32, _: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _: usize, _: usize, _: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _: usize, _: usize, _: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn entry(company: &str, miles: f64) -> String {
    format!(
        r#"{{"state_heading": "TEXAS", "company": "{company}", "fuel": "NATURAL GAS",
            "new_construction": "TRUE", "construction_complete": "TRUE",
            "length": {miles}, "origin_state": "TX", "terminus_state": "LA",
            "inter_or_intra": "INTERSTATE"}}"#
    )
}

fn page_json(pgnum: i64, entries: &[String]) -> String {
    format!(
        r#"{{"pgnum": {pgnum}, "yr": 1948, "entries": [{}]}}"#,
        entries.join(",")
    )
}

fn reply(text: String) -> Result<GenerateResponse, BackendError> {
    Ok(GenerateResponse {
        text: Some(text),
        finish_reason: Some("STOP".into()),
        output_tokens: 512,
    })
}

/// Two entries for every page whose window starts at an odd page, none otherwise.
fn odd_pages_have_data(request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
    let first: i64 = request
        .file
        .display_name
        .split('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    if first % 2 == 1 {
        reply(page_json(
            first + 100,
            &[entry("Texas Eastern", 12.5), entry("United Gas", 3.0)],
        ))
    } else {
        reply(page_json(first + 100, &[]))
    }
}

fn scan(pages: usize) -> SharedPageSource {
    Arc::new(FakeScan { pages })
}

fn dyn_service(s: &Arc<FakeService>) -> Arc<dyn InferenceBackend> {
    s.clone()
}

fn config() -> pipeline_digitizer::config::DigitizeConfigBuilder {
    DigitizeConfig::builder()
        .model("test-model")
        .extraction_retry(RetryPolicy::exponential(3, Duration::from_millis(1)))
        .connection_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pages_with_data_are_written_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(odd_pages_have_data);
    let recorder = Arc::new(Recorder::default());
    let config = config()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let out = digitize_document(scan(3), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.pages.len(), 3);
    assert_eq!(out.succeeded(), 2);
    assert_eq!(out.failed(), 1);
    assert!(matches!(
        out.pages[1].error,
        Some(PageError::NoData { page: 2, first: 2, last: 2 })
    ));

    let table = out.table.expect("rows were extracted");
    assert_eq!(table.len(), 4);
    let pages: Vec<&str> = (0..table.len())
        .filter_map(|r| table.get(r, ABSOLUTE_PAGE_COLUMN))
        .collect();
    assert_eq!(pages, vec!["1", "1", "3", "3"]);
    assert_eq!(table.get(0, MODEL_COLUMN), Some("test-model"));
    assert_eq!(table.get(0, "Page Number"), Some("101"));
    assert_eq!(table.get(2, "Data Year"), Some("1948"));

    let written = Table::read_csv(out.output_path.as_ref().unwrap()).unwrap();
    assert_eq!(written, table);
    assert!(layout.intermediate_path(1).exists());
    assert!(!layout.intermediate_path(2).exists());
    assert!(layout.intermediate_path(3).exists());

    // Successful pages free their upload; the empty page keeps its upload.
    assert_eq!(service.deletes(), vec!["1-1__scan", "3-3__scan"]);
    assert_eq!(service.uploads(), vec!["1-1__scan", "2-2__scan", "3-3__scan"]);

    let log = std::fs::read_to_string(layout.log_dir.join("__log.txt")).unwrap();
    assert!(log.contains("CONFIG PARAMETERS"));
    assert!(log.contains("Page 2: no data extracted from pages 2-2"));
    assert!(log.contains("PROCESS COMPLETE"));

    assert_eq!(recorder.started.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn run_without_data_writes_no_combined_file() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[])));
    let config = config().build().unwrap();

    let out = digitize_document(scan(2), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.succeeded(), 0);
    assert!(out.table.is_none());
    assert!(out.output_path.is_none());
    assert!(!layout.output_path.exists());
}

#[tokio::test]
async fn windows_follow_placement_and_document_end() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[entry("Lone Star Gas", 1.0)])));
    let config = config()
        .page_window(2)
        .pages(PageSelection::Range { start: 2, count: 2 })
        .build()
        .unwrap();

    let out = digitize_document(scan(3), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    let windows: Vec<(usize, usize, usize)> =
        out.pages.iter().map(|p| (p.page, p.first, p.last)).collect();
    assert_eq!(windows, vec![(2, 2, 3), (3, 2, 3)]);
    // The second page finds nothing stored (the first deleted its upload) and re-uploads.
    assert_eq!(service.uploads(), vec!["2-3__scan", "2-3__scan"]);
    assert_eq!(service.generated().len(), 2);
}

#[tokio::test]
async fn prompt_names_target_position_in_window() {
    let dir = tempfile::tempdir().unwrap();
    let service = FakeService::new(|_| reply(page_json(1, &[entry("Panhandle Eastern", 6.0)])));

    let bottom = config()
        .page_window(3)
        .placement(Placement::Bottom)
        .pages(PageSelection::Range { start: 4, count: 1 })
        .build()
        .unwrap();
    let layout = RunLayout::at(dir.path().join("bottom"), "scan.csv");
    let out = digitize_document(scan(5), dyn_service(&service), &layout, &bottom)
        .await
        .unwrap();
    assert_eq!((out.pages[0].first, out.pages[0].last), (2, 4));

    let middle = config()
        .page_window(3)
        .placement(Placement::Middle)
        .pages(PageSelection::Range { start: 3, count: 1 })
        .build()
        .unwrap();
    let layout = RunLayout::at(dir.path().join("middle"), "scan.csv");
    let out = digitize_document(scan(5), dyn_service(&service), &layout, &middle)
        .await
        .unwrap();
    assert_eq!((out.pages[0].first, out.pages[0].last), (2, 4));

    let prompts = service.prompts();
    assert!(prompts[0].contains("extract entries from page 3 of the 3 attached pages only"));
    assert!(prompts[1].contains("extract entries from page 2 of the 3 attached pages only"));
}

#[tokio::test]
async fn failed_remote_delete_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[entry("Southern Natural Gas", 5.5)])));
    service.failing_deletes.store(true, Ordering::SeqCst);
    let config = config().build().unwrap();

    let out = digitize_document(scan(2), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.succeeded(), 2);
    assert_eq!(out.failed(), 0);
    assert_eq!(service.deletes(), vec!["1-1__scan", "2-2__scan"]);
    assert!(layout.intermediate_path(1).exists());
    assert!(layout.intermediate_path(2).exists());
    assert_eq!(out.table.map(|t| t.len()), Some(2));
}

#[tokio::test]
async fn rerun_appends_rows_under_a_single_header() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(7, &[entry("Tennessee Gas", 20.0)])));
    let config = config()
        .pages(PageSelection::Range { start: 1, count: 1 })
        .build()
        .unwrap();

    for _ in 0..2 {
        digitize_document(scan(1), dyn_service(&service), &layout, &config)
            .await
            .unwrap();
    }

    let text = std::fs::read_to_string(layout.intermediate_path(1)).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with("Data Year")).count(), 1);
    assert_eq!(Table::read_csv(layout.intermediate_path(1)).unwrap().len(), 2);
}

#[tokio::test]
async fn stored_window_is_reused_without_upload() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[entry("Northern Natural", 4.0)])));
    service
        .files
        .lock()
        .unwrap()
        .push(FakeService::stored("1-1__scan"));
    let config = config().build().unwrap();

    let out = digitize_document(scan(1), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.succeeded(), 1);
    assert!(service.uploads().is_empty());
    assert_eq!(service.generated(), vec!["1-1__scan"]);
    assert_eq!(service.deletes(), vec!["1-1__scan"]);
}

#[tokio::test]
async fn connection_failures_restage_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[entry("El Paso Natural Gas", 9.0)])));
    service.failing_uploads.store(2, Ordering::SeqCst);
    let recorder = Arc::new(Recorder::default());
    let config = config()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let out = digitize_document(scan(1), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.succeeded(), 1);
    assert_eq!(service.uploads().len(), 3);
    assert_eq!(recorder.retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_connection_retries_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(|_| reply(page_json(1, &[entry("Trunkline Gas", 2.0)])));
    service.failing_uploads.store(usize::MAX, Ordering::SeqCst);
    let config = config().build().unwrap();

    let err = digitize_document(scan(2), dyn_service(&service), &layout, &config)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DigitizeError::ConnectionRetriesExhausted { page: 1, attempts: 3, .. }
    ));
    assert_eq!(service.uploads().len(), 3);
    assert!(service.generated().is_empty());
}

#[tokio::test]
async fn connection_failure_during_generation_is_retried_at_page_level() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let service = FakeService::new(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(BackendError::Connection("timed out".into()))
        } else {
            reply(page_json(1, &[entry("Transcontinental", 30.0)]))
        }
    });
    let config = config().build().unwrap();

    let out = digitize_document(scan(1), dyn_service(&service), &layout, &config)
        .await
        .unwrap();

    assert_eq!(out.succeeded(), 1);
    // The second attempt found the first upload still stored.
    assert_eq!(service.uploads().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn range_past_the_end_is_rejected_before_any_upload() {
    let dir = tempfile::tempdir().unwrap();
    let layout = RunLayout::at(dir.path().join("run"), "scan.csv");
    let service = FakeService::new(odd_pages_have_data);
    let config = config()
        .pages(PageSelection::Range { start: 8, count: 5 })
        .build()
        .unwrap();

    let err = digitize_document(scan(10), dyn_service(&service), &layout, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, DigitizeError::RangeExceedsDocument { .. }));
    assert!(service.uploads().is_empty());
}
