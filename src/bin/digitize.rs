//! CLI binary for pipeline-digitizer.
//!
//! A thin shim over the library crate that maps subcommands and flags onto
//! `DigitizeConfig` and the evaluation / sampling helpers.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline_digitizer::{
    clean_handcoded_file, digitize, evaluate_files, purge_files, write_review_sample,
    DigitizeConfig, DigitizeProgressCallback, GeminiBackend, InferenceBackend, PageSelection,
    PageShape, Placement, ProgressCallback, RetryPolicy,
};
use std::collections::HashMap;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    empty_pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening scan…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            empty_pages: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl DigitizeProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Digitizing");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, error: &str) {
        self.bar.println(format!(
            "  {} Page {:>4}  connection retry {}  {}",
            yellow("↻"),
            page_num,
            attempt,
            dim(error)
        ));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, rows: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>4}  {:<10}  {}",
            green("✓"),
            page_num,
            dim(&format!("{rows:>3} rows")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.empty_pages.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}  {}  {}",
            red("✗"),
            page_num,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let empty = self.empty_pages.load(Ordering::SeqCst);
        if empty == 0 {
            eprintln!("{} {} pages digitized", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages digitized  ({} without data)",
                if success_count == 0 { red("✘") } else { yellow("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&empty.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Digitize a whole directory, two pages per upload
  digitize run scans/directory_1948.pdf --page-window 2

  # Pages 40-59 only, government record shape, target page in the middle
  digitize run scans/directory_1948.pdf --pages 40-59 --shape gov --placement middle

  # Clean hand-coded ground truth
  digitize clean-truth handcoded/1948.csv -o handcoded/1948_clean.csv

  # Score a run against ground truth and log the report in the run directory
  digitize evaluate outputs/.../directory_1948.csv handcoded/1948_clean.csv \
      --years 1948 --log-dir outputs/.../logs

  # Draw a 5% review sample
  digitize sample outputs/.../directory_1948.csv scans/directory_1948.pdf \
      --fraction 0.05 --seed 42 --out-csv review.csv --out-pdf review.pdf

  # Delete every file left in remote storage
  digitize purge

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY        Gemini API key (GOOGLE_API_KEY is also accepted)
  DIGITIZE_MODEL        Override model ID
  RUST_LOG              Override log filter (e.g. pipeline_digitizer=debug)

  pdfium is loaded from the working directory first, then from the system
  library path.
"#;

/// Digitize scanned pipeline directories with a multimodal LLM.
#[derive(Parser, Debug)]
#[command(
    name = "digitize",
    version,
    about = "Digitize scanned pipeline directories with a multimodal LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DIGITIZE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DIGITIZE_QUIET")]
    quiet: bool,

    /// Read the API key from this file instead of the environment.
    #[arg(long, global = true, env = "DIGITIZE_API_KEY_FILE")]
    api_key_file: Option<PathBuf>,

    /// Per-request API timeout in seconds.
    #[arg(long, global = true, env = "DIGITIZE_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Digitize pages of a scanned directory into CSV.
    Run(RunArgs),
    /// Compare digitized mileage against cleaned ground truth.
    Evaluate(EvaluateArgs),
    /// Clean a hand-coded ground-truth CSV for evaluation.
    CleanTruth(CleanTruthArgs),
    /// Draw a seeded page sample for manual review.
    Sample(SampleArgs),
    /// Delete every file in remote storage.
    Purge,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Scanned directory PDF.
    input: PathBuf,

    /// Model ID (e.g. gemini-2.5-flash, gemini-2.5-pro).
    #[arg(long, env = "DIGITIZE_MODEL", default_value = "gemini-2.5-flash")]
    model: String,

    /// Record shape: private, gov, combined, private-extended, gov-extended.
    #[arg(long, env = "DIGITIZE_SHAPE", default_value = "private")]
    shape: String,

    /// Pages uploaded together per target page.
    #[arg(short = 'w', long, env = "DIGITIZE_PAGE_WINDOW", default_value_t = 1)]
    page_window: usize,

    /// Target page position in its window: top, middle, bottom.
    #[arg(long, env = "DIGITIZE_PLACEMENT", default_value = "top")]
    placement: String,

    /// Page selection: all, 12, or 12-30.
    #[arg(long, env = "DIGITIZE_PAGES", default_value = "all")]
    pages: String,

    /// Upload a rendered PNG instead of a PDF (single-page windows only).
    #[arg(long, env = "DIGITIZE_AS_IMAGE")]
    as_image: bool,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "DIGITIZE_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Max output tokens per page.
    #[arg(long, env = "DIGITIZE_MAX_TOKENS", default_value_t = 40_000)]
    max_tokens: u32,

    /// Attempts per page when the model is overloaded.
    #[arg(long, env = "DIGITIZE_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    /// First backoff wait in seconds; doubles each attempt.
    #[arg(long, env = "DIGITIZE_RETRY_BASE", default_value_t = 20)]
    retry_base: u64,

    /// Attempts per page on connection failures.
    #[arg(long, env = "DIGITIZE_CONNECTION_RETRIES", default_value_t = 5)]
    connection_retries: u32,

    /// Root directory for run outputs.
    #[arg(short, long, env = "DIGITIZE_OUTPUT_DIR", default_value = "outputs/gemini_output")]
    output_dir: PathBuf,

    /// Name of the combined CSV (default: <input stem>.csv).
    #[arg(long, env = "DIGITIZE_OUTPUT_NAME")]
    output_name: Option<String>,

    /// Disable the progress bar.
    #[arg(long, env = "DIGITIZE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Digitized CSV.
    predicted: PathBuf,

    /// Cleaned ground-truth CSV.
    truth: PathBuf,

    /// Data years to score: 1948 or 1948-1950.
    #[arg(long)]
    years: String,

    /// Restrict both tables to one page number.
    #[arg(long)]
    page: Option<i64>,

    /// Append the report to <log-dir>/__log.txt.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CleanTruthArgs {
    /// Hand-coded CSV.
    input: PathBuf,

    /// Where to write the cleaned CSV.
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Digitized CSV with an absolute_page_n column.
    digitized: PathBuf,

    /// The scan the CSV was digitized from.
    scan: PathBuf,

    /// Fraction of distinct pages to sample.
    #[arg(long, default_value_t = 0.05)]
    fraction: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long)]
    out_csv: PathBuf,

    #[arg(long)]
    out_pdf: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Run(args) => run(&cli, args, show_progress).await,
        Command::Evaluate(args) => {
            let years = parse_years(&args.years)?;
            let report = evaluate_files(
                &args.predicted,
                &args.truth,
                years,
                args.page,
                args.log_dir.as_deref(),
            )
            .context("Evaluation failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
            Ok(())
        }
        Command::CleanTruth(args) => {
            let clean = clean_handcoded_file(&args.input, &args.output)
                .with_context(|| format!("Failed to clean {:?}", args.input))?;
            if !cli.quiet {
                eprintln!(
                    "{} {} rows  →  {}",
                    green("✔"),
                    clean.len(),
                    bold(&args.output.display().to_string())
                );
            }
            Ok(())
        }
        Command::Sample(args) => {
            let pages = write_review_sample(
                &args.digitized,
                &args.scan,
                args.fraction,
                args.seed,
                &args.out_csv,
                &args.out_pdf,
            )
            .await
            .context("Sampling failed")?;
            if !cli.quiet {
                eprintln!("{} sampled pages {:?}", green("✔"), pages);
            }
            Ok(())
        }
        Command::Purge => {
            let backend = build_backend(&cli).await?;
            let summary = purge_files(&backend).await.context("Failed to list remote files")?;
            if !cli.quiet {
                eprintln!(
                    "{} {} files deleted, {} failed",
                    if summary.failed == 0 { green("✔") } else { yellow("⚠") },
                    summary.deleted,
                    summary.failed
                );
            }
            Ok(())
        }
    }
}

async fn run(cli: &Cli, args: &RunArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn DigitizeProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, args, progress_cb).await?;

    let output = digitize(&args.input, &config)
        .await
        .context("Digitization failed")?;

    if !cli.quiet {
        match output.output_path {
            Some(ref path) => eprintln!(
                "{}  {}/{} pages  →  {}",
                if output.failed() == 0 { green("✔") } else { yellow("⚠") },
                output.succeeded(),
                output.pages.len(),
                bold(&path.display().to_string()),
            ),
            None => eprintln!(
                "{} no data extracted  {}",
                red("✘"),
                dim(&output.run_dir.display().to_string())
            ),
        }
    }
    Ok(())
}

/// Map CLI args to `DigitizeConfig`.
async fn build_config(
    cli: &Cli,
    args: &RunArgs,
    progress: Option<ProgressCallback>,
) -> Result<DigitizeConfig> {
    let shape: PageShape = args.shape.parse()?;
    let placement: Placement = args.placement.parse()?;

    let mut builder = DigitizeConfig::builder()
        .model(args.model.clone())
        .shape(shape)
        .page_window(args.page_window)
        .placement(placement)
        .pages(parse_pages(&args.pages)?)
        .as_image(args.as_image)
        .max_output_tokens(args.max_tokens)
        .extraction_retry(RetryPolicy::exponential(
            args.max_retries,
            Duration::from_secs(args.retry_base),
        ))
        .connection_retry(RetryPolicy::fixed(args.connection_retries, Duration::from_secs(5)))
        .output_dir(args.output_dir.clone())
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }
    if let Some(ref name) = args.output_name {
        builder = builder.output_name(name.clone());
    }
    if cli.api_key_file.is_some() {
        builder = builder.backend(build_backend(cli).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn build_backend(cli: &Cli) -> Result<Arc<dyn InferenceBackend>> {
    let backend = match cli.api_key_file {
        Some(ref path) => GeminiBackend::new(read_key_file(path).await?, cli.api_timeout)?,
        None => GeminiBackend::from_env(cli.api_timeout)?,
    };
    Ok(Arc::new(backend))
}

async fn read_key_file(path: &Path) -> Result<String> {
    let key = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read API key from {:?}", path))?;
    let key = key.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("API key file {:?} is empty", path);
    }
    Ok(key)
}

/// Parse `--pages`: `all`, `12`, or `12-30` (inclusive).
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();
    if s == "all" {
        return Ok(PageSelection::All);
    }

    let (start, end) = match s.split_once('-') {
        Some((a, b)) => (
            a.trim().parse::<usize>().context("Invalid start page in range")?,
            b.trim().parse::<usize>().context("Invalid end page in range")?,
        ),
        None => {
            let p = s.parse::<usize>().context("Invalid page number")?;
            (p, p)
        }
    };
    if start < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
    }
    if start > end {
        anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
    }
    Ok(PageSelection::Range {
        start,
        count: end - start + 1,
    })
}

/// Parse `--years`: `1948` or `1948-1950`.
fn parse_years(s: &str) -> Result<RangeInclusive<i32>> {
    let (a, b) = s.trim().split_once('-').unwrap_or((s.trim(), s.trim()));
    let first: i32 = a.trim().parse().context("Invalid first year")?;
    let last: i32 = b.trim().parse().context("Invalid last year")?;
    if first > last {
        anyhow::bail!("Invalid year range '{}': first must be <= last", s);
    }
    Ok(first..=last)
}
