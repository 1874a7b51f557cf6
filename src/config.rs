//! Configuration types for a digitization run.
//!
//! All run behaviour is controlled through [`DigitizeConfig`], built via its
//! [`DigitizeConfigBuilder`]. Every component receives the config (or the
//! piece of it it needs) explicitly; nothing reads process-wide settings.
//!
//! # Design choice: builder over constructor
//! The run has a dozen knobs, most of which callers never touch. The builder
//! lets callers set only what they care about and rely on documented defaults
//! for the rest, and `build()` is the single place invalid combinations are
//! rejected.

use crate::backend::InferenceBackend;
use crate::error::DigitizeError;
use crate::pipeline::window::TargetOffset;
use crate::progress::ProgressCallback;
use crate::schema::PageShape;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a digitization run.
///
/// Built via [`DigitizeConfig::builder()`] or using
/// [`DigitizeConfig::default()`].
///
/// # Example
/// ```rust
/// use pipeline_digitizer::{DigitizeConfig, Placement};
///
/// let config = DigitizeConfig::builder()
///     .page_window(3)
///     .placement(Placement::Middle)
///     .model("gemini-2.5-pro")
///     .build()
///     .unwrap();
/// assert_eq!(config.page_window, 3);
/// ```
#[derive(Clone)]
pub struct DigitizeConfig {
    /// Number of pages uploaded together when digitizing one target page. Default: 1.
    ///
    /// Directory entries regularly spill over a page break. Sending the
    /// neighbouring page(s) as well lets the model finish an entry that began
    /// on the previous page; the prompt still asks for the target page only.
    pub page_window: usize,

    /// Where the target page sits inside its window. Default: [`Placement::Top`].
    pub placement: Placement,

    /// Which target pages to digitize. Default: all pages.
    pub pages: PageSelection,

    /// Upload a rendered PNG of the page instead of a PDF sub-document. Default: false.
    ///
    /// Only valid with `page_window == 1`; an image holds a single page.
    pub as_image: bool,

    /// Record shape the model is asked to return. Default: [`PageShape::Private`].
    pub shape: PageShape,

    /// Model identifier, e.g. "gemini-2.5-flash", "gemini-2.5-pro".
    pub model: String,

    /// Task prompt. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Maximum tokens the model may generate per page. Default: 40000.
    ///
    /// A dense directory page can hold sixty entries; each costs a few hundred
    /// output tokens as JSON. A response cut at this limit is still decoded
    /// when possible, with a warning.
    pub max_output_tokens: u32,

    /// Retry policy for overloaded-service responses inside a single extraction.
    /// Default: 5 attempts, exponential from 20 s.
    pub extraction_retry: RetryPolicy,

    /// Retry policy for connection failures around a whole page.
    /// Default: 5 attempts, fixed 5 s.
    pub connection_retry: RetryPolicy,

    /// Maximum rendered image dimension in pixels when `as_image` is set. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Root under which each run gets its own timestamped directory.
    /// Default: `outputs/gemini_output`.
    pub output_dir: PathBuf,

    /// File name of the combined CSV. If None, uses `<input stem>.csv`.
    pub output_name: Option<String>,

    /// Pre-constructed inference backend. If None, a Gemini backend is built
    /// from `GEMINI_API_KEY`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Per-request timeout for the default backend, in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DigitizeConfig {
    fn default() -> Self {
        Self {
            page_window: 1,
            placement: Placement::default(),
            pages: PageSelection::default(),
            as_image: false,
            shape: PageShape::default(),
            model: "gemini-2.5-flash".to_string(),
            prompt: None,
            max_output_tokens: 40_000,
            extraction_retry: RetryPolicy::exponential(5, Duration::from_secs(20)),
            connection_retry: RetryPolicy::fixed(5, Duration::from_secs(5)),
            max_rendered_pixels: 2000,
            output_dir: PathBuf::from("outputs").join("gemini_output"),
            output_name: None,
            backend: None,
            api_timeout_secs: 300,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DigitizeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitizeConfig")
            .field("page_window", &self.page_window)
            .field("placement", &self.placement)
            .field("pages", &self.pages)
            .field("as_image", &self.as_image)
            .field("shape", &self.shape)
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("extraction_retry", &self.extraction_retry)
            .field("connection_retry", &self.connection_retry)
            .field("output_dir", &self.output_dir)
            .field("output_name", &self.output_name)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn InferenceBackend>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DigitizeProgressCallback>"),
            )
            .finish()
    }
}

impl DigitizeConfig {
    /// Create a new builder for `DigitizeConfig`.
    pub fn builder() -> DigitizeConfigBuilder {
        DigitizeConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompt text actually sent to the model.
    pub fn prompt_text(&self) -> &str {
        self.prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_EXTRACTION_PROMPT)
    }

    /// The prompt for one request, naming the target page's position.
    pub fn prompt_for(&self, target: TargetOffset) -> String {
        crate::prompts::render(self.prompt_text(), target)
    }
}

/// Builder for [`DigitizeConfig`].
#[derive(Debug)]
pub struct DigitizeConfigBuilder {
    config: DigitizeConfig,
}

impl DigitizeConfigBuilder {
    pub fn page_window(mut self, n: usize) -> Self {
        self.config.page_window = n;
        self
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.config.placement = placement;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn as_image(mut self, v: bool) -> Self {
        self.config.as_image = v;
        self
    }

    pub fn shape(mut self, shape: PageShape) -> Self {
        self.config.shape = shape;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn extraction_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.extraction_retry = policy;
        self
    }

    pub fn connection_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.connection_retry = policy;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.config.output_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DigitizeConfig, DigitizeError> {
        let c = &self.config;
        if c.page_window == 0 {
            return Err(DigitizeError::InvalidConfig(
                "Page window must be ≥ 1".into(),
            ));
        }
        if c.as_image && c.page_window > 1 {
            return Err(DigitizeError::InvalidConfig(format!(
                "Page window is {} but image uploads must be a single page",
                c.page_window
            )));
        }
        if c.extraction_retry.max_attempts == 0 || c.connection_retry.max_attempts == 0 {
            return Err(DigitizeError::InvalidConfig(
                "Retry policies need at least one attempt".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(DigitizeError::InvalidConfig("Model id is empty".into()));
        }
        if let Some(ref name) = c.output_name {
            if !name.ends_with(".csv") {
                return Err(DigitizeError::InvalidConfig(format!(
                    "Output name must be a .csv file, got '{name}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Position of the target page inside its upload window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// The window starts at the target page (target plus following pages).
    #[default]
    Top,
    /// The target sits in the middle, biased toward the front for even windows.
    Middle,
    /// The window ends at the target page (preceding pages plus target).
    Bottom,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Top => "top",
            Placement::Middle => "middle",
            Placement::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Placement {
    type Err = DigitizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Placement::Top),
            "middle" => Ok(Placement::Middle),
            "bottom" => Ok(Placement::Bottom),
            other => Err(DigitizeError::InvalidConfig(format!(
                "Invalid placement '{other}'. Choose from 'top', 'middle', or 'bottom'."
            ))),
        }
    }
}

/// Which target pages of the scan to digitize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page of the document (default).
    #[default]
    All,
    /// `count` consecutive pages starting at `start` (1-indexed).
    Range { start: usize, count: usize },
}

/// How long to wait before retry number `attempt + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// `base * 2^attempt`.
    Exponential { base: Duration },
    /// The same delay every time.
    Fixed(Duration),
}

/// A bounded retry budget plus its backoff function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base } => base.saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Fixed(d) => d,
        }
    }
}
