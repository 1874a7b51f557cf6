//! Human-readable log file kept inside each run directory.
//!
//! Complements `tracing` output: the run log travels with the CSVs, so the
//! parameters, failed pages and evaluation reports of a run stay next to
//! its results.

use crate::config::DigitizeConfig;
use crate::error::DigitizeError;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOG_FILE: &str = "__log.txt";
pub const PROMPT_FILE: &str = "prompt_text.txt";

#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
    path: PathBuf,
}

impl RunLog {
    /// Open (creating if needed) `<log_dir>/__log.txt`.
    pub fn open(log_dir: impl AsRef<Path>) -> Result<Self, DigitizeError> {
        let dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| DigitizeError::OutputWriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        let path = dir.join(LOG_FILE);
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn append(&self, message: &str) -> Result<(), DigitizeError> {
        let line = format!("[{}] {}\n", Local::now().format("%H:%M:%S"), message);
        self.write_raw(&line)
    }

    /// Append a block verbatim (no timestamp), e.g. a JSON report.
    pub fn append_block(&self, block: &str) -> Result<(), DigitizeError> {
        let mut text = block.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.write_raw(&text)
    }

    /// Record the run parameters and save the prompt next to the log.
    pub fn log_config(
        &self,
        config: &DigitizeConfig,
        input: &Path,
        start: usize,
        count: usize,
    ) -> Result<(), DigitizeError> {
        let block = format!(
            "{rule}\nCONFIG PARAMETERS\n{rule}\n\
             Started: {started}\n\
             Input PDF: {input}\n\
             Model: {model}\n\
             Record shape: {shape}\n\
             Start page: {start}\n\
             Number of pages: {count}\n\
             Page window: {window}\n\
             Page placement: {placement}\n\
             Upload as image: {as_image}\n\
             Max output tokens: {tokens}\n\
             Extraction retries: {ex_attempts}\n\
             Connection retries: {conn_attempts}\n\
             {rule}\n",
            rule = "=".repeat(50),
            started = Local::now().format("%Y-%m-%d %H:%M:%S"),
            input = input.display(),
            model = config.model,
            shape = config.shape,
            window = config.page_window,
            placement = config.placement,
            as_image = config.as_image,
            tokens = config.max_output_tokens,
            ex_attempts = config.extraction_retry.max_attempts,
            conn_attempts = config.connection_retry.max_attempts,
        );
        self.write_raw(&block)?;

        let prompt_path = self.dir.join(PROMPT_FILE);
        std::fs::write(&prompt_path, config.prompt_text()).map_err(|e| {
            DigitizeError::OutputWriteFailed {
                path: prompt_path,
                source: e,
            }
        })
    }

    fn write_raw(&self, text: &str) -> Result<(), DigitizeError> {
        let write_err = |e| DigitizeError::OutputWriteFailed {
            path: self.path.clone(),
            source: e,
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(write_err)?;
        f.write_all(text.as_bytes()).map_err(write_err)
    }
}
