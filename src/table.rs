//! A small string table with CSV persistence.
//!
//! Every table in the run (per-page rows, the combined output, ground truth)
//! is a header plus rows of text cells. Numeric interpretation happens in
//! the consumer that needs it (the evaluator), so a table round-trips
//! through CSV without loss.

use crate::error::DigitizeError;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the column count.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Like [`Self::column_index`] but fails with `MissingColumn`.
    pub fn require_column(&self, table: &str, name: &str) -> Result<usize, DigitizeError> {
        self.column_index(name)
            .ok_or_else(|| DigitizeError::MissingColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Return a copy with a column holding the same value on every row.
    /// An existing column of that name is overwritten.
    pub fn with_constant(mut self, name: &str, value: &str) -> Self {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.to_string();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.to_string());
                }
            }
        }
        self
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[String]) -> bool) {
        self.rows.retain(|r| keep(r));
    }

    /// Stack tables vertically. Columns are the union in first-seen order;
    /// cells a table lacks are left empty.
    pub fn concat<'a>(tables: impl IntoIterator<Item = &'a Table>) -> Table {
        let tables: Vec<&Table> = tables.into_iter().collect();
        let mut out = Table::default();
        for t in &tables {
            for c in &t.columns {
                if !out.columns.contains(c) {
                    out.columns.push(c.clone());
                }
            }
        }
        for t in tables {
            let map: Vec<usize> = t
                .columns
                .iter()
                .filter_map(|c| out.column_index(c))
                .collect();
            for row in &t.rows {
                let mut cells = vec![String::new(); out.columns.len()];
                for (src, &dst) in map.iter().enumerate() {
                    cells[dst] = row.get(src).cloned().unwrap_or_default();
                }
                out.rows.push(cells);
            }
        }
        out
    }

    // ── CSV ──────────────────────────────────────────────────────────────

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Table, DigitizeError> {
        let path = path.as_ref();
        let read_err = |detail: String| DigitizeError::TableReadFailed {
            path: path.to_path_buf(),
            detail,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| read_err(e.to_string()))?;

        let headers = reader.headers().map_err(|e| read_err(e.to_string()))?;
        // Spreadsheet exports often carry a BOM on the first header.
        let mut table = Table::new(headers.iter().map(|h| h.trim_start_matches('\u{feff}')));

        for record in reader.records() {
            let record = record.map_err(|e| read_err(e.to_string()))?;
            table.push_row(record.iter().map(str::to_string).collect());
        }

        debug!("Read {} rows from {}", table.len(), path.display());
        Ok(table)
    }

    /// Write the table, replacing any existing file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), DigitizeError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| DigitizeError::write_failed(path, e))?;
        self.write_records(&mut writer, true, path)
    }

    /// Append rows to a file. The header is written only when the file is
    /// new or empty.
    pub fn append_csv(&self, path: impl AsRef<Path>) -> Result<(), DigitizeError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DigitizeError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        self.write_records(&mut writer, needs_header, path)
    }

    fn write_records<W: std::io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
        header: bool,
        path: &Path,
    ) -> Result<(), DigitizeError> {
        if header {
            writer
                .write_record(&self.columns)
                .map_err(|e| DigitizeError::write_failed(path, e))?;
        }
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|e| DigitizeError::write_failed(path, e))?;
        }
        writer.flush().map_err(|e| DigitizeError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn ensure_parent(path: &Path) -> Result<(), DigitizeError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| DigitizeError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        _ => Ok(()),
    }
}
