//! Seeded review samples of a digitized run.
//!
//! Reviewers check a handful of pages by hand: the sampled rows go to a CSV
//! and the matching scanned pages to a small PDF, so both can be opened side
//! by side.

use crate::digitize::ABSOLUTE_PAGE_COLUMN;
use crate::error::DigitizeError;
use crate::pipeline::pdf::extract_pages;
use crate::table::Table;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Pick `max(1, floor(fraction * n))` of the `n` distinct pages in `table`.
///
/// Rows whose page cell is not an integer are ignored. The same table, fraction
/// and seed always give the same pages, returned in ascending order.
pub fn sample_pages(table: &Table, fraction: f64, seed: u64) -> Result<Vec<i64>, DigitizeError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(DigitizeError::InvalidConfig(format!(
            "Sample fraction must be in (0, 1], got {fraction}"
        )));
    }
    let col = table.require_column("digitized", ABSOLUTE_PAGE_COLUMN)?;

    let mut seen = HashSet::new();
    let unique: Vec<i64> = table
        .rows
        .iter()
        .filter_map(|row| parse_page(&row[col]))
        .filter(|page| seen.insert(*page))
        .collect();
    if unique.is_empty() {
        return Ok(Vec::new());
    }

    let amount = ((unique.len() as f64 * fraction).floor() as usize).clamp(1, unique.len());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<i64> = rand::seq::index::sample(&mut rng, unique.len(), amount)
        .into_iter()
        .map(|i| unique[i])
        .collect();
    picked.sort_unstable();
    Ok(picked)
}

/// Sample pages from a digitized CSV and write the review pair.
///
/// Returns the sampled page numbers.
pub async fn write_review_sample(
    digitized_csv: &Path,
    scan: &Path,
    fraction: f64,
    seed: u64,
    out_csv: &Path,
    out_pdf: &Path,
) -> Result<Vec<i64>, DigitizeError> {
    let mut table = Table::read_csv(digitized_csv)?;
    let pages = sample_pages(&table, fraction, seed)?;
    if pages.is_empty() {
        return Err(DigitizeError::InvalidConfig(format!(
            "No page numbers found in '{}'",
            digitized_csv.display()
        )));
    }

    let col = table.require_column("digitized", ABSOLUTE_PAGE_COLUMN)?;
    let wanted: HashSet<i64> = pages.iter().copied().collect();
    table.retain_rows(|row| parse_page(&row[col]).is_some_and(|p| wanted.contains(&p)));
    table.write_csv(out_csv)?;

    let scan_pages = scan_page_numbers(&pages);
    let copied = extract_pages(scan, &scan_pages, out_pdf).await?;

    info!(
        "Review sample: {} rows from pages {:?} written to {}, {} scan pages to {}",
        table.len(),
        pages,
        out_csv.display(),
        copied.len(),
        out_pdf.display()
    );
    Ok(pages)
}

/// Sampled pages as scan page numbers; negative pages are skipped.
fn scan_page_numbers(pages: &[i64]) -> Vec<usize> {
    pages
        .iter()
        .filter_map(|&p| match usize::try_from(p) {
            Ok(page) => Some(page),
            Err(_) => {
                warn!("Page {} cannot be a scan page, skipping", p);
                None
            }
        })
        .collect()
}

/// Accepts "12" and "12.0".
fn parse_page(cell: &str) -> Option<i64> {
    let v: f64 = cell.trim().parse().ok()?;
    (v.fract() == 0.0).then_some(v as i64)
}
