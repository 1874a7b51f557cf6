//! Flatten typed pages into table rows.
//!
//! Each entry becomes one row: `Data Year`, `Page Number`, the identifier
//! column(s), then the field columns, in the order given by
//! [`PageShape::columns`]. The page year is copied onto every row.

use crate::error::DigitizeError;
use crate::schema::{Entries, Entry, EntryPart, Page, PageShape};
use crate::table::Table;
use serde_json::Value;

/// Append one row per entry of `page` to `table`.
///
/// `table` must have been created with the page's shape columns.
pub fn flatten_page(page: &Page, table: &mut Table) {
    match &page.entries {
        Entries::Private(v) => push_entries(page, v, table),
        Entries::Gov(v) => push_entries(page, v, table),
        Entries::Combined(v) => push_entries(page, v, table),
        Entries::PrivateExtended(v) => push_entries(page, v, table),
        Entries::GovExtended(v) => push_entries(page, v, table),
    }
}

fn push_entries<I: EntryPart, F: EntryPart>(page: &Page, entries: &[Entry<I, F>], table: &mut Table) {
    for entry in entries {
        let mut row = Vec::with_capacity(table.columns.len());
        row.push(page.yr.to_string());
        row.push(page.pgnum.to_string());
        row.extend(entry.cells());
        table.push_row(row);
    }
}

/// The rows of a single page, with that page's shape columns.
pub fn page_table(page: &Page) -> Table {
    let mut table = Table::new(page.entries.shape().columns());
    flatten_page(page, &mut table);
    table
}

/// Decode raw model JSON under a named shape and flatten it.
pub fn flatten_json(shape_name: &str, value: &Value) -> Result<Table, DigitizeError> {
    let shape: PageShape = shape_name.parse()?;
    let page = shape
        .decode_value(value.clone())
        .map_err(|source| DigitizeError::ResponseDecode {
            shape: shape.name().to_string(),
            source,
        })?;
    Ok(page_table(&page))
}
