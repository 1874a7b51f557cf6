//! Clean hand-coded ground truth into the columns the evaluator reads.
//!
//! Coders record pipelines in their own vocabulary ("Extension",
//! "Completed in 1949", "Inter", "yes?"). Each rule below maps one coder
//! column onto the digitized vocabulary so both tables can be compared
//! cell for cell.

use crate::error::DigitizeError;
use crate::schema::{Flag, Jurisdiction};
use crate::table::Table;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::info;

// ── Coder columns ────────────────────────────────────────────────────────

const IN_YEAR: &str = "Data year";
const IN_COMPANY: &str = "Company";
const IN_ORIGIN: &str = "Origin State";
const IN_TERMINUS: &str = "Terminus State";
const IN_FUEL: &str = "Fuel Type";
const IN_WORK: &str = "Type of Construction Work";
const IN_STATUS: &str = "Construction Completion Status";
const IN_JURISDICTION: &str = "Inter/Intra-State?";
const IN_LENGTH: &str = "Length (mi)";
const IN_PARALLEL: &str = "Parallel/Loop?";
const IN_CONNECTION: &str = "Connection to existing line?";
const IN_FUNCTION: &str = "Pipeline Function";
const IN_PAGE: &str = "Page Number";

const TABLE: &str = "hand-coded";

/// Strips descriptors coders append after the function keyword.
static RE_FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(TRANSMISSION|DISTRIBUTION|GATHERING|FIELDING)").unwrap()
});

/// Clean a hand-coded table.
///
/// Output columns: `Data Year`, `Pipeline Company`, `Fuel Type`,
/// `New Construction`, `Construction Complete`, `Pipeline Length`,
/// `Origin State`, `Terminus State`, `Interstate or Intrastate`, then
/// `Parallel or Loop`, `Connection`, `Function` and `Page Number` for
/// whichever of those the input has.
pub fn clean_handcoded(raw: &Table) -> Result<Table, DigitizeError> {
    let col = |name: &str| raw.require_column(TABLE, name);
    let year = col(IN_YEAR)?;
    let company = col(IN_COMPANY)?;
    let fuel = col(IN_FUEL)?;
    let work = col(IN_WORK)?;
    let status = col(IN_STATUS)?;
    let length = col(IN_LENGTH)?;
    let origin = col(IN_ORIGIN)?;
    let terminus = col(IN_TERMINUS)?;
    let jurisdiction = col(IN_JURISDICTION)?;

    let rules: [(&str, &str, fn(&str) -> String); 4] = [
        ("Parallel or Loop", IN_PARALLEL, parallel),
        ("Connection", IN_CONNECTION, connection),
        ("Function", IN_FUNCTION, function),
        ("Page Number", IN_PAGE, page_number),
    ];
    let optional: Vec<(&str, usize, fn(&str) -> String)> = rules
        .into_iter()
        .filter_map(|(out, input, rule)| raw.column_index(input).map(|i| (out, i, rule)))
        .collect();

    let mut columns = vec![
        "Data Year",
        "Pipeline Company",
        "Fuel Type",
        "New Construction",
        "Construction Complete",
        "Pipeline Length",
        "Origin State",
        "Terminus State",
        "Interstate or Intrastate",
    ];
    columns.extend(optional.iter().map(|(out, _, _)| *out));
    let mut clean = Table::new(columns);

    for (i, raw_row) in raw.rows.iter().enumerate() {
        let row: Vec<String> = raw_row.iter().map(|c| tidy(c)).collect();
        let mut out = vec![
            data_year(&row[year], i)?,
            row[company].clone(),
            fuel_type(&row[fuel]),
            new_construction(&row[work]),
            construction_complete(&row[status]),
            pipeline_length(&row[length], i)?,
            row[origin].clone(),
            row[terminus].clone(),
            inter_or_intra(&row[jurisdiction]),
        ];
        out.extend(optional.iter().map(|(_, idx, rule)| rule(&row[*idx])));
        clean.push_row(out);
    }
    Ok(clean)
}

/// Read a hand-coded CSV, clean it and write the result.
pub fn clean_handcoded_file(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<Table, DigitizeError> {
    let clean = clean_handcoded(&Table::read_csv(input.as_ref())?)?;
    clean.write_csv(output.as_ref())?;
    info!(
        "Cleaned {} hand-coded rows into {}",
        clean.len(),
        output.as_ref().display()
    );
    Ok(clean)
}

// ── Rules ────────────────────────────────────────────────────────────────

fn tidy(cell: &str) -> String {
    cell.trim().replace('?', "")
}

fn is_sentinel(v: &str) -> bool {
    v == Flag::Unknown.as_str() || v == Flag::NotApplicable.as_str()
}

fn bool_cell(v: bool) -> String {
    let flag = if v { Flag::True } else { Flag::False };
    flag.to_string()
}

fn data_year(v: &str, row: usize) -> Result<String, DigitizeError> {
    let invalid = || DigitizeError::InvalidCell {
        column: IN_YEAR.to_string(),
        row,
        value: v.to_string(),
    };
    let year: f64 = v.parse().map_err(|_| invalid())?;
    if year.fract() != 0.0 {
        return Err(invalid());
    }
    Ok((year as i64).to_string())
}

fn fuel_type(v: &str) -> String {
    v.to_uppercase().replace("PRODUCTS", "PRODUCT")
}

/// New lines and extensions count as new construction.
fn new_construction(v: &str) -> String {
    if is_sentinel(v) {
        return v.to_string();
    }
    let work = v.to_lowercase();
    bool_cell(work == "new" || work == "extension")
}

fn construction_complete(v: &str) -> String {
    if is_sentinel(v) {
        return v.to_string();
    }
    bool_cell(v.to_lowercase().starts_with("complete"))
}

fn inter_or_intra(v: &str) -> String {
    let upper = v.to_uppercase();
    match upper.as_str() {
        "INTER" => Jurisdiction::Interstate.to_string(),
        "INTRA" => Jurisdiction::Intrastate.to_string(),
        _ => upper,
    }
}

/// Miles, with `UNK` → `-1` and `NA` → `-2`. Several mileages separated by
/// semicolons are summed.
fn pipeline_length(v: &str, row: usize) -> Result<String, DigitizeError> {
    let code = |part: &str| match part.to_uppercase().as_str() {
        "UNK" => Some(-1.0),
        "NA" => Some(-2.0),
        _ => None,
    };
    let parts: Vec<&str> = v.split(';').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok(String::new());
    }
    if parts.len() == 1 {
        if let Some(c) = code(parts[0]) {
            return Ok(format!("{c}"));
        }
    }

    let mut total = 0.0;
    let mut any_miles = false;
    for part in &parts {
        if code(part).is_some() {
            continue;
        }
        let miles: f64 = part.parse().map_err(|_| DigitizeError::InvalidCell {
            column: IN_LENGTH.to_string(),
            row,
            value: v.to_string(),
        })?;
        total += miles;
        any_miles = true;
    }
    if any_miles {
        Ok(format!("{total}"))
    } else {
        Ok(format!("{}", code(parts[0]).unwrap_or(-1.0)))
    }
}

fn yes_no(v: &str) -> Option<String> {
    match v.to_uppercase().as_str() {
        "YES" => Some(Flag::True.to_string()),
        "NO" => Some(Flag::False.to_string()),
        _ => None,
    }
}

fn parallel(v: &str) -> String {
    yes_no(v).unwrap_or_else(|| v.to_uppercase())
}

fn connection(v: &str) -> String {
    yes_no(v).unwrap_or_else(|| match v.to_uppercase().as_str() {
        "MAYBE" => Flag::Unknown.to_string(),
        other => other.to_string(),
    })
}

fn function(v: &str) -> String {
    let upper = v.to_uppercase();
    match RE_FUNCTION.captures(&upper) {
        Some(caps) => caps[1].to_string(),
        None => upper,
    }
}

fn page_number(v: &str) -> String {
    match v.parse::<f64>() {
        Ok(p) if p.fract() == 0.0 => format!("{}", p as i64),
        _ => v.to_string(),
    }
}
