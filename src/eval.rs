//! Mileage accuracy of a digitized table against hand-coded ground truth.
//!
//! Both tables are reduced to summed pipeline miles per bucket (overall,
//! per year, per category value, and the per-year "new, complete, natural
//! gas" series) and each predicted bucket is compared with its true
//! counterpart as a ratio and as a relative error.

use crate::error::DigitizeError;
use crate::runlog::RunLog;
use crate::schema::{Flag, FuelType, Jurisdiction};
use crate::table::Table;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::info;

pub const YEAR_COLUMN: &str = "Data Year";
pub const PAGE_COLUMN: &str = "Page Number";
const LENGTH_COLUMNS: &[&str] = &["Pipeline Length", "Total Pipeline Length"];
const FUEL_COLUMNS: &[&str] = &["Fuel Type", "Fuel Type Inferred"];
const NEW_COLUMN: &str = "New Construction";
const COMPLETE_COLUMN: &str = "Construction Complete";
const JURISDICTION_COLUMN: &str = "Interstate or Intrastate";

/// Length codes that carry no mileage.
const UNKNOWN_LENGTH: f64 = -1.0;
const NOT_APPLICABLE_LENGTH: f64 = -2.0;

/// One compared bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    Value(f64),
    /// True and predicted mileage are both zero. Serialized as `null`.
    Undefined,
    /// True mileage is zero but mileage was predicted. Serialized as `-999`.
    Flagged,
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Score::Value(v) => s.serialize_f64(*v),
            Score::Undefined => s.serialize_none(),
            Score::Flagged => s.serialize_i32(-999),
        }
    }
}

/// `(predicted / true, |predicted - true| / true)` under the zero-division policy.
pub fn score(predicted: f64, truth: f64) -> (Score, Score) {
    if truth > 0.0 {
        (
            Score::Value(predicted / truth),
            Score::Value((predicted - truth).abs() / truth),
        )
    } else if predicted > 0.0 {
        (Score::Flagged, Score::Flagged)
    } else {
        (Score::Undefined, Score::Undefined)
    }
}

/// One metric over every bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MileageBreakdown {
    #[serde(rename = "Total")]
    pub total: Score,
    #[serde(rename = "Data Year")]
    pub by_year: BTreeMap<i32, Score>,
    #[serde(rename = "Fuel Type")]
    pub fuel_type: BTreeMap<String, Score>,
    #[serde(rename = "New Construction")]
    pub new_construction: BTreeMap<String, Score>,
    #[serde(rename = "Construction Complete")]
    pub construction_complete: BTreeMap<String, Score>,
    #[serde(rename = "Interstate or Intrastate")]
    pub jurisdiction: BTreeMap<String, Score>,
    /// Length quartiles. Reported but not computed.
    #[serde(rename = "Pipeline Length")]
    pub length_quartiles: BTreeMap<String, Option<f64>>,
    #[serde(rename = "New Complete Natural Gas by Year")]
    pub new_complete_gas: BTreeMap<i32, Score>,
    #[serde(rename = "New Complete Natural Gas Interstate by Year")]
    pub new_complete_gas_interstate: BTreeMap<i32, Score>,
    #[serde(rename = "New Complete Natural Gas Intrastate by Year")]
    pub new_complete_gas_intrastate: BTreeMap<i32, Score>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub mi_pred_over_true: MileageBreakdown,
    pub mi_pct_err: MileageBreakdown,
}

/// Score `predicted` against `truth`, restricted to `years` and, if given,
/// a single page number.
pub fn evaluate(
    predicted: &Table,
    truth: &Table,
    years: RangeInclusive<i32>,
    page: Option<i64>,
) -> Result<EvaluationReport, DigitizeError> {
    let pred = Totals::of(&prepare(predicted, "predicted", &years, page)?, &years);
    let real = Totals::of(&prepare(truth, "truth", &years, page)?, &years);

    let (total_ratio, total_err) = score(pred.total, real.total);
    let (year_ratio, year_err) = split(&pred.by_year, &real.by_year);
    let (fuel_ratio, fuel_err) = split(&pred.fuel, &real.fuel);
    let (new_ratio, new_err) = split(&pred.new_construction, &real.new_construction);
    let (done_ratio, done_err) = split(&pred.complete, &real.complete);
    let (jur_ratio, jur_err) = split(&pred.jurisdiction, &real.jurisdiction);
    let (gas_ratio, gas_err) = split(&pred.gas, &real.gas);
    let (inter_ratio, inter_err) = split(&pred.gas_interstate, &real.gas_interstate);
    let (intra_ratio, intra_err) = split(&pred.gas_intrastate, &real.gas_intrastate);

    let quartiles = || -> BTreeMap<String, Option<f64>> {
        ["Q1", "Q2", "Q3", "Q4"]
            .into_iter()
            .map(|q| (q.to_string(), None))
            .collect()
    };

    Ok(EvaluationReport {
        mi_pred_over_true: MileageBreakdown {
            total: total_ratio,
            by_year: year_ratio,
            fuel_type: fuel_ratio,
            new_construction: new_ratio,
            construction_complete: done_ratio,
            jurisdiction: jur_ratio,
            length_quartiles: quartiles(),
            new_complete_gas: gas_ratio,
            new_complete_gas_interstate: inter_ratio,
            new_complete_gas_intrastate: intra_ratio,
        },
        mi_pct_err: MileageBreakdown {
            total: total_err,
            by_year: year_err,
            fuel_type: fuel_err,
            new_construction: new_err,
            construction_complete: done_err,
            jurisdiction: jur_err,
            length_quartiles: quartiles(),
            new_complete_gas: gas_err,
            new_complete_gas_interstate: inter_err,
            new_complete_gas_intrastate: intra_err,
        },
    })
}

/// Read both CSVs, evaluate, and append the report to `<log_dir>/__log.txt`.
pub fn evaluate_files(
    predicted: impl AsRef<Path>,
    truth: impl AsRef<Path>,
    years: RangeInclusive<i32>,
    page: Option<i64>,
    log_dir: Option<&Path>,
) -> Result<EvaluationReport, DigitizeError> {
    let (predicted, truth) = (predicted.as_ref(), truth.as_ref());
    let report = evaluate(
        &Table::read_csv(predicted)?,
        &Table::read_csv(truth)?,
        years.clone(),
        page,
    )?;

    if let Some(dir) = log_dir {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| DigitizeError::Internal(format!("report serialization: {e}")))?;
        let log = RunLog::open(dir)?;
        log.append(&format!(
            "EVALUATION {} vs {} (years {}-{}{})",
            predicted.display(),
            truth.display(),
            years.start(),
            years.end(),
            page.map(|p| format!(", page {p}")).unwrap_or_default()
        ))?;
        log.append_block(&json)?;
        info!("Evaluation report appended to {}", log.path().display());
    }
    Ok(report)
}

// ── Internals ────────────────────────────────────────────────────────────

/// The fields of one row the evaluator reads.
#[derive(Debug)]
struct Mileage {
    year: i32,
    /// None when the length is a code, blank or a sentinel.
    miles: Option<f64>,
    fuel: String,
    new_construction: String,
    complete: String,
    jurisdiction: String,
}

fn first_present(table: &Table, name: &str, candidates: &[&str]) -> Result<usize, DigitizeError> {
    candidates
        .iter()
        .find_map(|c| table.column_index(c))
        .ok_or_else(|| DigitizeError::MissingColumn {
            table: name.to_string(),
            column: candidates[0].to_string(),
        })
}

fn prepare(
    table: &Table,
    name: &str,
    years: &RangeInclusive<i32>,
    page: Option<i64>,
) -> Result<Vec<Mileage>, DigitizeError> {
    let year_col = table.require_column(name, YEAR_COLUMN)?;
    let length_col = first_present(table, name, LENGTH_COLUMNS)?;
    let fuel_col = first_present(table, name, FUEL_COLUMNS)?;
    let new_col = table.require_column(name, NEW_COLUMN)?;
    let complete_col = table.require_column(name, COMPLETE_COLUMN)?;
    let jur_col = table.require_column(name, JURISDICTION_COLUMN)?;
    let page_col = match page {
        Some(_) => Some(table.require_column(name, PAGE_COLUMN)?),
        None => None,
    };

    let mut out = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let year = parse_number::<i32>(&row[year_col], YEAR_COLUMN, i)?;
        if !years.contains(&year) {
            continue;
        }
        if let (Some(col), Some(wanted)) = (page_col, page) {
            if parse_number::<i64>(&row[col], PAGE_COLUMN, i)? != wanted {
                continue;
            }
        }
        out.push(Mileage {
            year,
            miles: parse_length(&row[length_col], i)?,
            fuel: row[fuel_col].trim().to_string(),
            new_construction: row[new_col].trim().to_ascii_uppercase(),
            complete: row[complete_col].trim().to_ascii_uppercase(),
            jurisdiction: row[jur_col].trim().to_string(),
        });
    }
    Ok(out)
}

/// Integers may arrive as `1948.0` from spreadsheet exports.
fn parse_number<T: TryFrom<i64>>(cell: &str, column: &str, row: usize) -> Result<T, DigitizeError> {
    let invalid = || DigitizeError::InvalidCell {
        column: column.to_string(),
        row,
        value: cell.to_string(),
    };
    let text = cell.trim();
    let whole = match text.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let f = text.parse::<f64>().map_err(|_| invalid())?;
            if f.fract() != 0.0 {
                return Err(invalid());
            }
            f as i64
        }
    };
    T::try_from(whole).map_err(|_| invalid())
}

fn parse_length(cell: &str, row: usize) -> Result<Option<f64>, DigitizeError> {
    let text = cell.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("UNK") || text.eq_ignore_ascii_case("NA") {
        return Ok(None);
    }
    let v: f64 = text.parse().map_err(|_| DigitizeError::InvalidCell {
        column: LENGTH_COLUMNS[0].to_string(),
        row,
        value: cell.to_string(),
    })?;
    if v == UNKNOWN_LENGTH || v == NOT_APPLICABLE_LENGTH {
        Ok(None)
    } else {
        Ok(Some(v))
    }
}

/// Summed miles per bucket for one table.
struct Totals {
    total: f64,
    by_year: BTreeMap<i32, f64>,
    fuel: BTreeMap<String, f64>,
    new_construction: BTreeMap<String, f64>,
    complete: BTreeMap<String, f64>,
    jurisdiction: BTreeMap<String, f64>,
    gas: BTreeMap<i32, f64>,
    gas_interstate: BTreeMap<i32, f64>,
    gas_intrastate: BTreeMap<i32, f64>,
}

impl Totals {
    fn of(rows: &[Mileage], years: &RangeInclusive<i32>) -> Self {
        let sum = |keep: &dyn Fn(&Mileage) -> bool| -> f64 {
            rows.iter().filter(|&r| keep(r)).filter_map(|r| r.miles).sum()
        };
        let per_value = |values: &[&str], get: fn(&Mileage) -> &str| -> BTreeMap<String, f64> {
            values
                .iter()
                .map(|v| (v.to_string(), sum(&|r: &Mileage| get(r) == *v)))
                .collect()
        };
        let new_complete_gas = |r: &Mileage| {
            r.fuel == FuelType::NaturalGas.as_str()
                && r.new_construction == Flag::True.as_str()
                && r.complete == Flag::True.as_str()
        };
        let per_year = |keep: &dyn Fn(&Mileage) -> bool| -> BTreeMap<i32, f64> {
            years
                .clone()
                .map(|y| (y, sum(&|r: &Mileage| r.year == y && keep(r))))
                .collect()
        };

        Totals {
            total: sum(&|_| true),
            by_year: per_year(&|_| true),
            fuel: per_value(FuelType::NAMES, |r| r.fuel.as_str()),
            new_construction: per_value(Flag::NAMES, |r| r.new_construction.as_str()),
            complete: per_value(Flag::NAMES, |r| r.complete.as_str()),
            jurisdiction: per_value(Jurisdiction::NAMES, |r| r.jurisdiction.as_str()),
            gas: per_year(&new_complete_gas),
            gas_interstate: per_year(&|r| {
                new_complete_gas(r) && r.jurisdiction == Jurisdiction::Interstate.as_str()
            }),
            gas_intrastate: per_year(&|r| {
                new_complete_gas(r) && r.jurisdiction == Jurisdiction::Intrastate.as_str()
            }),
        }
    }
}

type ScoreMap<K> = BTreeMap<K, Score>;

fn split<K: Ord + Clone>(
    pred: &BTreeMap<K, f64>,
    truth: &BTreeMap<K, f64>,
) -> (ScoreMap<K>, ScoreMap<K>) {
    let mut ratio = BTreeMap::new();
    let mut err = BTreeMap::new();
    for (key, &t) in truth {
        let p = pred.get(key).copied().unwrap_or(0.0);
        let (r, e) = score(p, t);
        ratio.insert(key.clone(), r);
        err.insert(key.clone(), e);
    }
    (ratio, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: [&str; 8] = [
        "Data Year",
        "Page Number",
        "Fuel Type",
        "New Construction",
        "Construction Complete",
        "Pipeline Length",
        "Interstate or Intrastate",
        "Pipeline Company",
    ];

    fn table(rows: &[[&str; 8]]) -> Table {
        let mut t = Table::new(COLUMNS);
        for r in rows {
            t.push_row(r.iter().map(|c| c.to_string()).collect());
        }
        t
    }

    fn gas_row(miles: &str) -> [&str; 8] {
        ["1948", "12", "NATURAL GAS", "TRUE", "TRUE", miles, "INTERSTATE", "Texas Eastern"]
    }

    #[test]
    fn score_policy() {
        assert_eq!(score(10.0, 8.0), (Score::Value(1.25), Score::Value(0.25)));
        assert_eq!(score(0.0, 0.0), (Score::Undefined, Score::Undefined));
        assert_eq!(score(3.0, 0.0), (Score::Flagged, Score::Flagged));
        assert_eq!(score(0.0, 4.0), (Score::Value(0.0), Score::Value(1.0)));
    }

    #[test]
    fn single_gas_line_scenario() {
        let pred = table(&[gas_row("10.0")]);
        let truth = table(&[gas_row("8.0")]);
        let report = evaluate(&pred, &truth, 1948..=1948, None).unwrap();

        let err = &report.mi_pct_err;
        let ratio = &report.mi_pred_over_true;
        assert_eq!(err.new_complete_gas[&1948], Score::Value(0.25));
        assert_eq!(ratio.new_complete_gas[&1948], Score::Value(1.25));
        assert_eq!(err.new_complete_gas_interstate[&1948], Score::Value(0.25));
        assert_eq!(err.new_complete_gas_intrastate[&1948], Score::Undefined);
        assert_eq!(ratio.total, Score::Value(1.25));
        assert_eq!(ratio.fuel_type["NATURAL GAS"], Score::Value(1.25));
        assert_eq!(ratio.fuel_type["CRUDE"], Score::Undefined);
        assert_eq!(ratio.by_year[&1948], Score::Value(1.25));
    }

    #[test]
    fn predicted_miles_where_none_are_true_is_flagged() {
        let mut crude = gas_row("5");
        crude[2] = "CRUDE";
        let pred = table(&[gas_row("8"), crude]);
        let truth = table(&[gas_row("8")]);
        let report = evaluate(&pred, &truth, 1948..=1948, None).unwrap();
        assert_eq!(report.mi_pct_err.fuel_type["CRUDE"], Score::Flagged);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mi_pct_err"]["Fuel Type"]["CRUDE"], serde_json::json!(-999));
        assert!(json["mi_pct_err"]["Fuel Type"]["OIL"].is_null());
        assert!(json["mi_pct_err"]["Pipeline Length"]["Q1"].is_null());
    }

    #[test]
    fn sentinel_lengths_and_codes_are_excluded() {
        let pred = table(&[gas_row("8"), gas_row("-1"), gas_row("-2"), gas_row("UNK"), gas_row("")]);
        let truth = table(&[gas_row("8")]);
        let report = evaluate(&pred, &truth, 1948..=1948, None).unwrap();
        assert_eq!(report.mi_pct_err.total, Score::Value(0.0));
    }

    #[test]
    fn booleans_are_normalized() {
        let mut lower = gas_row("8");
        lower[3] = " true";
        lower[4] = "True ";
        let report = evaluate(&table(&[lower]), &table(&[gas_row("8")]), 1948..=1948, None).unwrap();
        assert_eq!(report.mi_pct_err.new_complete_gas[&1948], Score::Value(0.0));
    }

    #[test]
    fn filters_by_year_and_page() {
        let mut other_year = gas_row("50");
        other_year[0] = "1950";
        let mut other_page = gas_row("70");
        other_page[1] = "13";
        let pred = table(&[gas_row("8"), other_year, other_page]);
        let truth = table(&[gas_row("8")]);

        let by_page = evaluate(&pred, &truth, 1948..=1949, Some(12)).unwrap();
        assert_eq!(by_page.mi_pred_over_true.total, Score::Value(1.0));
        assert_eq!(by_page.mi_pred_over_true.by_year[&1949], Score::Undefined);
        assert!(!by_page.mi_pred_over_true.by_year.contains_key(&1950));

        let all_pages = evaluate(&pred, &truth, 1948..=1948, None).unwrap();
        assert_eq!(all_pages.mi_pred_over_true.total, Score::Value(78.0 / 8.0));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let pred = table(&[gas_row("10"), gas_row("3.5")]);
        let truth = table(&[gas_row("8")]);
        let a = serde_json::to_string(&evaluate(&pred, &truth, 1940..=1960, None).unwrap()).unwrap();
        let b = serde_json::to_string(&evaluate(&pred, &truth, 1940..=1960, None).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn extended_columns_are_accepted() {
        let mut t = Table::new([
            "Data Year",
            "Fuel Type Inferred",
            "New Construction",
            "Construction Complete",
            "Total Pipeline Length",
            "Interstate or Intrastate",
        ]);
        t.push_row(["1948", "NATURAL GAS", "TRUE", "TRUE", "4", "INTRASTATE"].map(String::from).to_vec());
        let report = evaluate(&t, &table(&[gas_row("8")]), 1948..=1948, None).unwrap();
        assert_eq!(report.mi_pct_err.total, Score::Value(0.5));
    }

    #[test]
    fn missing_column_and_bad_cells_fail() {
        let t = Table::new(["Data Year"]);
        assert!(matches!(
            evaluate(&t, &t, 1948..=1948, None),
            Err(DigitizeError::MissingColumn { .. })
        ));

        let bad_year = table(&[["19x8", "1", "GAS", "TRUE", "TRUE", "1", "NA", "x"]]);
        assert!(matches!(
            evaluate(&bad_year, &bad_year, 1948..=1948, None),
            Err(DigitizeError::InvalidCell { .. })
        ));

        let bad_len = table(&[gas_row("twelve")]);
        assert!(matches!(
            evaluate(&bad_len, &bad_len, 1948..=1948, None),
            Err(DigitizeError::InvalidCell { .. })
        ));
    }

    #[test]
    fn evaluate_files_appends_report_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let pred_path = dir.path().join("pred.csv");
        let truth_path = dir.path().join("truth.csv");
        table(&[gas_row("10")]).write_csv(&pred_path).unwrap();
        table(&[gas_row("8")]).write_csv(&truth_path).unwrap();

        let logs = dir.path().join("logs");
        evaluate_files(&pred_path, &truth_path, 1948..=1948, None, Some(&logs)).unwrap();

        let text = std::fs::read_to_string(logs.join("__log.txt")).unwrap();
        assert!(text.contains("EVALUATION"));
        assert!(text.contains("\"mi_pct_err\""));
        assert!(text.contains("\"New Complete Natural Gas by Year\""));
    }
}
