//! NHEFS CSV ingest and processing.
//!
//! The raw file is the public NHEFS extract (one row per participant). This
//! module turns it into a [`Dataset`]:
//!
//! - treatment `a = qsmk` (quit smoking between 1971 and 1982)
//! - outcome `y = wt82_71` (weight change in kg)
//! - covariates: the standard confounder set, optionally augmented with squared
//!   terms and one-hot encoded categoricals
//!
//! Rows with missing/invalid required fields are skipped and reported as
//! [`RowError`]s; the run only fails when nothing usable remains.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::domain::Dataset;
use crate::error::AppError;

/// Confounders used as covariates, in output column order.
pub const CONFOUNDERS: [&str; 9] = [
    "active",
    "age",
    "education",
    "exercise",
    "race",
    "sex",
    "smokeintensity",
    "smokeyrs",
    "wt71",
];

/// Continuous confounders that receive a squared term when augmenting.
pub const SQUARED: [&str; 4] = ["age", "wt71", "smokeintensity", "smokeyrs"];

/// Categorical confounders expanded to dummies (first level dropped).
pub const CATEGORICAL: [&str; 3] = ["active", "education", "exercise"];

const TREATMENT: &str = "qsmk";
const OUTCOME: &str = "wt82_71";
const FOLLOW_UP_WEIGHT: &str = "wt82";
const ID: &str = "seqn";

/// How the raw table is turned into a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NhefsOptions {
    /// Drop participants without a 1982 weight measurement.
    pub restrict: bool,
    /// Append squared continuous confounders.
    pub augment: bool,
    /// Replace categorical confounders with drop-first dummies.
    pub onehot: bool,
}

impl Default for NhefsOptions {
    fn default() -> Self {
        Self {
            restrict: true,
            augment: true,
            onehot: true,
        }
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Loaded dataset plus ingest bookkeeping.
#[derive(Debug, Clone)]
pub struct LoadedNhefs {
    pub dataset: Dataset,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    /// Rows dropped by `restrict` (missing follow-up weight).
    pub rows_censored: usize,
}

#[derive(Debug, Clone)]
struct RawRow {
    id: String,
    qsmk: u8,
    outcome: f64,
    confounders: [f64; CONFOUNDERS.len()],
}

/// Load and process an NHEFS CSV file.
pub fn load_nhefs(path: &Path, options: &NhefsOptions) -> Result<LoadedNhefs, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::input(format!(
            "Failed to open NHEFS CSV '{}': {e}. Run `ipw fetch` to download it.",
            path.display()
        ))
    })?;
    let loaded = read_nhefs(file, options)?;
    info!(
        path = %path.display(),
        rows_read = loaded.rows_read,
        rows_used = loaded.dataset.n_units(),
        rows_censored = loaded.rows_censored,
        row_errors = loaded.row_errors.len(),
        "loaded NHEFS"
    );
    Ok(loaded)
}

/// Load and process NHEFS from any reader (file, bytes, ...).
pub fn read_nhefs<R: Read>(reader: R, options: &NhefsOptions) -> Result<LoadedNhefs, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_censored = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Data starts on line 2 (line 1 is the header).
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let id = get_optional(&record, &header_map, ID)
            .map(str::to_string)
            .unwrap_or_else(|| format!("row{}", line - 1));

        if options.restrict && parse_opt_f64(get_optional(&record, &header_map, FOLLOW_UP_WEIGHT)).is_none() {
            rows_censored += 1;
            continue;
        }

        match parse_row(&record, &header_map, id.clone()) {
            Ok(row) => rows.push(row),
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(id),
                message,
            }),
        }
    }

    for err in row_errors.iter().take(5) {
        warn!(line = err.line, id = err.id.as_deref().unwrap_or(""), "{}", err.message);
    }
    if row_errors.len() > 5 {
        warn!("{} more row errors suppressed", row_errors.len() - 5);
    }

    if rows.is_empty() {
        return Err(AppError::no_data("No valid NHEFS rows remain after processing."));
    }

    let dataset = build_dataset(&rows, options);
    debug!(features = ?dataset.feature_names, "design matrix built");

    Ok(LoadedNhefs {
        dataset,
        row_errors,
        rows_read,
        rows_censored,
    })
}

fn build_dataset(rows: &[RawRow], options: &NhefsOptions) -> Dataset {
    let mut columns: Vec<(String, Vec<f64>)> = CONFOUNDERS
        .iter()
        .enumerate()
        .map(|(j, name)| (name.to_string(), rows.iter().map(|r| r.confounders[j]).collect()))
        .collect();

    if options.augment {
        for name in SQUARED {
            let j = confounder_index(name);
            let squared = rows.iter().map(|r| r.confounders[j] * r.confounders[j]).collect();
            columns.push((format!("{name}^2"), squared));
        }
    }

    if options.onehot {
        columns.retain(|(name, _)| !CATEGORICAL.contains(&name.as_str()));
        for name in CATEGORICAL {
            let j = confounder_index(name);
            let values: Vec<f64> = rows.iter().map(|r| r.confounders[j]).collect();
            columns.extend(drop_first_dummies(name, &values));
        }
    }

    let n = rows.len();
    let p = columns.len();
    let x = DMatrix::from_fn(n, p, |i, j| columns[j].1[i]);
    let feature_names: Vec<String> = columns.into_iter().map(|(name, _)| name).collect();

    Dataset {
        x,
        a: rows.iter().map(|r| r.qsmk).collect(),
        y: rows.iter().map(|r| r.outcome).collect(),
        feature_names,
        ids: rows.iter().map(|r| r.id.clone()).collect(),
        descriptors: descriptors(),
    }
}

fn confounder_index(name: &str) -> usize {
    CONFOUNDERS
        .iter()
        .position(|c| *c == name)
        .unwrap_or_else(|| unreachable!("{name} is not a confounder"))
}

/// One indicator column per observed level except the smallest.
fn drop_first_dummies(name: &str, values: &[f64]) -> Vec<(String, Vec<f64>)> {
    // Levels are small non-negative integer codes in NHEFS.
    let levels: BTreeSet<i64> = values.iter().map(|v| v.round() as i64).collect();
    levels
        .iter()
        .skip(1)
        .map(|&level| {
            let column = values
                .iter()
                .map(|v| if v.round() as i64 == level { 1.0 } else { 0.0 })
                .collect();
            (format!("{name}_{level}"), column)
        })
        .collect()
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>, id: String) -> Result<RawRow, String> {
    let qsmk = match parse_opt_f64(get_optional(record, header_map, TREATMENT)) {
        Some(v) if v == 0.0 => 0u8,
        Some(v) if v == 1.0 => 1u8,
        Some(v) => return Err(format!("Invalid `{TREATMENT}` value {v} (expected 0 or 1).")),
        None => return Err(format!("Missing/invalid `{TREATMENT}` value.")),
    };

    let outcome = parse_opt_f64(get_optional(record, header_map, OUTCOME))
        .ok_or_else(|| format!("Missing/invalid `{OUTCOME}` value."))?;

    let mut confounders = [0.0; CONFOUNDERS.len()];
    for (slot, name) in confounders.iter_mut().zip(CONFOUNDERS) {
        *slot = parse_opt_f64(get_optional(record, header_map, name))
            .ok_or_else(|| format!("Missing/invalid `{name}` value."))?;
    }

    Ok(RawRow {
        id,
        qsmk,
        outcome,
        confounders,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Strip a UTF-8 BOM on the first header, as emitted by some spreadsheet exports.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Check that a header row carries every column the loader needs.
pub fn ensure_required_columns_exist(header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    let missing: Vec<&str> = [TREATMENT, OUTCOME, FOLLOW_UP_WEIGHT]
        .into_iter()
        .chain(CONFOUNDERS)
        .filter(|name| !header_map.contains_key(*name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::input(format!(
            "Missing required NHEFS column(s): {}",
            missing.iter().map(|m| format!("`{m}`")).collect::<Vec<_>>().join(", ")
        )))
    }
}

/// Parse a header line and validate it as NHEFS.
pub fn validate_header_line(line: &str) -> Result<(), AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    ensure_required_columns_exist(&build_header_map(&headers))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("na"))
}

fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let v = s?.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

fn descriptors() -> BTreeMap<String, String> {
    [
        ("seqn", "Unique personal identifier"),
        ("qsmk", "Quit smoking between 1st questionnaire and 1982, 1: yes, 0: no"),
        ("wt82_71", "Weight gain in kilograms between 1971 and 1982"),
        ("wt82", "Weight in kilograms in 1982"),
        ("active", "In your usual day, how active are you? 0: very, 1: moderately, 2: inactive"),
        ("age", "Age in 1971"),
        ("education", "Amount of education by 1971, 1: 8th grade or less .. 5: college dropout or more"),
        ("exercise", "In recreation, how much exercise? 0: much, 1: moderate, 2: little or none"),
        ("race", "0: white, 1: black or other in 1971"),
        ("sex", "0: male, 1: female"),
        ("smokeintensity", "Number of cigarettes smoked per day in 1971"),
        ("smokeyrs", "Years of smoking"),
        ("wt71", "Weight in kilograms in 1971"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
