//! Export per-unit propensities and weights to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::AppError;

/// Write one row per unit: id, treatment, outcome, `P(A=1|X)`, weight.
pub fn write_weights_csv(
    path: &Path,
    ids: &[String],
    a: &[u8],
    y: &[f64],
    propensity: &[f64],
    weights: &[f64],
) -> Result<(), AppError> {
    let n = ids.len();
    if [a.len(), y.len(), propensity.len(), weights.len()].iter().any(|&len| len != n) {
        return Err(AppError::input("Weight export columns have mismatched lengths."));
    }

    let mut file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create weights CSV '{}': {e}", path.display())))?;

    writeln!(file, "id,treatment,outcome,propensity,weight")
        .map_err(|e| AppError::input(format!("Failed to write weights CSV header: {e}")))?;

    for i in 0..n {
        writeln!(
            file,
            "{},{},{:.6},{:.10},{:.10}",
            ids[i], a[i], y[i], propensity[i], weights[i]
        )
        .map_err(|e| AppError::input(format!("Failed to write weights CSV row: {e}")))?;
    }

    Ok(())
}
