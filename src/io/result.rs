//! Read/write result JSON files.
//!
//! Result JSON is the portable record of a run:
//! - run metadata (timestamp, data path, options)
//! - dataset stats and propensity-model diagnostics
//! - per-arm population outcomes and requested effects
//! - bootstrap intervals and balance table when computed

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::pipeline::RunOutput;
use crate::domain::{DatasetStats, EffectEstimate, EstimateConfig, PopulationOutcome};
use crate::error::AppError;
use crate::estimation::BootstrapSummary;
use crate::evaluation::BalanceTable;
use crate::models::{Classifier, LearnerDiagnostics};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorSettings {
    pub learner: String,
    pub max_iter: usize,
    #[serde(with = "crate::domain::nonfinite")]
    pub c: f64,
    #[serde(with = "crate::domain::nonfinite")]
    pub tol: f64,
    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
    pub use_stabilized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateReport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub data_path: String,
    pub stats: DatasetStats,
    pub settings: EstimatorSettings,
    pub diagnostics: LearnerDiagnostics,
    pub outcomes: PopulationOutcome,
    pub effect: EffectEstimate,
    pub bootstrap: Option<BootstrapSummary>,
    pub balance: Option<BalanceTable>,
}

impl EstimateReport {
    pub fn from_run(run: &RunOutput, config: &EstimateConfig) -> Self {
        let learner = run.estimator.learner();
        Self {
            tool: "ipw".to_string(),
            generated_at: Utc::now(),
            data_path: config.data_path.display().to_string(),
            stats: run.dataset().stats(),
            settings: EstimatorSettings {
                learner: learner.name().to_string(),
                max_iter: config.max_iter,
                c: config.c,
                tol: config.tol,
                clip_min: config.clip_min,
                clip_max: config.clip_max,
                use_stabilized: config.use_stabilized,
            },
            diagnostics: learner.diagnostics(),
            outcomes: run.outcomes.clone(),
            effect: run.effect.clone(),
            bootstrap: run.bootstrap.clone(),
            balance: run.balance.clone(),
        }
    }
}

/// Write a result JSON file.
pub fn write_result_json(path: &Path, report: &EstimateReport) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create result JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, report)
        .map_err(|e| AppError::input(format!("Failed to write result JSON: {e}")))?;
    Ok(())
}

/// Read a result JSON file.
pub fn read_result_json(path: &Path) -> Result<EstimateReport, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open result JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::input(format!("Invalid result JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::EffectType;

    fn report() -> EstimateReport {
        EstimateReport {
            tool: "ipw".to_string(),
            generated_at: Utc::now(),
            data_path: "data/nhefs.csv".to_string(),
            stats: DatasetStats {
                n_units: 10,
                n_treated: 4,
                n_control: 6,
                n_features: 3,
                y_mean_treated: 4.5,
                y_mean_control: 1.5,
            },
            settings: EstimatorSettings {
                learner: "LogisticRegression".to_string(),
                max_iter: 1000,
                c: 1.0,
                tol: 1e-4,
                clip_min: Some(0.01),
                clip_max: None,
                use_stabilized: false,
            },
            diagnostics: LearnerDiagnostics::default(),
            outcomes: PopulationOutcome {
                by_arm: BTreeMap::from([(0, 1.75), (1, 5.25)]),
            },
            effect: EffectEstimate {
                values: BTreeMap::from([(EffectType::Diff, 3.5), (EffectType::Ratio, 3.0)]),
            },
            bootstrap: None,
            balance: None,
        }
    }

    #[test]
    fn result_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let original = report();
        write_result_json(&path, &original).unwrap();

        let back = read_result_json(&path).unwrap();
        assert_eq!(back.outcomes, original.outcomes);
        assert_eq!(back.effect, original.effect);
        assert_eq!(back.settings.clip_min, Some(0.01));
        assert_eq!(back.generated_at, original.generated_at);
    }

    #[test]
    fn non_finite_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");

        let mut original = report();
        original.settings.c = f64::INFINITY;
        // Weight change in kg is not a probability, so the odds ratio is undefined.
        original.effect = crate::estimation::estimate_effect(5.27, 1.98, &[EffectType::Diff, EffectType::Or]);
        original.balance = Some(BalanceTable {
            rows: vec![crate::evaluation::CovariateBalance {
                feature: "race".to_string(),
                unweighted_smd: f64::INFINITY,
                weighted_smd: f64::NAN,
            }],
        });
        write_result_json(&path, &original).unwrap();

        let back = read_result_json(&path).unwrap();
        assert_eq!(back.settings.c, f64::INFINITY);
        assert!((back.effect.get(EffectType::Diff).unwrap() - 3.29).abs() < 1e-12);
        assert!(back.effect.get(EffectType::Or).unwrap().is_nan());
        let row = &back.balance.unwrap().rows[0];
        assert_eq!(row.unweighted_smd, f64::INFINITY);
        assert!(row.weighted_smd.is_nan());
    }

    #[test]
    fn null_floats_from_older_exports_read_as_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        write_result_json(&path, &report()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["effect"]["values"]["ratio"] = serde_json::Value::Null;
        value["settings"]["c"] = serde_json::Value::Null;
        std::fs::write(&path, value.to_string()).unwrap();

        let back = read_result_json(&path).unwrap();
        assert!(back.effect.get(EffectType::Ratio).unwrap().is_nan());
        assert!(back.settings.c.is_nan());
    }

    #[test]
    fn missing_or_invalid_json_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert_eq!(read_result_json(&missing).unwrap_err().exit_code(), 2);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{not json").unwrap();
        assert_eq!(read_result_json(&bad).unwrap_err().exit_code(), 2);
    }
}
