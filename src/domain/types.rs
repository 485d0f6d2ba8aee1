//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the loader, the learner, and the estimator
//! - exported to JSON/CSV
//! - printed by the report module

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Covariates, treatment assignment, and outcome for a set of units.
///
/// Row `i` of `x`, `a[i]`, `y[i]` and `ids[i]` all describe the same unit.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: DMatrix<f64>,
    pub a: Vec<u8>,
    pub y: Vec<f64>,
    pub feature_names: Vec<String>,
    pub ids: Vec<String>,
    /// Human-readable descriptions of the columns (name -> description).
    pub descriptors: BTreeMap<String, String>,
}

impl Dataset {
    pub fn n_units(&self) -> usize {
        self.a.len()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Select rows by index (duplicates allowed), e.g. for bootstrap resamples.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        let x = DMatrix::from_fn(rows.len(), self.x.ncols(), |i, j| self.x[(rows[i], j)]);
        Dataset {
            x,
            a: rows.iter().map(|&r| self.a[r]).collect(),
            y: rows.iter().map(|&r| self.y[r]).collect(),
            feature_names: self.feature_names.clone(),
            ids: rows.iter().map(|&r| self.ids[r].clone()).collect(),
            descriptors: self.descriptors.clone(),
        }
    }

    pub fn stats(&self) -> DatasetStats {
        let mut n_treated = 0usize;
        let mut sum_treated = 0.0;
        let mut sum_control = 0.0;
        for (&a, &y) in self.a.iter().zip(&self.y) {
            if a == 1 {
                n_treated += 1;
                sum_treated += y;
            } else {
                sum_control += y;
            }
        }
        let n_control = self.a.len() - n_treated;
        DatasetStats {
            n_units: self.a.len(),
            n_treated,
            n_control,
            n_features: self.n_features(),
            y_mean_treated: if n_treated > 0 { sum_treated / n_treated as f64 } else { f64::NAN },
            y_mean_control: if n_control > 0 { sum_control / n_control as f64 } else { f64::NAN },
        }
    }
}

/// Summary stats about the units actually used for estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub n_units: usize,
    pub n_treated: usize,
    pub n_control: usize,
    pub n_features: usize,
    /// Unweighted mean outcome among treated units.
    #[serde(with = "crate::domain::nonfinite")]
    pub y_mean_treated: f64,
    /// Unweighted mean outcome among control units.
    #[serde(with = "crate::domain::nonfinite")]
    pub y_mean_control: f64,
}

/// Contrast used to compare two potential-outcome estimates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    /// `o1 - o0`
    Diff,
    /// `o1 / o0`
    Ratio,
    /// Odds ratio `(o1 / (1 - o1)) / (o0 / (1 - o0))`; only meaningful for probabilities.
    Or,
}

impl EffectType {
    pub const ALL: [EffectType; 3] = [EffectType::Diff, EffectType::Ratio, EffectType::Or];

    pub fn display_name(self) -> &'static str {
        match self {
            EffectType::Diff => "diff",
            EffectType::Ratio => "ratio",
            EffectType::Or => "or",
        }
    }
}

/// Weighted mean outcome per treatment arm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationOutcome {
    #[serde(with = "crate::domain::nonfinite::map")]
    pub by_arm: BTreeMap<u8, f64>,
}

impl PopulationOutcome {
    pub fn get(&self, arm: u8) -> Option<f64> {
        self.by_arm.get(&arm).copied()
    }
}

/// Effect estimates keyed by contrast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    #[serde(with = "crate::domain::nonfinite::map")]
    pub values: BTreeMap<EffectType, f64>,
}

impl EffectEstimate {
    pub fn get(&self, kind: EffectType) -> Option<f64> {
        self.values.get(&kind).copied()
    }
}

/// Percentile confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    #[serde(with = "crate::domain::nonfinite")]
    pub lower: f64,
    #[serde(with = "crate::domain::nonfinite")]
    pub upper: f64,
}

/// Fully resolved configuration for an `ipw estimate` run.
#[derive(Debug, Clone)]
pub struct EstimateConfig {
    pub data_path: PathBuf,
    pub restrict: bool,
    pub augment: bool,
    pub onehot: bool,

    pub max_iter: usize,
    pub c: f64,
    pub tol: f64,

    pub clip_min: Option<f64>,
    pub clip_max: Option<f64>,
    pub use_stabilized: bool,

    pub effects: Vec<EffectType>,

    pub bootstrap: usize,
    pub seed: u64,
    pub confidence: f64,

    pub balance: bool,
    pub export_weights: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
}
