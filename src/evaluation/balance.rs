//! Covariate balance diagnostics.
//!
//! For each covariate we report the absolute standardised mean difference
//! (ASMD) between arms, before and after weighting:
//!
//! ```text
//! ASMD = |μ₁ - μ₀| / sqrt((s₁² + s₀²) / 2)
//! ```
//!
//! Weighted moments use the IPW weights of each unit's observed arm. A
//! weighted ASMD above [`SMD_THRESHOLD`] is the conventional imbalance flag.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const SMD_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovariateBalance {
    pub feature: String,
    #[serde(with = "crate::domain::nonfinite")]
    pub unweighted_smd: f64,
    #[serde(with = "crate::domain::nonfinite")]
    pub weighted_smd: f64,
}

impl CovariateBalance {
    pub fn is_imbalanced(&self) -> bool {
        self.weighted_smd > SMD_THRESHOLD
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceTable {
    pub rows: Vec<CovariateBalance>,
}

impl BalanceTable {
    pub fn max_weighted_smd(&self) -> f64 {
        self.rows
            .iter()
            .map(|r| r.weighted_smd)
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }

    pub fn max_unweighted_smd(&self) -> f64 {
        self.rows
            .iter()
            .map(|r| r.unweighted_smd)
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }

    pub fn imbalanced(&self) -> impl Iterator<Item = &CovariateBalance> {
        self.rows.iter().filter(|r| r.is_imbalanced())
    }
}

pub fn covariate_balance(
    x: &DMatrix<f64>,
    a: &[u8],
    w: &[f64],
    feature_names: &[String],
) -> Result<BalanceTable, AppError> {
    if x.nrows() != a.len() || w.len() != a.len() {
        return Err(AppError::input("Balance inputs have mismatched lengths."));
    }
    if feature_names.len() != x.ncols() {
        return Err(AppError::input("Feature name count differs from covariate count."));
    }

    let ones = vec![1.0; a.len()];
    let rows = feature_names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let col: Vec<f64> = x.column(j).iter().copied().collect();
            CovariateBalance {
                feature: name.clone(),
                unweighted_smd: smd(&col, a, &ones),
                weighted_smd: smd(&col, a, w),
            }
        })
        .collect();

    Ok(BalanceTable { rows })
}

/// Weighted mean and (biased) weighted variance of `v` over units in `arm`.
fn arm_moments(v: &[f64], a: &[u8], w: &[f64], arm: u8) -> Option<(f64, f64)> {
    let mut sw = 0.0;
    let mut swx = 0.0;
    for ((&vi, &ai), &wi) in v.iter().zip(a).zip(w) {
        if ai == arm {
            sw += wi;
            swx += wi * vi;
        }
    }
    if sw <= 0.0 {
        return None;
    }
    let mean = swx / sw;
    let var = v
        .iter()
        .zip(a)
        .zip(w)
        .filter(|((_, ai), _)| **ai == arm)
        .map(|((vi, _), wi)| wi * (vi - mean).powi(2))
        .sum::<f64>()
        / sw;
    Some((mean, var))
}

fn smd(v: &[f64], a: &[u8], w: &[f64]) -> f64 {
    let (Some((m1, v1)), Some((m0, v0))) = (arm_moments(v, a, w, 1), arm_moments(v, a, w, 0)) else {
        return f64::NAN;
    };
    let pooled = ((v1 + v0) / 2.0).sqrt();
    if pooled > 0.0 {
        (m1 - m0).abs() / pooled
    } else if (m1 - m0).abs() == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}
