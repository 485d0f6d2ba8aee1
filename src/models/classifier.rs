//! The seam between the weighting estimator and its propensity learner.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Convergence report of the most recent `fit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerDiagnostics {
    pub n_iter: usize,
    pub converged: bool,
    /// Max-abs gradient of the objective at the returned solution, divided by `n`.
    #[serde(with = "crate::domain::nonfinite")]
    pub grad_norm: f64,
}

/// A binary probabilistic classifier.
///
/// `predict_proba` returns an `n × 2` matrix whose columns are `P(label = 0)` and
/// `P(label = 1)`, in that order.
pub trait Classifier: Clone + Send + Sync {
    fn fit(&mut self, x: &DMatrix<f64>, labels: &[u8]) -> Result<(), AppError>;

    fn predict_proba(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError>;

    fn is_fitted(&self) -> bool;

    fn name(&self) -> &'static str;

    fn diagnostics(&self) -> LearnerDiagnostics;
}
