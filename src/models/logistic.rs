//! L2-penalised logistic regression fitted by damped Newton iterations.
//!
//! Objective (intercept not penalised):
//!
//! ```text
//! minimize  0.5 / C · ||β||² + Σ_i [ ln(1 + e^{z_i}) - y_i z_i ],   z_i = x_iᵀβ + b
//! ```
//!
//! Each iteration solves `H Δ = g` for the Newton direction and backtracks on
//! the objective until the Armijo condition holds. Newton steps are invariant to
//! the wildly different column scales of the NHEFS design (e.g. `wt71^2`), which
//! first-order methods struggle with.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::math::{log_loss, sigmoid, solve_spd};
use crate::models::classifier::{Classifier, LearnerDiagnostics};

const ARMIJO_C: f64 = 1e-4;
const MAX_HALVINGS: usize = 40;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    pub max_iter: usize,
    /// Convergence threshold on `max|∇| / n`.
    pub tol: f64,
    /// Inverse regularisation strength. `f64::INFINITY` disables the penalty.
    pub c: f64,
    pub fit_intercept: bool,

    coef: Option<DVector<f64>>,
    intercept: f64,
    diagnostics: LearnerDiagnostics,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(100)
    }
}

impl LogisticRegression {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            tol: 1e-4,
            c: 1.0,
            fit_intercept: true,
            coef: None,
            intercept: 0.0,
            diagnostics: LearnerDiagnostics::default(),
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn coef(&self) -> Option<&DVector<f64>> {
        self.coef.as_ref()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Linear predictor `Xβ + b`.
    pub fn decision_function(&self, x: &DMatrix<f64>) -> Result<DVector<f64>, AppError> {
        let coef = self
            .coef
            .as_ref()
            .ok_or_else(|| AppError::estimation("LogisticRegression is not fitted."))?;
        if x.ncols() != coef.len() {
            return Err(AppError::input(format!(
                "Feature count mismatch: model was fitted on {} columns, got {}.",
                coef.len(),
                x.ncols()
            )));
        }
        Ok((x * coef).add_scalar(self.intercept))
    }

    fn validate(&self, x: &DMatrix<f64>, labels: &[u8]) -> Result<(), AppError> {
        if self.max_iter == 0 {
            return Err(AppError::input("max_iter must be > 0."));
        }
        if !(self.c > 0.0) {
            return Err(AppError::input("C must be > 0."));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(AppError::input("tol must be finite and > 0."));
        }
        if x.nrows() != labels.len() {
            return Err(AppError::input(format!(
                "X has {} rows but the label vector has {} entries.",
                x.nrows(),
                labels.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(AppError::no_data("Cannot fit a classifier on zero rows."));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AppError::input("X contains non-finite values."));
        }
        if let Some(bad) = labels.iter().find(|&&l| l > 1) {
            return Err(AppError::input(format!("Labels must be 0 or 1, found {bad}.")));
        }
        let n_pos = labels.iter().filter(|&&l| l == 1).count();
        if n_pos == 0 || n_pos == labels.len() {
            return Err(AppError::estimation(
                "Both classes must be present to fit a logistic regression.",
            ));
        }
        Ok(())
    }
}

/// Design with a trailing intercept column (when requested).
fn augmented(x: &DMatrix<f64>, fit_intercept: bool) -> DMatrix<f64> {
    if !fit_intercept {
        return x.clone();
    }
    let p = x.ncols();
    DMatrix::from_fn(x.nrows(), p + 1, |i, j| if j < p { x[(i, j)] } else { 1.0 })
}

struct Problem<'a> {
    xa: &'a DMatrix<f64>,
    y: &'a DVector<f64>,
    /// Number of penalised coefficients (the leading columns of `xa`).
    p: usize,
    alpha: f64,
}

impl Problem<'_> {
    fn objective(&self, theta: &DVector<f64>) -> f64 {
        let z = self.xa * theta;
        let loss: f64 = z.iter().zip(self.y.iter()).map(|(&zi, &yi)| log_loss(yi, zi)).sum();
        let penalty: f64 = theta.rows(0, self.p).iter().map(|b| b * b).sum();
        loss + 0.5 * self.alpha * penalty
    }

    /// Gradient and Hessian at `theta`.
    fn derivatives(&self, theta: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let n = self.xa.nrows();
        let q = self.xa.ncols();
        let z = self.xa * theta;
        let mu = z.map(sigmoid);

        let resid = &mu - self.y;
        let mut grad = self.xa.tr_mul(&resid);

        let sqrt_w = mu.map(|m| (m * (1.0 - m)).max(1e-12).sqrt());
        let xs = DMatrix::from_fn(n, q, |i, j| self.xa[(i, j)] * sqrt_w[i]);
        let mut hess = xs.tr_mul(&xs);

        for j in 0..self.p {
            grad[j] += self.alpha * theta[j];
            hess[(j, j)] += self.alpha;
        }
        (grad, hess)
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &DMatrix<f64>, labels: &[u8]) -> Result<(), AppError> {
        self.validate(x, labels)?;

        let n = x.nrows();
        let p = x.ncols();
        let xa = augmented(x, self.fit_intercept);
        let y = DVector::from_iterator(n, labels.iter().map(|&l| f64::from(l)));
        let problem = Problem {
            xa: &xa,
            y: &y,
            p,
            alpha: if self.c.is_finite() { 1.0 / self.c } else { 0.0 },
        };

        let mut theta = DVector::<f64>::zeros(xa.ncols());
        if self.fit_intercept {
            // Start at the marginal log-odds.
            let prevalence = y.mean();
            theta[p] = (prevalence / (1.0 - prevalence)).ln();
        }

        let mut f = problem.objective(&theta);
        let mut converged = false;
        let mut grad_norm = f64::INFINITY;
        let mut n_iter = 0usize;

        while n_iter < self.max_iter {
            let (grad, hess) = problem.derivatives(&theta);
            grad_norm = grad.amax() / n as f64;
            if grad_norm <= self.tol {
                converged = true;
                break;
            }
            n_iter += 1;

            let Some(step) = solve_spd(&hess, &grad) else {
                return Err(AppError::estimation(
                    "Singular Hessian in logistic regression (perfectly collinear features?).",
                ));
            };

            // Armijo backtracking along -step.
            let slope = -grad.dot(&step);
            let mut t = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let candidate = &theta - &step * t;
                let f_new = problem.objective(&candidate);
                if f_new.is_finite() && f_new <= f + ARMIJO_C * t * slope {
                    accepted = Some((candidate, f_new));
                    break;
                }
                t *= 0.5;
            }

            let Some((next, f_next)) = accepted else {
                debug!(iter = n_iter, grad_norm, "line search stalled");
                break;
            };
            debug!(iter = n_iter, objective = f_next, step = t, grad_norm, "newton step");
            theta = next;
            f = f_next;
        }

        if !converged {
            let (grad, _) = problem.derivatives(&theta);
            grad_norm = grad.amax() / n as f64;
            converged = grad_norm <= self.tol;
        }
        if !converged {
            warn!(
                max_iter = self.max_iter,
                grad_norm,
                "logistic regression failed to converge; increase max_iter or rescale features"
            );
        }

        self.coef = Some(theta.rows(0, p).into_owned());
        self.intercept = if self.fit_intercept { theta[p] } else { 0.0 };
        self.diagnostics = LearnerDiagnostics {
            n_iter,
            converged,
            grad_norm,
        };
        Ok(())
    }

    fn predict_proba(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let z = self.decision_function(x)?;
        Ok(DMatrix::from_fn(x.nrows(), 2, |i, j| {
            let p1 = sigmoid(z[i]);
            if j == 1 { p1 } else { 1.0 - p1 }
        }))
    }

    fn is_fitted(&self) -> bool {
        self.coef.is_some()
    }

    fn name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn diagnostics(&self) -> LearnerDiagnostics {
        self.diagnostics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::Normal;

    fn simulated(n: usize, seed: u64) -> (DMatrix<f64>, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::<f64>::new(0.0, 1.0).unwrap();
        let mut x = DMatrix::zeros(n, 2);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let x0: f64 = normal.sample(&mut rng);
            let x1: f64 = normal.sample(&mut rng);
            x[(i, 0)] = x0;
            x[(i, 1)] = x1;
            let p = sigmoid(-0.5 + 1.5 * x0 - 1.0 * x1);
            labels.push(u8::from(rng.r#gen::<f64>() < p));
        }
        (x, labels)
    }

    #[test]
    fn recovers_coefficients_without_penalty() {
        let (x, labels) = simulated(20_000, 7);
        let mut model = LogisticRegression::new(100).with_c(f64::INFINITY);
        model.fit(&x, &labels).unwrap();

        let coef = model.coef().unwrap();
        assert!((coef[0] - 1.5).abs() < 0.1, "coef0 = {}", coef[0]);
        assert!((coef[1] + 1.0).abs() < 0.1, "coef1 = {}", coef[1]);
        assert!((model.intercept() + 0.5).abs() < 0.1, "b = {}", model.intercept());
        assert!(model.diagnostics().converged);
    }

    #[test]
    fn penalty_shrinks_towards_zero() {
        let (x, labels) = simulated(200, 11);
        let mut loose = LogisticRegression::new(100).with_c(100.0);
        let mut tight = LogisticRegression::new(100).with_c(1e-3);
        loose.fit(&x, &labels).unwrap();
        tight.fit(&x, &labels).unwrap();
        assert!(tight.coef().unwrap().norm() < loose.coef().unwrap().norm());
    }

    #[test]
    fn probabilities_are_normalised() {
        let (x, labels) = simulated(300, 3);
        let mut model = LogisticRegression::new(1000);
        model.fit(&x, &labels).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        for i in 0..proba.nrows() {
            assert!((proba[(i, 0)] + proba[(i, 1)] - 1.0).abs() < 1e-12);
            assert!((0.0..=1.0).contains(&proba[(i, 1)]));
        }
    }

    #[test]
    fn gradient_vanishes_at_solution() {
        // At the penalised optimum, Σ(μ - y) = 0 for the unpenalised intercept.
        let (x, labels) = simulated(500, 5);
        let mut model = LogisticRegression::new(1000).with_tol(1e-8);
        model.fit(&x, &labels).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        let resid: f64 = (0..x.nrows()).map(|i| proba[(i, 1)] - f64::from(labels[i])).sum();
        assert!(resid.abs() < 1e-4, "intercept score = {resid}");
    }

    #[test]
    fn intercept_can_be_disabled() {
        let (x, labels) = simulated(500, 13);
        let mut model = LogisticRegression::new(100).with_intercept(false);
        model.fit(&x, &labels).unwrap();
        assert_eq!(model.intercept(), 0.0);
        assert_eq!(model.coef().unwrap().len(), 2);
    }

    #[test]
    fn rejects_single_class() {
        let x = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
        let err = LogisticRegression::new(10).fit(&x, &[1, 1, 1]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn feature_count_mismatch_is_an_input_error() {
        let (x, labels) = simulated(200, 21);
        let mut model = LogisticRegression::new(100);
        model.fit(&x, &labels).unwrap();

        let wider = DMatrix::from_element(5, 3, 0.5);
        let err = model.predict_proba(&wider).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("2 columns"));
        assert!(model.decision_function(&wider).is_err());
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let x = DMatrix::from_row_slice(1, 1, &[1.0]);
        assert!(LogisticRegression::new(10).predict_proba(&x).is_err());
    }

    #[test]
    fn separable_data_reports_non_convergence_instead_of_failing() {
        let x = DMatrix::from_row_slice(4, 1, &[-2.0, -1.0, 1.0, 2.0]);
        let mut model = LogisticRegression::new(3).with_c(f64::INFINITY);
        model.fit(&x, &[0, 0, 1, 1]).unwrap();
        assert!(!model.diagnostics().converged);
        assert_eq!(model.diagnostics().n_iter, 3);
    }
}
