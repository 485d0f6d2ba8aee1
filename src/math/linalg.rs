//! Small dense linear solves.
//!
//! The Newton step of the logistic fit solves `H Δ = g` where `H` is the
//! (penalised) Hessian. `H` is symmetric positive definite whenever the L2
//! penalty is active, so Cholesky is the fast path. Unpenalised fits on
//! collinear dummy columns can make `H` singular; in that case we fall back to
//! an SVD least-squares solve with progressively looser tolerances.

use nalgebra::{DMatrix, DVector};

/// Solve a symmetric positive (semi-)definite system.
///
/// Returns `None` if neither Cholesky nor the SVD fallback gives a finite solution.
pub fn solve_spd(h: &DMatrix<f64>, g: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = h.clone().cholesky() {
        let x = chol.solve(g);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }
    solve_least_squares(h, g)
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
