//! Logistic link helpers.
//!
//! Numerical notes:
//! - `sigmoid` branches on the sign of `z` so `exp` is only ever evaluated on a
//!   non-positive argument (no overflow for large `|z|`).
//! - `log1p_exp(z) = ln(1 + e^z)` switches to `z + ln(1 + e^{-z})` for positive `z`.

/// Logistic function `1 / (1 + e^{-z})`.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^z)` without overflow.
pub fn log1p_exp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Binary cross-entropy of label `y ∈ {0, 1}` given the linear predictor `z`.
///
/// Written as `ln(1 + e^z) - y·z`, which never takes the log of a rounded probability.
pub fn log_loss(y: f64, z: f64) -> f64 {
    log1p_exp(z) - y * z
}
