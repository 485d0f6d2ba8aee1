//! Causal effect estimation.
//!
//! Responsibilities:
//!
//! - inverse-propensity weights and per-arm population outcomes (`ipw`)
//! - effect contrasts between arms (`ipw::estimate_effect`)
//! - bootstrap confidence intervals (parallel refits)

pub mod bootstrap;
pub mod ipw;

pub use bootstrap::*;
pub use ipw::*;
