//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the in-memory dataset (`Dataset`)
//! - effect contrasts (`EffectType`) and estimator outputs
//! - the resolved run configuration (`EstimateConfig`)
//! - JSON encoding for non-finite floats (`nonfinite`)

pub mod nonfinite;
pub mod types;

pub use types::*;
