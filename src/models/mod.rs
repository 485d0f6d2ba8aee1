//! Propensity learners.
//!
//! The weighting estimator only talks to the [`Classifier`] trait; the
//! logistic regression is the learner used by the CLI.

pub mod classifier;
pub mod logistic;

pub use classifier::*;
pub use logistic::*;
