//! `ipw-effect` library crate.
//!
//! The binary (`ipw`) is a thin wrapper around this library so that:
//!
//! - the estimator is testable without spawning processes
//! - the propensity learner and weighting model are reusable on other datasets
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod estimation;
pub mod evaluation;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod report;
