//! Command-line parsing for the IPW effect estimator.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the estimation code.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::domain::EffectType;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "ipw",
    version,
    about = "Inverse propensity weighting on the NHEFS smoking-cessation data"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the propensity model, weight units, and estimate the effect of quitting smoking.
    Estimate(EstimateArgs),
    /// Download the public NHEFS CSV.
    Fetch(FetchArgs),
    /// Write a synthetic NHEFS-shaped CSV with a known effect.
    Simulate(SimulateArgs),
    /// Print a previously exported result JSON.
    Show(ShowArgs),
}

/// Options for `ipw estimate`.
#[derive(Debug, Parser, Clone)]
pub struct EstimateArgs {
    /// NHEFS CSV path (default: $IPW_NHEFS_CSV or data/nhefs.csv).
    #[arg(short, long, value_name = "CSV")]
    pub data: Option<PathBuf>,

    /// Maximum Newton iterations for the logistic propensity model.
    #[arg(long, default_value_t = 1000)]
    pub max_iter: usize,

    /// Inverse L2 regularization strength (use `inf` for no penalty).
    #[arg(long, default_value_t = 1.0)]
    pub c: f64,

    /// Convergence tolerance on the scaled gradient.
    #[arg(long, default_value_t = 1e-4)]
    pub tol: f64,

    /// Lower clip for propensities before inversion.
    #[arg(long)]
    pub clip_min: Option<f64>,

    /// Upper clip for propensities before inversion.
    #[arg(long)]
    pub clip_max: Option<f64>,

    /// Use stabilized weights (multiply by treatment prevalence).
    #[arg(long)]
    pub stabilized: bool,

    /// Effect contrast(s) to report.
    #[arg(long = "effect", value_enum, num_args = 1.., default_values_t = [EffectType::Diff])]
    pub effects: Vec<EffectType>,

    /// Number of bootstrap replicates for confidence intervals (0 disables).
    #[arg(long, default_value_t = 0)]
    pub bootstrap: usize,

    /// Random seed for the bootstrap.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Confidence level for bootstrap intervals.
    #[arg(long, default_value_t = 0.95)]
    pub confidence: f64,

    /// Print the covariate balance table.
    #[arg(long)]
    pub balance: bool,

    /// Keep participants without a 1982 weight (they are then reported as row errors).
    #[arg(long)]
    pub no_restrict: bool,

    /// Do not add squared continuous confounders.
    #[arg(long)]
    pub no_augment: bool,

    /// Keep categorical confounders as integer codes.
    #[arg(long)]
    pub no_onehot: bool,

    /// Export per-unit propensities and weights to CSV.
    #[arg(long)]
    pub export_weights: Option<PathBuf>,

    /// Export the run result to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,
}

/// Options for `ipw fetch`.
#[derive(Debug, Parser)]
pub struct FetchArgs {
    /// Download URL (default: $IPW_NHEFS_URL or the public NHEFS extract).
    #[arg(long)]
    pub url: Option<String>,

    /// Output path (default: $IPW_NHEFS_CSV or data/nhefs.csv).
    #[arg(short, long, value_name = "CSV")]
    pub out: Option<PathBuf>,
}

/// Options for `ipw simulate`.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Number of participants.
    #[arg(short = 'n', long, default_value_t = 1629)]
    pub n: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// True additive effect of quitting on weight change (kg).
    #[arg(long, default_value_t = 3.5)]
    pub true_effect: f64,

    /// Probability of a missing 1982 weight.
    #[arg(long, default_value_t = 0.04)]
    pub censor_prob: f64,

    /// Output CSV path.
    #[arg(short, long, value_name = "CSV")]
    pub out: PathBuf,
}

/// Options for `ipw show`.
#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Result JSON produced by `ipw estimate --export-json`.
    #[arg(value_name = "JSON")]
    pub result: PathBuf,
}
