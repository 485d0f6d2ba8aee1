//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and initialises logging
//! - loads (or downloads / simulates) NHEFS data
//! - runs the weighting pipeline
//! - prints reports and writes optional exports

use clap::Parser;
use tracing::info;

use crate::cli::{Command, EstimateArgs, FetchArgs, ShowArgs, SimulateArgs};
use crate::data::{SimulationConfig, fetch_nhefs, simulate_nhefs, write_raw_csv};
use crate::domain::EstimateConfig;
use crate::error::AppError;
use crate::io::{EstimateReport, read_result_json, write_result_json, write_weights_csv};

pub mod pipeline;

/// Entry point for the `ipw` binary.
pub fn run() -> Result<(), AppError> {
    // `ipw` and `ipw --data x.csv` behave like `ipw estimate ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    crate::config::load_dotenv();
    crate::logging::init_logging(cli.verbose);

    match cli.command {
        Command::Estimate(args) => handle_estimate(args),
        Command::Fetch(args) => handle_fetch(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Show(args) => handle_show(args),
    }
}

fn handle_estimate(args: EstimateArgs) -> Result<(), AppError> {
    let config = estimate_config_from_args(&args);
    let run = pipeline::run_estimate(&config)?;

    println!("{}", crate::report::format_run_summary(&run, &config));
    if let Some(balance) = &run.balance {
        println!("{}", crate::report::format_balance(balance));
    }

    if let Some(path) = &config.export_weights {
        let data = run.dataset();
        write_weights_csv(path, &data.ids, &data.a, &data.y, &run.propensity, &run.weights)?;
        info!(path = %path.display(), "weights exported");
    }
    if let Some(path) = &config.export_json {
        write_result_json(path, &EstimateReport::from_run(&run, &config))?;
        info!(path = %path.display(), "result exported");
    }

    Ok(())
}

fn handle_fetch(args: FetchArgs) -> Result<(), AppError> {
    let url = crate::config::resolve_url(args.url);
    let out = crate::config::resolve_data_path(args.out);
    let bytes = fetch_nhefs(&url, &out)?;
    println!("Saved {bytes} bytes to {}", out.display());
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = SimulationConfig {
        n: args.n,
        seed: args.seed,
        true_effect: args.true_effect,
        censor_prob: args.censor_prob,
        ..SimulationConfig::default()
    };
    let data = simulate_nhefs(&config)?;
    write_raw_csv(&args.out, &data)?;
    println!(
        "Wrote {} simulated participants ({} censored, true effect {:.3}) to {}",
        data.rows.len(),
        data.n_censored(),
        data.true_effect,
        args.out.display()
    );
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let report = read_result_json(&args.result)?;
    println!("=== ipw result ({}) ===", report.generated_at.to_rfc3339());
    println!("Data: {}", report.data_path);
    println!(
        "Units: n={} | treated={} | control={}",
        report.stats.n_units, report.stats.n_treated, report.stats.n_control
    );
    for (arm, value) in &report.outcomes.by_arm {
        println!("E[Y({arm})] = {value:.4}");
    }
    for (kind, value) in &report.effect.values {
        println!("{} = {value:.4}", kind.display_name());
    }
    if let Some(balance) = &report.balance {
        println!("\n{}", crate::report::format_balance(balance));
    }
    Ok(())
}

pub fn estimate_config_from_args(args: &EstimateArgs) -> EstimateConfig {
    EstimateConfig {
        data_path: crate::config::resolve_data_path(args.data.clone()),
        restrict: !args.no_restrict,
        augment: !args.no_augment,
        onehot: !args.no_onehot,
        max_iter: args.max_iter,
        c: args.c,
        tol: args.tol,
        clip_min: args.clip_min,
        clip_max: args.clip_max,
        use_stabilized: args.stabilized,
        effects: args.effects.clone(),
        bootstrap: args.bootstrap,
        seed: args.seed,
        confidence: args.confidence,
        balance: args.balance,
        export_weights: args.export_weights.clone(),
        export_json: args.export_json.clone(),
    }
}

/// Rewrite argv so `ipw` defaults to `ipw estimate`.
///
/// Rules:
/// - `ipw`                          -> `ipw estimate`
/// - `ipw --data x.csv ...`         -> `ipw estimate --data x.csv ...`
/// - `ipw -v ...` (global flags)    -> unchanged when a subcommand follows
/// - `ipw --help/--version/-h/-V`   -> unchanged
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let first_non_global = argv
        .iter()
        .skip(1)
        .position(|a| !is_verbosity_flag(a))
        .map(|p| p + 1);

    let Some(idx) = first_non_global else {
        argv.push("estimate".to_string());
        return argv;
    };

    let arg = argv[idx].as_str();
    let is_top_level_help_or_version = matches!(arg, "-h" | "--help" | "-V" | "--version" | "help");
    let is_subcommand = matches!(arg, "estimate" | "fetch" | "simulate" | "show");
    if is_top_level_help_or_version || is_subcommand {
        return argv;
    }

    if arg.starts_with('-') {
        argv.insert(idx, "estimate".to_string());
    }
    argv
}

fn is_verbosity_flag(arg: &str) -> bool {
    arg == "--verbose" || (arg.len() > 1 && arg.starts_with('-') && !arg.starts_with("--") && arg[1..].chars().all(|c| c == 'v'))
}
