//! Shared estimation pipeline used by the CLI and by tests.
//!
//! load NHEFS -> fit propensity model -> weights -> per-arm outcomes -> effect
//! (-> optional bootstrap and balance diagnostics)

use tracing::info;

use crate::data::{LoadedNhefs, NhefsOptions, load_nhefs};
use crate::domain::{Dataset, EffectEstimate, EffectType, EstimateConfig, PopulationOutcome};
use crate::error::AppError;
use crate::estimation::{BootstrapConfig, BootstrapSummary, Ipw, IpwConfig, bootstrap_effect};
use crate::evaluation::{BalanceTable, covariate_balance};
use crate::models::{Classifier, LogisticRegression};

/// All computed outputs of a single `ipw estimate` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub loaded: LoadedNhefs,
    pub estimator: Ipw<LogisticRegression>,
    /// `P(A = 1 | X)` per unit (after clipping, if any).
    pub propensity: Vec<f64>,
    /// Weight of each unit's observed arm.
    pub weights: Vec<f64>,
    pub outcomes: PopulationOutcome,
    pub effect: EffectEstimate,
    pub bootstrap: Option<BootstrapSummary>,
    pub balance: Option<BalanceTable>,
}

impl RunOutput {
    pub fn dataset(&self) -> &Dataset {
        &self.loaded.dataset
    }
}

/// Load the dataset named by `config` and run the estimation pipeline on it.
pub fn run_estimate(config: &EstimateConfig) -> Result<RunOutput, AppError> {
    let options = NhefsOptions {
        restrict: config.restrict,
        augment: config.augment,
        onehot: config.onehot,
    };
    let loaded = load_nhefs(&config.data_path, &options)?;
    run_estimate_on(loaded, config)
}

/// Run the estimation pipeline on an already loaded dataset.
pub fn run_estimate_on(loaded: LoadedNhefs, config: &EstimateConfig) -> Result<RunOutput, AppError> {
    let data = &loaded.dataset;

    let learner = LogisticRegression::new(config.max_iter)
        .with_c(config.c)
        .with_tol(config.tol);
    let ipw_config = IpwConfig {
        clip_min: config.clip_min,
        clip_max: config.clip_max,
        use_stabilized: config.use_stabilized,
        verbose: false,
    };

    let mut estimator = Ipw::new(learner, ipw_config)?;
    estimator.fit(&data.x, &data.a)?;

    let propensity = estimator.compute_propensity(&data.x, 1)?;
    let weights = estimator.compute_weights(&data.x, &data.a, None)?;
    let outcomes = estimator.estimate_population_outcome(&data.x, &data.a, &data.y, Some(&weights))?;

    let (o1, o0) = match (outcomes.get(1), outcomes.get(0)) {
        (Some(o1), Some(o0)) => (o1, o0),
        _ => return Err(AppError::estimation("Missing population outcome for a treatment arm.")),
    };
    let effects = if config.effects.is_empty() {
        vec![EffectType::Diff]
    } else {
        config.effects.clone()
    };
    let effect = estimator.estimate_effect(o1, o0, &effects);
    info!(outcome_1 = o1, outcome_0 = o0, effect = ?effect.values, "effect estimated");

    let bootstrap = if config.bootstrap > 0 {
        let boot_cfg = BootstrapConfig {
            n_boot: config.bootstrap,
            seed: config.seed,
            confidence: config.confidence,
        };
        Some(bootstrap_effect(&estimator, data, &effects, &boot_cfg)?)
    } else {
        None
    };

    let balance = if config.balance {
        Some(covariate_balance(&data.x, &data.a, &weights, &data.feature_names)?)
    } else {
        None
    };

    if !estimator.learner().diagnostics().converged {
        info!("effect reported from a non-converged propensity model");
    }

    Ok(RunOutput {
        loaded,
        estimator,
        propensity,
        weights,
        outcomes,
        effect,
        bootstrap,
        balance,
    })
}
