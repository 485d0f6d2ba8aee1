//! Nonparametric bootstrap for IPW effects.
//!
//! Every replicate resamples units with replacement and refits the whole
//! estimator (propensity model included), so the intervals reflect
//! propensity-estimation uncertainty too. Replicates are independent and run
//! in parallel; each draws from its own `StdRng` seeded from `(seed, index)`,
//! which makes results identical regardless of thread scheduling.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{Dataset, EffectType, Interval};
use crate::error::AppError;
use crate::estimation::ipw::{ARMS, Ipw};
use crate::models::Classifier;

/// Bootstrap settings.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapConfig {
    pub n_boot: usize,
    pub seed: u64,
    /// Two-sided coverage, e.g. `0.95`.
    pub confidence: f64,
}

/// Percentile intervals from the bootstrap distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSummary {
    pub n_boot: usize,
    pub n_failed: usize,
    pub confidence: f64,
    pub effects: BTreeMap<EffectType, Interval>,
    pub outcomes: BTreeMap<u8, Interval>,
    /// Bootstrap standard error of each effect.
    #[serde(with = "crate::domain::nonfinite::map")]
    pub effect_se: BTreeMap<EffectType, f64>,
}

struct Replicate {
    outcomes: [f64; 2],
    effects: Vec<f64>,
}

/// Bootstrap the population outcomes and requested effects of `estimator`.
///
/// `estimator` supplies the learner and weighting configuration; it is cloned
/// and refitted per replicate, never mutated.
pub fn bootstrap_effect<C: Classifier>(
    estimator: &Ipw<C>,
    data: &Dataset,
    effect_types: &[EffectType],
    config: &BootstrapConfig,
) -> Result<BootstrapSummary, AppError> {
    if config.n_boot < 2 {
        return Err(AppError::input("Bootstrap needs at least 2 replicates."));
    }
    if !(config.confidence > 0.0 && config.confidence < 1.0) {
        return Err(AppError::input("Confidence level must be in (0, 1)."));
    }
    let n = data.n_units();
    if n == 0 {
        return Err(AppError::no_data("Cannot bootstrap an empty dataset."));
    }

    info!(n_boot = config.n_boot, seed = config.seed, "bootstrapping");

    let results: Vec<Option<Replicate>> = (0..config.n_boot)
        .into_par_iter()
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(replicate_seed(config.seed, b));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let sample = data.select_rows(&rows);
            run_replicate(estimator, &sample, effect_types)
        })
        .collect();

    let replicates: Vec<Replicate> = results.into_iter().flatten().collect();
    let n_failed = config.n_boot - replicates.len();
    if n_failed > 0 {
        warn!(n_failed, "bootstrap replicates failed and were skipped");
    }
    if replicates.len() < 2 {
        return Err(AppError::estimation("Too few successful bootstrap replicates."));
    }

    let alpha = 1.0 - config.confidence;
    let mut effects = BTreeMap::new();
    let mut effect_se = BTreeMap::new();
    for (k, &kind) in effect_types.iter().enumerate() {
        let draws: Vec<f64> = replicates.iter().map(|r| r.effects[k]).filter(|v| v.is_finite()).collect();
        if draws.len() < 2 {
            continue;
        }
        effects.insert(kind, percentile_interval(draws.clone(), alpha));
        effect_se.insert(kind, std_dev(&draws));
    }

    let mut outcomes = BTreeMap::new();
    for (idx, arm) in ARMS.iter().enumerate() {
        let draws: Vec<f64> = replicates.iter().map(|r| r.outcomes[idx]).collect();
        outcomes.insert(*arm, percentile_interval(draws, alpha));
    }

    Ok(BootstrapSummary {
        n_boot: config.n_boot,
        n_failed,
        confidence: config.confidence,
        effects,
        outcomes,
        effect_se,
    })
}

fn run_replicate<C: Classifier>(
    estimator: &Ipw<C>,
    sample: &Dataset,
    effect_types: &[EffectType],
) -> Option<Replicate> {
    let mut ipw = estimator.clone();
    ipw.fit(&sample.x, &sample.a).ok()?;
    let outcomes = ipw
        .estimate_population_outcome(&sample.x, &sample.a, &sample.y, None)
        .ok()?;
    let o1 = outcomes.get(1)?;
    let o0 = outcomes.get(0)?;
    let effect = ipw.estimate_effect(o1, o0, effect_types);
    let effects = effect_types
        .iter()
        .map(|k| effect.get(*k).unwrap_or(f64::NAN))
        .collect();
    Some(Replicate {
        outcomes: [o0, o1],
        effects,
    })
}

fn replicate_seed(seed: u64, index: usize) -> u64 {
    // SplitMix64 finaliser keeps neighbouring indices decorrelated.
    let mut z = seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Percentile interval using linear interpolation between order statistics.
pub fn percentile_interval(mut draws: Vec<f64>, alpha: f64) -> Interval {
    draws.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Interval {
        lower: quantile_sorted(&draws, alpha / 2.0),
        upper: quantile_sorted(&draws, 1.0 - alpha / 2.0),
    }
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::ipw::IpwConfig;
    use crate::models::LogisticRegression;
    use nalgebra::DMatrix;

    #[test]
    fn percentile_interpolates() {
        let draws: Vec<f64> = (0..=100).map(f64::from).collect();
        let ci = percentile_interval(draws, 0.1);
        assert!((ci.lower - 5.0).abs() < 1e-12);
        assert!((ci.upper - 95.0).abs() < 1e-12);
    }

    #[test]
    fn replicate_seeds_differ() {
        assert_ne!(replicate_seed(42, 0), replicate_seed(42, 1));
        assert_ne!(replicate_seed(42, 0), replicate_seed(43, 0));
    }

    fn small_dataset() -> Dataset {
        let n = 200;
        let x = DMatrix::from_fn(n, 1, |i, _| (i as f64 / n as f64) - 0.5);
        let a: Vec<u8> = (0..n).map(|i| u8::from(i % 3 == 0 || i > 150)).collect();
        let y: Vec<f64> = (0..n).map(|i| 1.0 + 2.0 * f64::from(a[i]) + x[(i, 0)]).collect();
        Dataset {
            x,
            a,
            y,
            feature_names: vec!["x".into()],
            ids: (0..n).map(|i| i.to_string()).collect(),
            descriptors: BTreeMap::new(),
        }
    }

    #[test]
    fn bootstrap_is_reproducible_and_brackets_estimate() {
        let data = small_dataset();
        let mut ipw = Ipw::new(LogisticRegression::new(1000), IpwConfig::default()).unwrap();
        ipw.fit(&data.x, &data.a).unwrap();
        let outcomes = ipw.estimate_population_outcome(&data.x, &data.a, &data.y, None).unwrap();
        let point = outcomes.get(1).unwrap() - outcomes.get(0).unwrap();

        let cfg = BootstrapConfig {
            n_boot: 50,
            seed: 9,
            confidence: 0.95,
        };
        let first = bootstrap_effect(&ipw, &data, &[EffectType::Diff], &cfg).unwrap();
        let second = bootstrap_effect(&ipw, &data, &[EffectType::Diff], &cfg).unwrap();

        let ci = first.effects[&EffectType::Diff];
        assert_eq!(ci, second.effects[&EffectType::Diff]);
        assert_eq!(first.n_failed, 0);
        assert!(ci.lower <= point && point <= ci.upper, "{point} not in {ci:?}");
        assert!(first.effect_se[&EffectType::Diff] > 0.0);
        assert!(first.outcomes[&0].lower < first.outcomes[&1].lower);
    }

    #[test]
    fn rejects_degenerate_settings() {
        let data = small_dataset();
        let ipw = Ipw::new(LogisticRegression::new(100), IpwConfig::default()).unwrap();
        let cfg = BootstrapConfig {
            n_boot: 1,
            seed: 0,
            confidence: 0.95,
        };
        assert!(bootstrap_effect(&ipw, &data, &[EffectType::Diff], &cfg).is_err());
        let cfg = BootstrapConfig {
            n_boot: 10,
            seed: 0,
            confidence: 1.0,
        };
        assert!(bootstrap_effect(&ipw, &data, &[EffectType::Diff], &cfg).is_err());
    }
}
