//! Inverse propensity weighting.
//!
//! Given a fitted propensity learner `e_t(x) = P(A = t | X = x)`, each unit
//! receives the weight `1 / e_{a_i}(x_i)` of the arm it was actually assigned.
//! The weighted mean outcome of arm `t` then estimates the population mean of
//! the potential outcome `Y(t)`.
//!
//! Stabilised weights multiply the arm-`t` column by the marginal prevalence
//! `P(A = t)`; this leaves the per-arm weighted means unchanged but keeps the
//! weights on the scale of the sample size.

use std::collections::BTreeMap;

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::domain::{EffectEstimate, EffectType, PopulationOutcome};
use crate::error::AppError;
use crate::models::Classifier;

/// Treatment values supported by the estimator.
pub const ARMS: [u8; 2] = [0, 1];

/// Propensities closer than this to 0 or 1 are reported as positivity concerns.
const POSITIVITY_EPS: f64 = 1e-3;

/// Weighting options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpwConfig {
    /// Lower bound applied to every propensity before inversion.
    pub clip_min: Option<f64>,
    /// Upper bound applied to every propensity before inversion.
    pub clip_max: Option<f64>,
    /// Multiply each arm's weights by that arm's marginal prevalence.
    pub use_stabilized: bool,
    /// Log per-arm weight summaries at info level.
    pub verbose: bool,
}

impl IpwConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(lo) = self.clip_min {
            if !(0.0..0.5).contains(&lo) {
                return Err(AppError::input(format!("clip_min must be in [0, 0.5), got {lo}.")));
            }
        }
        if let Some(hi) = self.clip_max {
            if !(hi > 0.5 && hi <= 1.0) {
                return Err(AppError::input(format!("clip_max must be in (0.5, 1], got {hi}.")));
            }
        }
        Ok(())
    }

    fn clip(&self, p: f64) -> f64 {
        let p = self.clip_min.map_or(p, |lo| p.max(lo));
        self.clip_max.map_or(p, |hi| p.min(hi))
    }

    fn clipping(&self) -> bool {
        self.clip_min.is_some() || self.clip_max.is_some()
    }
}

/// Inverse-propensity-weighting estimator around a propensity learner.
#[derive(Debug, Clone)]
pub struct Ipw<C: Classifier> {
    learner: C,
    config: IpwConfig,
    fitted: bool,
}

impl<C: Classifier> Ipw<C> {
    pub fn new(learner: C, config: IpwConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            learner,
            config,
            fitted: false,
        })
    }

    pub fn learner(&self) -> &C {
        &self.learner
    }

    pub fn config(&self) -> &IpwConfig {
        &self.config
    }

    /// Fit the propensity learner on covariates `x` and treatment `a`.
    pub fn fit(&mut self, x: &DMatrix<f64>, a: &[u8]) -> Result<&mut Self, AppError> {
        check_treatment(a)?;
        if x.nrows() != a.len() {
            return Err(AppError::input(format!(
                "X has {} rows but the treatment vector has {} entries.",
                x.nrows(),
                a.len()
            )));
        }
        self.learner.fit(x, a)?;
        self.fitted = true;

        let diag = self.learner.diagnostics();
        info!(
            learner = self.learner.name(),
            n = a.len(),
            n_iter = diag.n_iter,
            converged = diag.converged,
            "propensity model fitted"
        );
        Ok(self)
    }

    fn ensure_fitted(&self) -> Result<(), AppError> {
        if self.fitted && self.learner.is_fitted() {
            Ok(())
        } else {
            Err(AppError::estimation("IPW estimator must be fitted before use; call `fit` first."))
        }
    }

    /// `n × 2` matrix of `P(A = t | X)` for `t = 0, 1`, clipped when configured.
    pub fn compute_propensity_matrix(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.ensure_fitted()?;
        let proba = self.learner.predict_proba(x)?;
        if proba.ncols() != ARMS.len() || proba.nrows() != x.nrows() {
            return Err(AppError::estimation(format!(
                "Learner returned a {}x{} probability matrix for {} rows.",
                proba.nrows(),
                proba.ncols(),
                x.nrows()
            )));
        }

        if self.config.clipping() {
            let clipped = proba.map(|p| self.config.clip(p));
            let n_changed = proba.iter().zip(clipped.iter()).filter(|(p, c)| p != c).count();
            if n_changed > 0 {
                debug!(n_changed, "propensities clipped");
            }
            return Ok(clipped);
        }

        let extreme = proba
            .column(1)
            .iter()
            .filter(|&&p| p < POSITIVITY_EPS || p > 1.0 - POSITIVITY_EPS)
            .count();
        if extreme > 0 {
            warn!(
                extreme,
                "propensities within {POSITIVITY_EPS} of 0 or 1; weights may be unstable (consider clipping)"
            );
        }
        Ok(proba)
    }

    /// Propensity of receiving `treatment_value` for every unit.
    pub fn compute_propensity(&self, x: &DMatrix<f64>, treatment_value: u8) -> Result<Vec<f64>, AppError> {
        let col = arm_column(treatment_value)?;
        let matrix = self.compute_propensity_matrix(x)?;
        Ok(matrix.column(col).iter().copied().collect())
    }

    /// `n × 2` matrix of inverse-propensity weights, one column per arm.
    pub fn compute_weight_matrix(&self, x: &DMatrix<f64>, a: &[u8]) -> Result<DMatrix<f64>, AppError> {
        check_treatment(a)?;
        if x.nrows() != a.len() {
            return Err(AppError::input("X and treatment vector lengths differ."));
        }
        let propensity = self.compute_propensity_matrix(x)?;
        if propensity.iter().any(|&p| p <= 0.0) {
            return Err(AppError::estimation(
                "Zero propensity encountered; set clip_min to bound the weights.",
            ));
        }
        let mut weights = propensity.map(|p| 1.0 / p);

        if self.config.use_stabilized {
            let prevalence = prevalence(a);
            for (col, arm) in ARMS.iter().enumerate() {
                let share = prevalence[arm];
                weights.column_mut(col).iter_mut().for_each(|w| *w *= share);
            }
        }
        Ok(weights)
    }

    /// Weights for `treatment_value`, or for each unit's observed arm when `None`.
    pub fn compute_weights(
        &self,
        x: &DMatrix<f64>,
        a: &[u8],
        treatment_value: Option<u8>,
    ) -> Result<Vec<f64>, AppError> {
        let matrix = self.compute_weight_matrix(x, a)?;
        match treatment_value {
            Some(t) => {
                let col = arm_column(t)?;
                Ok(matrix.column(col).iter().copied().collect())
            }
            None => Ok(a
                .iter()
                .enumerate()
                .map(|(i, &ai)| matrix[(i, usize::from(ai))])
                .collect()),
        }
    }

    /// Weighted mean outcome per arm.
    ///
    /// `w` overrides the weights (one per unit); otherwise they are computed
    /// from the fitted learner via [`Ipw::compute_weights`].
    pub fn estimate_population_outcome(
        &self,
        x: &DMatrix<f64>,
        a: &[u8],
        y: &[f64],
        w: Option<&[f64]>,
    ) -> Result<PopulationOutcome, AppError> {
        if y.len() != a.len() {
            return Err(AppError::input(format!(
                "Outcome has {} entries but the treatment vector has {}.",
                y.len(),
                a.len()
            )));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(AppError::input("Outcome contains non-finite values."));
        }

        let computed;
        let weights = match w {
            Some(w) => {
                if w.len() != a.len() {
                    return Err(AppError::input("Weight vector length differs from treatment vector."));
                }
                if let Some(bad) = w.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
                    return Err(AppError::input(format!(
                        "Weights must be finite and non-negative, found {bad}."
                    )));
                }
                check_treatment(a)?;
                w
            }
            None => {
                computed = self.compute_weights(x, a, None)?;
                computed.as_slice()
            }
        };

        let mut by_arm = BTreeMap::new();
        for arm in ARMS {
            let (sum_wy, sum_w) = a
                .iter()
                .zip(y)
                .zip(weights)
                .filter(|((ai, _), _)| **ai == arm)
                .fold((0.0, 0.0), |(swy, sw), ((_, yi), wi)| (swy + wi * yi, sw + wi));
            if !(sum_w > 0.0) {
                return Err(AppError::estimation(format!(
                    "Treatment arm {arm} has no units or zero total weight."
                )));
            }
            let mean = sum_wy / sum_w;
            if self.config.verbose {
                info!(arm, sum_w, mean, "weighted arm summary");
            }
            by_arm.insert(arm, mean);
        }
        Ok(PopulationOutcome { by_arm })
    }

    /// IPW is a population-level estimator; individual outcomes are not defined.
    pub fn estimate_individual_outcome(
        &self,
        _x: &DMatrix<f64>,
        _a: &[u8],
    ) -> Result<DMatrix<f64>, AppError> {
        Err(AppError::estimation(
            "IPW does not estimate individual outcomes; use estimate_population_outcome.",
        ))
    }

    /// Contrast two potential-outcome estimates.
    pub fn estimate_effect(&self, outcome_1: f64, outcome_0: f64, effect_types: &[EffectType]) -> EffectEstimate {
        estimate_effect(outcome_1, outcome_0, effect_types)
    }
}

/// Contrast two potential-outcome estimates.
///
/// Undefined contrasts (zero denominators, odds of values outside `(0, 1)`)
/// come back as `NaN` with a warning rather than an error.
pub fn estimate_effect(outcome_1: f64, outcome_0: f64, effect_types: &[EffectType]) -> EffectEstimate {
    let kinds: &[EffectType] = if effect_types.is_empty() { &[EffectType::Diff] } else { effect_types };

    let mut values = BTreeMap::new();
    for &kind in kinds {
        let value = match kind {
            EffectType::Diff => outcome_1 - outcome_0,
            EffectType::Ratio => {
                if outcome_0 == 0.0 {
                    warn!("ratio effect undefined: outcome_0 is zero");
                    f64::NAN
                } else {
                    outcome_1 / outcome_0
                }
            }
            EffectType::Or => {
                let in_unit = |p: f64| p > 0.0 && p < 1.0;
                if in_unit(outcome_1) && in_unit(outcome_0) {
                    (outcome_1 / (1.0 - outcome_1)) / (outcome_0 / (1.0 - outcome_0))
                } else {
                    warn!(outcome_1, outcome_0, "odds ratio undefined for outcomes outside (0, 1)");
                    f64::NAN
                }
            }
        };
        values.insert(kind, value);
    }
    EffectEstimate { values }
}

fn check_treatment(a: &[u8]) -> Result<(), AppError> {
    if a.is_empty() {
        return Err(AppError::no_data("Treatment vector is empty."));
    }
    if let Some(bad) = a.iter().find(|&&v| v > 1) {
        return Err(AppError::input(format!(
            "Treatment values must be 0 or 1, found {bad}."
        )));
    }
    Ok(())
}

fn arm_column(treatment_value: u8) -> Result<usize, AppError> {
    ARMS.iter()
        .position(|&t| t == treatment_value)
        .ok_or_else(|| AppError::input(format!("Unknown treatment value {treatment_value}.")))
}

/// Share of units in each arm.
fn prevalence(a: &[u8]) -> BTreeMap<u8, f64> {
    let n = a.len() as f64;
    ARMS.iter()
        .map(|&arm| (arm, a.iter().filter(|&&v| v == arm).count() as f64 / n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LearnerDiagnostics, LogisticRegression};

    /// Learner that returns the first covariate as `P(A = 1)`.
    #[derive(Debug, Clone, Default)]
    struct FirstColumnPropensity {
        fitted: bool,
    }

    impl Classifier for FirstColumnPropensity {
        fn fit(&mut self, _x: &DMatrix<f64>, _labels: &[u8]) -> Result<(), AppError> {
            self.fitted = true;
            Ok(())
        }

        fn predict_proba(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
            Ok(DMatrix::from_fn(x.nrows(), 2, |i, j| {
                if j == 1 { x[(i, 0)] } else { 1.0 - x[(i, 0)] }
            }))
        }

        fn is_fitted(&self) -> bool {
            self.fitted
        }

        fn name(&self) -> &'static str {
            "FirstColumnPropensity"
        }

        fn diagnostics(&self) -> LearnerDiagnostics {
            LearnerDiagnostics::default()
        }
    }

    fn fixture() -> (DMatrix<f64>, Vec<u8>, Vec<f64>) {
        let x = DMatrix::from_column_slice(4, 1, &[0.8, 0.5, 0.25, 0.5]);
        let a = vec![1, 1, 0, 0];
        let y = vec![10.0, 6.0, 2.0, 4.0];
        (x, a, y)
    }

    fn fitted(config: IpwConfig) -> Ipw<FirstColumnPropensity> {
        let (x, a, _) = fixture();
        let mut ipw = Ipw::new(FirstColumnPropensity::default(), config).unwrap();
        ipw.fit(&x, &a).unwrap();
        ipw
    }

    #[test]
    fn weights_follow_observed_arm() {
        let (x, a, _) = fixture();
        let ipw = fitted(IpwConfig::default());
        let w = ipw.compute_weights(&x, &a, None).unwrap();
        let expected = [1.0 / 0.8, 1.0 / 0.5, 1.0 / 0.75, 1.0 / 0.5];
        for (got, want) in w.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }

        let w1 = ipw.compute_weights(&x, &a, Some(1)).unwrap();
        assert!((w1[2] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn population_outcome_is_weighted_mean_per_arm() {
        let (x, a, y) = fixture();
        let ipw = fitted(IpwConfig::default());
        let outcomes = ipw.estimate_population_outcome(&x, &a, &y, None).unwrap();

        let m1 = (1.25 * 10.0 + 2.0 * 6.0) / (1.25 + 2.0);
        let m0 = (4.0 / 3.0 * 2.0 + 2.0 * 4.0) / (4.0 / 3.0 + 2.0);
        assert!((outcomes.get(1).unwrap() - m1).abs() < 1e-12);
        assert!((outcomes.get(0).unwrap() - m0).abs() < 1e-12);

        let effect = ipw.estimate_effect(outcomes.get(1).unwrap(), outcomes.get(0).unwrap(), &[EffectType::Diff]);
        assert!((effect.get(EffectType::Diff).unwrap() - (m1 - m0)).abs() < 1e-12);
    }

    #[test]
    fn stabilised_weights_scale_by_prevalence_but_keep_means() {
        let (x, a, y) = fixture();
        let plain = fitted(IpwConfig::default());
        let stable = fitted(IpwConfig {
            use_stabilized: true,
            ..IpwConfig::default()
        });

        let w_plain = plain.compute_weights(&x, &a, None).unwrap();
        let w_stable = stable.compute_weights(&x, &a, None).unwrap();
        for (p, s) in w_plain.iter().zip(&w_stable) {
            assert!((s - 0.5 * p).abs() < 1e-12);
        }

        let o_plain = plain.estimate_population_outcome(&x, &a, &y, None).unwrap();
        let o_stable = stable.estimate_population_outcome(&x, &a, &y, None).unwrap();
        for arm in ARMS {
            assert!((o_plain.get(arm).unwrap() - o_stable.get(arm).unwrap()).abs() < 1e-12);
        }
    }

    #[test]
    fn clipping_bounds_propensities() {
        let (x, _, _) = fixture();
        let ipw = fitted(IpwConfig {
            clip_min: Some(0.3),
            clip_max: Some(0.7),
            ..IpwConfig::default()
        });
        let p1 = ipw.compute_propensity(&x, 1).unwrap();
        assert_eq!(p1, vec![0.7, 0.5, 0.3, 0.5]);
        let p0 = ipw.compute_propensity(&x, 0).unwrap();
        assert!((p0[0] - 0.3).abs() < 1e-12);
        assert!((p0[2] - 0.7).abs() < 1e-12);
    }

    #[test]
    fn explicit_weights_override_learner() {
        let (x, a, y) = fixture();
        let ipw = fitted(IpwConfig::default());
        let outcomes = ipw
            .estimate_population_outcome(&x, &a, &y, Some(&[1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        assert_eq!(outcomes.get(1), Some(8.0));
        assert_eq!(outcomes.get(0), Some(3.0));
    }

    #[test]
    fn invalid_explicit_weights_are_rejected() {
        let (x, a, y) = fixture();
        let ipw = fitted(IpwConfig::default());
        for bad in [[1.0, 1.0, -0.5, 3.0], [1.0, f64::NAN, 1.0, 1.0], [f64::INFINITY, 1.0, 1.0, 1.0]] {
            let err = ipw.estimate_population_outcome(&x, &a, &y, Some(&bad)).unwrap_err();
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn zero_propensity_requires_clipping() {
        let x = DMatrix::from_column_slice(4, 1, &[0.0, 0.5, 0.25, 0.5]);
        let a = [1, 1, 0, 0];

        let ipw = fitted(IpwConfig::default());
        // Unclipped extreme propensities are passed through (with a positivity warning).
        let p1 = ipw.compute_propensity(&x, 1).unwrap();
        assert_eq!(p1[0], 0.0);
        let err = ipw.compute_weights(&x, &a, None).unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("clip_min"));

        let clipped = fitted(IpwConfig {
            clip_min: Some(0.01),
            ..IpwConfig::default()
        });
        let w = clipped.compute_weights(&x, &a, None).unwrap();
        assert!((w[0] - 100.0).abs() < 1e-9);
        assert!(w.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn use_before_fit_is_an_error() {
        let (x, a, y) = fixture();
        let ipw = Ipw::new(FirstColumnPropensity::default(), IpwConfig::default()).unwrap();
        assert!(ipw.compute_propensity_matrix(&x).is_err());
        assert!(ipw.estimate_population_outcome(&x, &a, &y, None).is_err());
    }

    #[test]
    fn invalid_clip_bounds_are_rejected() {
        let bad = IpwConfig {
            clip_min: Some(0.6),
            ..IpwConfig::default()
        };
        assert!(Ipw::new(FirstColumnPropensity::default(), bad).is_err());
        let bad = IpwConfig {
            clip_max: Some(0.4),
            ..IpwConfig::default()
        };
        assert!(Ipw::new(FirstColumnPropensity::default(), bad).is_err());
    }

    #[test]
    fn empty_arm_is_an_error() {
        let (x, _, y) = fixture();
        let ipw = fitted(IpwConfig::default());
        let err = ipw
            .estimate_population_outcome(&x, &[1, 1, 1, 1], &y, None)
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn non_binary_treatment_is_rejected() {
        let (x, _, _) = fixture();
        let mut ipw = Ipw::new(FirstColumnPropensity::default(), IpwConfig::default()).unwrap();
        assert!(ipw.fit(&x, &[0, 1, 2, 0]).is_err());
    }

    #[test]
    fn individual_outcomes_are_unsupported() {
        let (x, a, _) = fixture();
        let ipw = fitted(IpwConfig::default());
        assert!(ipw.estimate_individual_outcome(&x, &a).is_err());
    }

    #[test]
    fn effect_contrasts() {
        let e = estimate_effect(0.6, 0.4, &EffectType::ALL);
        assert!((e.get(EffectType::Diff).unwrap() - 0.2).abs() < 1e-12);
        assert!((e.get(EffectType::Ratio).unwrap() - 1.5).abs() < 1e-12);
        assert!((e.get(EffectType::Or).unwrap() - 2.25).abs() < 1e-12);

        let e = estimate_effect(3.0, 0.0, &[EffectType::Ratio, EffectType::Or]);
        assert!(e.get(EffectType::Ratio).unwrap().is_nan());
        assert!(e.get(EffectType::Or).unwrap().is_nan());
        assert_eq!(e.get(EffectType::Diff), None);

        let e = estimate_effect(2.0, 1.0, &[]);
        assert_eq!(e.get(EffectType::Diff), Some(1.0));
    }

    #[test]
    fn logistic_learner_removes_confounding() {
        use crate::data::{NhefsOptions, SimulationConfig, simulate_nhefs, write_raw_csv, load_nhefs};

        let sim = simulate_nhefs(&SimulationConfig {
            n: 6000,
            seed: 17,
            true_effect: 3.5,
            ..SimulationConfig::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.csv");
        write_raw_csv(&path, &sim).unwrap();
        let data = load_nhefs(&path, &NhefsOptions::default()).unwrap().dataset;

        let mut ipw = Ipw::new(LogisticRegression::new(1000), IpwConfig::default()).unwrap();
        ipw.fit(&data.x, &data.a).unwrap();
        let outcomes = ipw.estimate_population_outcome(&data.x, &data.a, &data.y, None).unwrap();
        let effect = ipw.estimate_effect(outcomes.get(1).unwrap(), outcomes.get(0).unwrap(), &[EffectType::Diff]);
        let diff = effect.get(EffectType::Diff).unwrap();
        assert!((diff - 3.5).abs() < 1.2, "IPW diff = {diff}");
    }
}
