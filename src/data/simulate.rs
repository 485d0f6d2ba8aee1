//! Synthetic NHEFS-shaped data with a known treatment effect.
//!
//! Units are drawn with the same raw columns as the public extract, so the
//! simulated file goes through exactly the same loader as the real one.
//! Quitting depends on age, sex, race, smoking intensity, education and
//! exercise (confounding); weight change depends on the same covariates plus
//! `true_effect · qsmk`. IPW with a correctly specified logistic propensity
//! model is consistent for `true_effect`; the naive difference in means is not.

use std::fs::File;
use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::Serialize;

use crate::error::AppError;
use crate::math::sigmoid;

/// Parameters for synthetic data generation.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub n: usize,
    pub seed: u64,
    /// Additive effect of quitting on weight change (kg).
    pub true_effect: f64,
    /// Probability that a unit has no 1982 follow-up weight.
    pub censor_prob: f64,
    /// Residual standard deviation of the outcome.
    pub noise_sd: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n: 1629,
            seed: 42,
            true_effect: 3.5,
            censor_prob: 0.04,
            noise_sd: 5.0,
        }
    }
}

/// One simulated participant, in raw NHEFS column layout.
#[derive(Debug, Clone, Serialize)]
pub struct SimulatedRow {
    pub seqn: u64,
    pub qsmk: u8,
    pub sex: u8,
    pub race: u8,
    pub age: u32,
    pub education: u8,
    pub smokeintensity: u32,
    pub smokeyrs: u32,
    pub exercise: u8,
    pub active: u8,
    pub wt71: f64,
    pub wt82: Option<f64>,
    pub wt82_71: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub rows: Vec<SimulatedRow>,
    pub true_effect: f64,
}

impl SimulatedData {
    pub fn n_censored(&self) -> usize {
        self.rows.iter().filter(|r| r.wt82.is_none()).count()
    }
}

pub fn simulate_nhefs(config: &SimulationConfig) -> Result<SimulatedData, AppError> {
    if config.n == 0 {
        return Err(AppError::input("Simulation size must be > 0."));
    }
    if !(0.0..1.0).contains(&config.censor_prob) {
        return Err(AppError::input("censor_prob must be in [0, 1)."));
    }
    if !(config.true_effect.is_finite() && config.noise_sd.is_finite() && config.noise_sd >= 0.0) {
        return Err(AppError::input("Invalid effect / noise settings."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::<f64>::new(0.0, config.noise_sd)
        .map_err(|e| AppError::estimation(format!("Noise distribution error: {e}")))?;
    let weight = Normal::<f64>::new(71.0, 15.0)
        .map_err(|e| AppError::estimation(format!("Weight distribution error: {e}")))?;
    let intensity = Normal::<f64>::new(20.0, 11.0)
        .map_err(|e| AppError::estimation(format!("Intensity distribution error: {e}")))?;

    let mut rows = Vec::with_capacity(config.n);
    for i in 0..config.n {
        let sex = u8::from(rng.gen_bool(0.5));
        let race = u8::from(rng.gen_bool(0.13));
        let age: u32 = rng.gen_range(25..=74);
        let education: u8 = rng.gen_range(1..=5);
        let exercise: u8 = rng.gen_range(0..=2);
        let active: u8 = rng.gen_range(0..=2);
        let smokeintensity = intensity.sample(&mut rng).round().clamp(1.0, 80.0) as u32;
        let start_age: u32 = rng.gen_range(12..=24);
        let smokeyrs = age.saturating_sub(start_age).max(1);
        let wt71 = weight.sample(&mut rng).clamp(40.0, 170.0);
        let wt71 = (wt71 * 100.0).round() / 100.0;

        let logit = -1.3 + 0.04 * (f64::from(age) - 45.0) - 0.3 * f64::from(sex) - 0.5 * f64::from(race)
            - 0.02 * (f64::from(smokeintensity) - 20.0)
            + 0.1 * (f64::from(education) - 3.0)
            + 0.25 * f64::from(u8::from(exercise == 2));
        let qsmk = u8::from(rng.r#gen::<f64>() < sigmoid(logit));

        let expected = 2.5 + config.true_effect * f64::from(qsmk) - 0.15 * (f64::from(age) - 45.0)
            - 0.05 * (wt71 - 70.0)
            + 0.8 * f64::from(u8::from(active == 2))
            + 0.02 * (f64::from(smokeintensity) - 20.0);
        let change = expected + noise.sample(&mut rng);

        let censored = rng.gen_bool(config.censor_prob);
        let (wt82, wt82_71) = if censored {
            (None, None)
        } else {
            let change = (change * 100.0).round() / 100.0;
            (Some(wt71 + change), Some(change))
        };

        rows.push(SimulatedRow {
            seqn: 1000 + i as u64,
            qsmk,
            sex,
            race,
            age,
            education,
            smokeintensity,
            smokeyrs,
            exercise,
            active,
            wt71,
            wt82,
            wt82_71,
        });
    }

    Ok(SimulatedData {
        rows,
        true_effect: config.true_effect,
    })
}

/// Write simulated rows as a raw NHEFS CSV (missing values as empty cells).
pub fn write_raw_csv(path: &Path, data: &SimulatedData) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in &data.rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::input(format!("Failed to write simulated row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to flush '{}': {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_is_deterministic_per_seed() {
        let cfg = SimulationConfig {
            n: 50,
            ..SimulationConfig::default()
        };
        let a = simulate_nhefs(&cfg).unwrap();
        let b = simulate_nhefs(&cfg).unwrap();
        assert_eq!(a.rows.len(), 50);
        for (ra, rb) in a.rows.iter().zip(&b.rows) {
            assert_eq!(ra.qsmk, rb.qsmk);
            assert_eq!(ra.wt82_71, rb.wt82_71);
        }
    }

    #[test]
    fn simulated_rows_respect_domains() {
        let data = simulate_nhefs(&SimulationConfig {
            n: 500,
            censor_prob: 0.2,
            ..SimulationConfig::default()
        })
        .unwrap();
        for r in &data.rows {
            assert!((25..=74).contains(&r.age));
            assert!((1..=5).contains(&r.education));
            assert!(r.exercise <= 2 && r.active <= 2);
            assert!(r.smokeyrs >= 1 && r.smokeyrs < r.age);
            assert_eq!(r.wt82.is_none(), r.wt82_71.is_none());
        }
        let censored = data.n_censored();
        assert!(censored > 50 && censored < 150, "censored = {censored}");
        let treated = data.rows.iter().filter(|r| r.qsmk == 1).count();
        assert!(treated > 50 && treated < 350, "treated = {treated}");
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(simulate_nhefs(&SimulationConfig { n: 0, ..SimulationConfig::default() }).is_err());
        assert!(
            simulate_nhefs(&SimulationConfig {
                censor_prob: 1.0,
                ..SimulationConfig::default()
            })
            .is_err()
        );
    }

    #[test]
    fn raw_csv_round_trips_through_loader() {
        use crate::data::nhefs::{NhefsOptions, load_nhefs};

        let data = simulate_nhefs(&SimulationConfig {
            n: 200,
            ..SimulationConfig::default()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.csv");
        write_raw_csv(&path, &data).unwrap();

        let loaded = load_nhefs(&path, &NhefsOptions::default()).unwrap();
        assert_eq!(loaded.rows_censored, data.n_censored());
        assert_eq!(loaded.dataset.n_units(), 200 - data.n_censored());
        assert!(loaded.row_errors.is_empty());
    }
}
