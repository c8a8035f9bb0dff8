use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::analysis::run_scenario;
use super::decline::DeclinePlan;
use super::error::ModelError;
use super::mortality::stage_mortality;
use super::params::{ParameterSet, Scenario};
use super::types::{MonteCarloSummary, PerStage, Percentiles, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub patients: u32,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            patients: 1_000,
            seed: 42,
        }
    }
}

impl MonteCarloConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.patients == 0 {
            return Err(ModelError::config("monte carlo patients must be > 0"));
        }
        Ok(())
    }
}

/// Life history of one simulated patient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatientRecord {
    pub end_stage_age: Option<u32>,
    /// Age at death, or the final age of the horizon for survivors.
    pub exit_age: u32,
    pub died: bool,
    pub years_in_stage: PerStage<u32>,
}

/// Walks one patient through the horizon. The latent value follows the same
/// path as the cohort; survival is drawn each year against the stage
/// mortality.
pub fn simulate_patient<R: Rng>(
    params: &ParameterSet,
    plan: &DeclinePlan,
    rng: &mut R,
) -> PatientRecord {
    let config = params.config();
    let mut latent = config.starting_latent;
    let mut age = config.starting_age;
    let mut end_stage_age = None;
    let mut years_in_stage = PerStage::splat(0u32);

    for cycle in 1..=config.horizon {
        age = config.starting_age + cycle;
        latent = (latent - plan.rate(&config.decline, cycle, age)).max(0.0);
        let stage = config.thresholds.classify(latent);

        if stage == Stage::EndStage && end_stage_age.is_none() {
            end_stage_age = Some(age);
        }

        let mortality = stage_mortality(
            &config.background_mortality,
            &config.relative_risks,
            stage,
            age,
        );
        if rng.random::<f64>() < mortality {
            return PatientRecord {
                end_stage_age,
                exit_age: age,
                died: true,
                years_in_stage,
            };
        }
        years_in_stage[stage] += 1;
    }

    PatientRecord {
        end_stage_age,
        exit_age: age,
        died: false,
        years_in_stage,
    }
}

/// Simulates `config.patients` independent patients, each on its own seeded
/// stream, and summarises them.
pub fn run_monte_carlo(
    params: &ParameterSet,
    scenario: &Scenario,
    config: MonteCarloConfig,
) -> Result<MonteCarloSummary, ModelError> {
    config.validate()?;
    let model = params.config();
    let plan = DeclinePlan::new(&model.decline, scenario.target, scenario.waning)?;

    info!(
        "simulating {} patients for '{}' (seed {})",
        config.patients, scenario.name, config.seed
    );
    let records: Vec<PatientRecord> = (0..config.patients)
        .into_par_iter()
        .map(|patient| {
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(config.seed, 0, patient));
            simulate_patient(params, &plan, &mut rng)
        })
        .collect();

    let summary = summarise(&records, model.horizon, config);
    info!(
        "monte carlo complete: {:.1}% reached EndStage, median exit age {:.1}",
        summary.end_stage_fraction * 100.0,
        summary.exit_age.p50
    );
    Ok(summary)
}

fn summarise(
    records: &[PatientRecord],
    horizon: u32,
    config: MonteCarloConfig,
) -> MonteCarloSummary {
    let n = records.len() as f64;
    let mut end_stage_ages: Vec<f64> = records
        .iter()
        .filter_map(|r| r.end_stage_age.map(f64::from))
        .collect();
    let mut exit_ages: Vec<f64> = records.iter().map(|r| f64::from(r.exit_age)).collect();
    let mean_exit_age = exit_ages.iter().sum::<f64>() / n;

    let mut stage_occupancy = PerStage::zeros();
    for stage in Stage::LIVING {
        let total: u64 = records
            .iter()
            .map(|r| u64::from(r.years_in_stage[stage]))
            .sum();
        stage_occupancy[stage] = total as f64 / n / f64::from(horizon);
    }
    stage_occupancy[Stage::Death] = (1.0 - stage_occupancy.sum()).max(0.0);

    let end_stage_fraction = end_stage_ages.len() as f64 / n;
    let end_stage_age = if end_stage_ages.is_empty() {
        None
    } else {
        Some(percentiles(&mut end_stage_ages))
    };

    MonteCarloSummary {
        patients: config.patients,
        seed: config.seed,
        end_stage_fraction,
        end_stage_age,
        exit_age: percentiles(&mut exit_ages),
        mean_exit_age,
        stage_occupancy,
    }
}

/// Monte Carlo summary next to the deterministic cohort run it checks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub scenario: String,
    pub monte_carlo: MonteCarloSummary,
    pub cohort_time_to_end_stage: u32,
    pub cohort_end_stage_reached: bool,
    /// Patient age at which the cohort majority first sits in EndStage.
    pub cohort_end_stage_age: Option<u32>,
    /// Monte Carlo median EndStage age minus the cohort EndStage age.
    pub median_age_difference: Option<f64>,
}

pub fn validate_against_cohort(
    params: &ParameterSet,
    scenario: &Scenario,
    config: MonteCarloConfig,
) -> Result<ValidationReport, ModelError> {
    let cohort = run_scenario(params, scenario)?;
    let summary = run_monte_carlo(params, scenario, config)?;

    let cohort_end_stage_age = cohort
        .end_stage_reached
        .then(|| params.config().starting_age + cohort.time_to_end_stage);
    let median_age_difference = match (summary.end_stage_age, cohort_end_stage_age) {
        (Some(mc), Some(age)) => Some(mc.p50 - f64::from(age)),
        _ => None,
    };

    Ok(ValidationReport {
        scenario: scenario.name.clone(),
        monte_carlo: summary,
        cohort_time_to_end_stage: cohort.time_to_end_stage,
        cohort_end_stage_reached: cohort.end_stage_reached,
        cohort_end_stage_age,
        median_age_difference,
    })
}

fn percentiles(values: &mut [f64]) -> Percentiles {
    Percentiles {
        p25: percentile(values, 25.0),
        p50: percentile(values, 50.0),
        p75: percentile(values, 75.0),
    }
}

/// Seed for one worker stream. The base seed is mixed before the stream and
/// index are folded in, so nearby base seeds give unrelated stream sets.
pub(crate) fn derive_seed(base_seed: u64, stream: u32, index: u32) -> u64 {
    let lane = ((stream as u64) << 32) | index as u64;
    splitmix64(splitmix64(base_seed) ^ lane)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

pub(crate) fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
