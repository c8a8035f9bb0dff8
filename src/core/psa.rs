use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution, Gamma, LogNormal, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::analysis::{icer, run_scenario};
use super::error::ModelError;
use super::monte_carlo::{derive_seed, percentile};
use super::params::{ModelConfig, ParameterSet, Scenario};
use super::types::{Icer, LIVING_STAGE_COUNT, OutcomeSummary, Percentiles, Stage};

/// Seed stream reserved for PSA draws, distinct from patient simulation.
const PSA_STREAM: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub alpha: f64,
    pub beta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaParams {
    pub shape: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormalParams {
    pub mu: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalParams {
    pub mean: f64,
    pub sd: f64,
}

/// Parameter uncertainty. Per-stage arrays follow the living stages from
/// Normal to EndStage; decline entries are early, middle and late.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PsaDistributions {
    pub utilities: [BetaParams; LIVING_STAGE_COUNT],
    pub stage_costs: [GammaParams; LIVING_STAGE_COUNT],
    pub relative_risks: [LogNormalParams; LIVING_STAGE_COUNT],
    pub natural_decline: [NormalParams; 3],
    pub decline_floor: f64,
    pub discount_rate: BetaParams,
    pub discount_scale: f64,
    /// Early childhood, school age, adolescent, adult. Only sampled when the
    /// model has caregiver parameters.
    pub caregiver: [BetaParams; 4],
}

impl Default for PsaDistributions {
    fn default() -> Self {
        let beta = |alpha, beta| BetaParams { alpha, beta };
        let gamma = |scale| GammaParams { shape: 25.0, scale };
        let lognormal = |median: f64, sigma| LogNormalParams {
            mu: median.ln(),
            sigma,
        };
        let normal = |mean, sd| NormalParams { mean, sd };
        Self {
            utilities: [
                beta(40.8, 10.2),
                beta(46.08, 18.12),
                beta(46.24, 21.76),
                beta(36.6, 23.4),
                beta(29.16, 24.84),
                beta(16.0, 24.0),
            ],
            stage_costs: [
                gamma(1_120.0),
                gamma(1_320.0),
                gamma(1_520.0),
                gamma(2_120.0),
                gamma(2_520.0),
                gamma(6_520.0),
            ],
            relative_risks: [
                lognormal(10.0, 0.15),
                lognormal(15.0, 0.15),
                lognormal(30.0, 0.20),
                lognormal(50.0, 0.20),
                lognormal(80.0, 0.25),
                lognormal(120.0, 0.25),
            ],
            natural_decline: [normal(1.0, 0.2), normal(3.0, 0.45), normal(1.5, 0.3)],
            decline_floor: 0.1,
            discount_rate: beta(3.0, 47.0),
            discount_scale: 0.06,
            caregiver: [
                beta(14.4, 105.6),
                beta(10.0, 90.0),
                beta(8.0, 92.0),
                beta(5.0, 95.0),
            ],
        }
    }
}

impl PsaDistributions {
    pub fn sampler(&self) -> Result<PsaSampler, ModelError> {
        if !self.decline_floor.is_finite() || self.decline_floor < 0.0 {
            return Err(ModelError::distribution("decline floor must be >= 0"));
        }
        if !self.discount_scale.is_finite() || !(0.0..1.0).contains(&self.discount_scale) {
            return Err(ModelError::distribution(
                "discount scale must keep sampled rates within [0, 1)",
            ));
        }

        let utilities = Stage::LIVING
            .iter()
            .zip(&self.utilities)
            .map(|(stage, p)| beta(p, &format!("utility for {}", stage.label())))
            .collect::<Result<Vec<_>, _>>()?;
        let stage_costs = Stage::LIVING
            .iter()
            .zip(&self.stage_costs)
            .map(|(stage, p)| {
                Gamma::new(p.shape, p.scale).map_err(|e| {
                    ModelError::distribution(format!("annual cost for {}: {e}", stage.label()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let relative_risks = Stage::LIVING
            .iter()
            .zip(&self.relative_risks)
            .map(|(stage, p)| {
                LogNormal::new(p.mu, p.sigma).map_err(|e| {
                    ModelError::distribution(format!("relative risk for {}: {e}", stage.label()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let natural_decline = self
            .natural_decline
            .iter()
            .map(|p| {
                Normal::new(p.mean, p.sd)
                    .map_err(|e| ModelError::distribution(format!("natural decline: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let caregiver = self
            .caregiver
            .iter()
            .map(|p| beta(p, "caregiver disutility"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PsaSampler {
            utilities,
            stage_costs,
            relative_risks,
            natural_decline,
            decline_floor: self.decline_floor,
            discount_rate: beta(&self.discount_rate, "discount rate")?,
            discount_scale: self.discount_scale,
            caregiver,
        })
    }
}

fn beta(params: &BetaParams, what: &str) -> Result<Beta<f64>, ModelError> {
    Beta::new(params.alpha, params.beta)
        .map_err(|e| ModelError::distribution(format!("{what}: {e}")))
}

/// Validated distributions ready to draw parameter sets from.
#[derive(Debug, Clone)]
pub struct PsaSampler {
    utilities: Vec<Beta<f64>>,
    stage_costs: Vec<Gamma<f64>>,
    relative_risks: Vec<LogNormal<f64>>,
    natural_decline: Vec<Normal<f64>>,
    decline_floor: f64,
    discount_rate: Beta<f64>,
    discount_scale: f64,
    caregiver: Vec<Beta<f64>>,
}

impl PsaSampler {
    /// Draws one parameter set around `base`. Quantities without a
    /// distribution keep their base values.
    pub fn sample<R: Rng>(
        &self,
        base: &ModelConfig,
        rng: &mut R,
    ) -> Result<ParameterSet, ModelError> {
        let mut config = base.clone();
        for (i, stage) in Stage::LIVING.into_iter().enumerate() {
            config.base_utilities[stage] = self.utilities[i].sample(rng);
            config.stage_costs[stage] = self.stage_costs[i].sample(rng);
            config.relative_risks[stage] = self.relative_risks[i].sample(rng);
        }

        let floor = self.decline_floor;
        config.decline.early_rate = self.natural_decline[0].sample(rng).max(floor);
        config.decline.middle_rate = self.natural_decline[1].sample(rng).max(floor);
        config.decline.late_rate = self.natural_decline[2].sample(rng).max(floor);
        config.discount_rate = self.discount_rate.sample(rng) * self.discount_scale;

        if let Some(caregiver) = config.caregiver.as_mut() {
            caregiver.early_childhood = -self.caregiver[0].sample(rng);
            caregiver.school_age = -self.caregiver[1].sample(rng);
            caregiver.adolescent = -self.caregiver[2].sample(rng);
            caregiver.adult = -self.caregiver[3].sample(rng);
        }

        ParameterSet::new(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PsaSettings {
    pub iterations: u32,
    pub seed: u64,
    pub distributions: PsaDistributions,
    pub wtp_thresholds: Vec<f64>,
}

impl Default for PsaSettings {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            seed: 42,
            distributions: PsaDistributions::default(),
            wtp_thresholds: (0..=20).map(|i| f64::from(i) * 25_000.0).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaDraw {
    pub scenario: String,
    pub outcome: OutcomeSummary,
    pub incremental_cost: f64,
    pub incremental_qalys: f64,
    pub icer: Icer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaIteration {
    pub iteration: u32,
    pub baseline: OutcomeSummary,
    pub interventions: Vec<PsaDraw>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CeacPoint {
    pub threshold: f64,
    pub probability_cost_effective: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaScenarioSummary {
    pub scenario: String,
    pub mean_incremental_cost: f64,
    pub mean_incremental_qalys: f64,
    pub icer_of_means: Icer,
    pub incremental_qalys_range: Percentiles,
    pub ceac: Vec<CeacPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsaReport {
    pub iterations: u32,
    pub seed: u64,
    pub scenarios: Vec<PsaScenarioSummary>,
    pub draws: Vec<PsaIteration>,
}

/// Share of ICERs at or below each threshold. Infinite and dominated ratios
/// never count as cost-effective.
pub fn ceac(icers: &[Icer], thresholds: &[f64]) -> Vec<CeacPoint> {
    let n = icers.len().max(1) as f64;
    thresholds
        .iter()
        .map(|&threshold| {
            let accepted = icers.iter().filter(|i| i.is_within(threshold)).count();
            CeacPoint {
                threshold,
                probability_cost_effective: accepted as f64 / n,
            }
        })
        .collect()
}

fn run_iteration(
    sampler: &PsaSampler,
    base: &ModelConfig,
    baseline: &Scenario,
    interventions: &[Scenario],
    seed: u64,
    iteration: u32,
) -> Result<PsaIteration, ModelError> {
    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, PSA_STREAM, iteration));
    let params = sampler.sample(base, &mut rng)?;
    let base_result = run_scenario(&params, baseline)?;

    let draws = interventions
        .iter()
        .map(|scenario| {
            let result = run_scenario(&params, scenario)?;
            let incremental_cost = result.total_cost - base_result.total_cost;
            let incremental_qalys = result.total_qalys - base_result.total_qalys;
            Ok(PsaDraw {
                scenario: scenario.name.clone(),
                outcome: OutcomeSummary::from(&result),
                incremental_cost,
                incremental_qalys,
                icer: icer(incremental_cost, incremental_qalys),
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    Ok(PsaIteration {
        iteration,
        baseline: OutcomeSummary::from(&base_result),
        interventions: draws,
    })
}

pub fn run_psa(
    params: &ParameterSet,
    baseline: &Scenario,
    interventions: &[Scenario],
    settings: &PsaSettings,
) -> Result<PsaReport, ModelError> {
    if settings.iterations == 0 {
        return Err(ModelError::config("PSA iterations must be > 0"));
    }
    if settings.wtp_thresholds.iter().any(|t| !t.is_finite()) {
        return Err(ModelError::config("willingness-to-pay thresholds must be finite"));
    }
    let sampler = settings.distributions.sampler()?;
    let base = params.config();

    info!(
        "PSA: {} iterations x {} intervention(s), seed {}",
        settings.iterations,
        interventions.len(),
        settings.seed
    );
    let draws = (0..settings.iterations)
        .into_par_iter()
        .map(|i| run_iteration(&sampler, base, baseline, interventions, settings.seed, i))
        .collect::<Result<Vec<_>, ModelError>>()?;

    let scenarios = interventions
        .iter()
        .enumerate()
        .map(|(k, scenario)| {
            summarise_scenario(&scenario.name, &draws, k, &settings.wtp_thresholds)
        })
        .collect();
    info!("PSA complete");

    Ok(PsaReport {
        iterations: settings.iterations,
        seed: settings.seed,
        scenarios,
        draws,
    })
}

fn summarise_scenario(
    name: &str,
    draws: &[PsaIteration],
    index: usize,
    thresholds: &[f64],
) -> PsaScenarioSummary {
    let n = draws.len() as f64;
    let scenario_draws: Vec<&PsaDraw> = draws.iter().map(|d| &d.interventions[index]).collect();
    let mean_cost = scenario_draws.iter().map(|d| d.incremental_cost).sum::<f64>() / n;
    let mean_qalys = scenario_draws.iter().map(|d| d.incremental_qalys).sum::<f64>() / n;
    let mut qalys: Vec<f64> = scenario_draws.iter().map(|d| d.incremental_qalys).collect();
    let icers: Vec<Icer> = scenario_draws.iter().map(|d| d.icer).collect();

    PsaScenarioSummary {
        scenario: name.to_string(),
        mean_incremental_cost: mean_cost,
        mean_incremental_qalys: mean_qalys,
        icer_of_means: icer(mean_cost, mean_qalys),
        incremental_qalys_range: Percentiles {
            p25: percentile(&mut qalys, 25.0),
            p50: percentile(&mut qalys, 50.0),
            p75: percentile(&mut qalys, 75.0),
        },
        ceac: ceac(&icers, thresholds),
    }
}
