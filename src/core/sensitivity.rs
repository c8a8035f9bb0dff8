use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::analysis::{PricePoint, icer, incremental, price_points, run_scenario, run_scenarios};
use super::decline::DeclineTarget;
use super::error::ModelError;
use super::params::{ModelConfig, ParameterSet, Scenario};
use super::types::{Icer, IncrementalResult, OutcomeSummary, Stage};

/// A single input varied by the one-way analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SensitivityParameter {
    DiscountRate,
    AcquisitionCost,
    Utility { stage: Stage },
    StageCost { stage: Stage },
    RelativeRisk { stage: Stage },
    /// Multiplier on all three natural decline brackets.
    DeclineScale,
}

impl SensitivityParameter {
    pub fn label(&self) -> String {
        match self {
            SensitivityParameter::DiscountRate => "Discount rate".to_string(),
            SensitivityParameter::AcquisitionCost => "Acquisition cost".to_string(),
            SensitivityParameter::Utility { stage } => format!("Utility ({})", stage.label()),
            SensitivityParameter::StageCost { stage } => format!("Annual cost ({})", stage.label()),
            SensitivityParameter::RelativeRisk { stage } => {
                format!("Relative risk ({})", stage.label())
            }
            SensitivityParameter::DeclineScale => "Natural decline scale".to_string(),
        }
    }

    pub fn base_value(&self, config: &ModelConfig) -> f64 {
        match *self {
            SensitivityParameter::DiscountRate => config.discount_rate,
            SensitivityParameter::AcquisitionCost => config.intervention_costs.acquisition,
            SensitivityParameter::Utility { stage } => config.base_utilities[stage],
            SensitivityParameter::StageCost { stage } => config.stage_costs[stage],
            SensitivityParameter::RelativeRisk { stage } => config.relative_risks[stage],
            SensitivityParameter::DeclineScale => 1.0,
        }
    }

    fn apply(&self, config: &mut ModelConfig, value: f64) -> Result<(), ModelError> {
        match *self {
            SensitivityParameter::DiscountRate => config.discount_rate = value,
            SensitivityParameter::AcquisitionCost => config.intervention_costs.acquisition = value,
            SensitivityParameter::Utility { stage } => {
                living(stage)?;
                config.base_utilities[stage] = value;
            }
            SensitivityParameter::StageCost { stage } => {
                living(stage)?;
                config.stage_costs[stage] = value;
            }
            SensitivityParameter::RelativeRisk { stage } => {
                living(stage)?;
                config.relative_risks[stage] = value;
            }
            SensitivityParameter::DeclineScale => {
                if !value.is_finite() || value < 0.0 {
                    return Err(ModelError::config("decline scale must be >= 0"));
                }
                config.decline.early_rate *= value;
                config.decline.middle_rate *= value;
                config.decline.late_rate *= value;
            }
        }
        Ok(())
    }

    /// Copy of `config` with this parameter set to `value`, validated.
    pub fn varied(&self, config: &ModelConfig, value: f64) -> Result<ParameterSet, ModelError> {
        let mut config = config.clone();
        self.apply(&mut config, value)?;
        ParameterSet::new(config)
    }
}

fn living(stage: Stage) -> Result<(), ModelError> {
    if stage.is_alive() {
        Ok(())
    } else {
        Err(ModelError::config("sensitivity parameters must target a living stage"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRange {
    pub parameter: SensitivityParameter,
    pub low: f64,
    pub high: f64,
}

pub fn default_ranges() -> Vec<ParameterRange> {
    let range = |parameter, low, high| ParameterRange {
        parameter,
        low,
        high,
    };
    vec![
        range(SensitivityParameter::DiscountRate, 0.0, 0.07),
        range(SensitivityParameter::AcquisitionCost, 2_000_000.0, 4_000_000.0),
        range(
            SensitivityParameter::Utility {
                stage: Stage::EndStage,
            },
            0.30,
            0.50,
        ),
        range(
            SensitivityParameter::Utility {
                stage: Stage::Stage2,
            },
            0.65,
            0.80,
        ),
        range(
            SensitivityParameter::StageCost {
                stage: Stage::EndStage,
            },
            100_000.0,
            200_000.0,
        ),
        range(
            SensitivityParameter::RelativeRisk {
                stage: Stage::EndStage,
            },
            60.0,
            180.0,
        ),
        range(SensitivityParameter::DeclineScale, 0.75, 1.25),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TornadoRow {
    pub parameter: String,
    pub low_value: f64,
    pub base_value: f64,
    pub high_value: f64,
    pub icer_low: Icer,
    pub icer_base: Icer,
    pub icer_high: Icer,
    /// Spread between the low and high ICERs; infinite when either end has no
    /// finite ICER.
    pub range: f64,
}

fn icer_between(
    params: &ParameterSet,
    baseline: &Scenario,
    intervention: &Scenario,
) -> Result<Icer, ModelError> {
    let base = run_scenario(params, baseline)?;
    let treated = run_scenario(params, intervention)?;
    Ok(icer(
        treated.total_cost - base.total_cost,
        treated.total_qalys - base.total_qalys,
    ))
}

/// Varies one parameter at a time, rerunning both arms, and returns rows
/// ordered by the ICER range they span, widest first.
pub fn one_way_sensitivity(
    params: &ParameterSet,
    baseline: &Scenario,
    intervention: &Scenario,
    ranges: &[ParameterRange],
) -> Result<Vec<TornadoRow>, ModelError> {
    info!("one-way sensitivity over {} parameter(s)", ranges.len());
    let icer_base = icer_between(params, baseline, intervention)?;
    let config = params.config();

    let mut rows = ranges
        .par_iter()
        .map(|range| {
            let low = range.parameter.varied(config, range.low)?;
            let high = range.parameter.varied(config, range.high)?;
            let icer_low = icer_between(&low, baseline, intervention)?;
            let icer_high = icer_between(&high, baseline, intervention)?;
            let spread = match (icer_low.value(), icer_high.value()) {
                (Some(lo), Some(hi)) => (hi - lo).abs(),
                _ => f64::INFINITY,
            };
            Ok(TornadoRow {
                parameter: range.parameter.label(),
                low_value: range.low,
                base_value: range.parameter.base_value(config),
                high_value: range.high,
                icer_low,
                icer_base,
                icer_high,
                range: spread,
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    rows.sort_by(|a, b| b.range.total_cmp(&a.range));
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub target_icer: f64,
    pub theta_min: f64,
    pub theta_max: f64,
    pub points: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            target_icer: 100_000.0,
            theta_min: 0.0,
            theta_max: 1.0,
            points: 21,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.target_icer.is_finite() {
            return Err(ModelError::config("target ICER must be finite"));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&self.theta_min) || !unit.contains(&self.theta_max) {
            return Err(ModelError::config("theta sweep bounds must be within [0, 1]"));
        }
        if self.theta_min > self.theta_max {
            return Err(ModelError::config("theta sweep minimum must not exceed maximum"));
        }
        if self.points == 0 {
            return Err(ModelError::config("theta sweep needs at least one point"));
        }
        Ok(())
    }

    pub fn thetas(&self) -> Vec<f64> {
        if self.points == 1 {
            return vec![self.theta_min];
        }
        let step = (self.theta_max - self.theta_min) / f64::from(self.points - 1);
        (0..self.points)
            .map(|i| self.theta_min + step * f64::from(i))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdPoint {
    pub theta: f64,
    pub incremental_cost: f64,
    pub incremental_qalys: f64,
    pub icer: Icer,
    pub meets_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdAnalysis {
    pub target_icer: f64,
    pub points: Vec<ThresholdPoint>,
    /// Smallest swept theta whose ICER meets the target.
    pub minimum_theta: Option<f64>,
}

/// Sweeps the treatment effect to find how much of the pathological decline
/// must be removed for the intervention to meet `target_icer`.
pub fn threshold_analysis(
    params: &ParameterSet,
    baseline: &Scenario,
    config: ThresholdConfig,
) -> Result<ThresholdAnalysis, ModelError> {
    config.validate()?;
    let base = run_scenario(params, baseline)?;

    let points = config
        .thetas()
        .into_par_iter()
        .map(|theta| {
            let scenario = Scenario::treated(format!("theta {theta:.3}"), theta);
            let result = run_scenario(params, &scenario)?;
            let incremental_cost = result.total_cost - base.total_cost;
            let incremental_qalys = result.total_qalys - base.total_qalys;
            let icer = icer(incremental_cost, incremental_qalys);
            Ok(ThresholdPoint {
                theta,
                incremental_cost,
                incremental_qalys,
                icer,
                meets_threshold: icer.is_within(config.target_icer),
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    let minimum_theta = points
        .iter()
        .filter(|p| p.meets_threshold)
        .map(|p| p.theta)
        .min_by(f64::total_cmp);

    Ok(ThresholdAnalysis {
        target_icer: config.target_icer,
        points,
        minimum_theta,
    })
}

/// A share of the treated population with its own response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgroup {
    pub name: String,
    pub proportion: f64,
    pub target: DeclineTarget,
}

pub fn default_subgroups() -> Vec<Subgroup> {
    let subgroup = |name: &str, proportion, target| Subgroup {
        name: name.to_string(),
        proportion,
        target,
    };
    vec![
        subgroup("Super-responders", 0.20, DeclineTarget::Theta { theta: 1.0 }),
        subgroup("Good responders", 0.50, DeclineTarget::Theta { theta: 0.85 }),
        subgroup("Poor responders", 0.25, DeclineTarget::Theta { theta: 0.50 }),
        subgroup("Non-responders", 0.05, DeclineTarget::Natural),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgroupResult {
    pub name: String,
    pub proportion: f64,
    pub outcome: OutcomeSummary,
    pub incremental: IncrementalResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationAverage {
    pub total_cost: f64,
    pub total_qalys: f64,
    pub life_years: f64,
    pub incremental_cost: f64,
    pub incremental_qalys: f64,
    pub icer: Icer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeterogeneityAnalysis {
    pub baseline: OutcomeSummary,
    pub subgroups: Vec<SubgroupResult>,
    pub population: PopulationAverage,
}

pub fn heterogeneity_analysis(
    params: &ParameterSet,
    baseline: &Scenario,
    subgroups: &[Subgroup],
) -> Result<HeterogeneityAnalysis, ModelError> {
    if subgroups.is_empty() {
        return Err(ModelError::config("at least one subgroup is required"));
    }
    if subgroups
        .iter()
        .any(|s| !s.proportion.is_finite() || s.proportion < 0.0)
    {
        return Err(ModelError::config("subgroup proportions must be >= 0"));
    }
    let total: f64 = subgroups.iter().map(|s| s.proportion).sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(ModelError::config(format!(
            "subgroup proportions must sum to 1, got {total}"
        )));
    }

    let scenarios: Vec<Scenario> = subgroups
        .iter()
        .map(|s| Scenario {
            name: s.name.clone(),
            target: s.target,
            include_intervention_costs: true,
            waning: None,
        })
        .collect();
    let report = run_scenarios(params, baseline, &scenarios)?;
    let base = OutcomeSummary::from(&report.baseline);

    let mut results = Vec::with_capacity(subgroups.len());
    let mut population = PopulationAverage {
        total_cost: 0.0,
        total_qalys: 0.0,
        life_years: 0.0,
        incremental_cost: 0.0,
        incremental_qalys: 0.0,
        icer: Icer::Value(0.0),
    };
    for (subgroup, result) in subgroups.iter().zip(&report.interventions) {
        let w = subgroup.proportion;
        population.total_cost += w * result.total_cost;
        population.total_qalys += w * result.total_qalys;
        population.life_years += w * result.life_years;
        results.push(SubgroupResult {
            name: subgroup.name.clone(),
            proportion: w,
            outcome: OutcomeSummary::from(result),
            incremental: incremental(&report.baseline, result),
        });
    }
    population.incremental_cost = population.total_cost - base.total_cost;
    population.incremental_qalys = population.total_qalys - base.total_qalys;
    population.icer = icer(population.incremental_cost, population.incremental_qalys);

    Ok(HeterogeneityAnalysis {
        baseline: base,
        subgroups: results,
        population,
    })
}

/// How the starting latent value is backed out for later starting ages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartingAgeConfig {
    pub ages: Vec<u32>,
    pub reference_age: u32,
    pub average_decline: f64,
    pub latent_floor: f64,
}

impl Default for StartingAgeConfig {
    fn default() -> Self {
        Self {
            ages: vec![1, 3, 5, 7, 10, 15],
            reference_age: 1,
            average_decline: 2.0,
            latent_floor: 30.0,
        }
    }
}

impl StartingAgeConfig {
    /// `max(floor, latent_at_reference - (age - reference_age) * average_decline)`.
    pub fn starting_latent(&self, latent_at_reference: f64, age: u32) -> f64 {
        let years = f64::from(age) - f64::from(self.reference_age);
        (latent_at_reference - years * self.average_decline).max(self.latent_floor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartingAgeRow {
    pub starting_age: u32,
    pub scenario: String,
    pub starting_latent: f64,
    pub outcome: OutcomeSummary,
    pub incremental: IncrementalResult,
    pub prices: Vec<PricePoint>,
}

/// Reruns baseline and interventions at each starting age with the latent
/// value a patient of that age would be expected to have.
pub fn starting_age_analysis(
    params: &ParameterSet,
    baseline: &Scenario,
    interventions: &[Scenario],
    config: &StartingAgeConfig,
    thresholds: &[f64],
) -> Result<Vec<StartingAgeRow>, ModelError> {
    if !config.average_decline.is_finite() || !config.latent_floor.is_finite() {
        return Err(ModelError::config(
            "starting-age decline and floor must be finite",
        ));
    }
    info!(
        "starting-age analysis: {} age(s) x {} scenario(s)",
        config.ages.len(),
        interventions.len()
    );

    let per_age = config
        .ages
        .par_iter()
        .map(|&age| {
            let mut model = params.config().clone();
            model.starting_age = age;
            model.starting_latent = config.starting_latent(params.config().starting_latent, age);
            let aged = ParameterSet::new(model)?;
            let report = run_scenarios(&aged, baseline, interventions)?;

            let rows = report
                .interventions
                .iter()
                .map(|result| {
                    let inc = incremental(&report.baseline, result);
                    StartingAgeRow {
                        starting_age: age,
                        scenario: result.name.clone(),
                        starting_latent: aged.config().starting_latent,
                        outcome: OutcomeSummary::from(result),
                        incremental: inc,
                        prices: price_points(&inc, result.acquisition_cost, thresholds),
                    }
                })
                .collect::<Vec<_>>();
            Ok(rows)
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    Ok(per_age.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    fn priced_params() -> ParameterSet {
        let mut config = ModelConfig::default();
        config.intervention_costs.acquisition = 3_000_000.0;
        ParameterSet::new(config).expect("valid")
    }

    #[test]
    fn tornado_rows_are_sorted_by_range_descending() {
        let params = priced_params();
        let rows = one_way_sensitivity(
            &params,
            &Scenario::natural_history(),
            &Scenario::treated("Realistic", 0.85),
            &default_ranges(),
        )
        .expect("tornado");

        assert_eq!(rows.len(), default_ranges().len());
        for pair in rows.windows(2) {
            assert!(pair[0].range >= pair[1].range);
        }
        for row in &rows {
            assert_eq!(row.icer_base, rows[0].icer_base);
        }
    }

    #[test]
    fn acquisition_cost_moves_icer_linearly() {
        let params = priced_params();
        let ranges = [ParameterRange {
            parameter: SensitivityParameter::AcquisitionCost,
            low: 1_000_000.0,
            high: 2_000_000.0,
        }];
        let rows = one_way_sensitivity(
            &params,
            &Scenario::natural_history(),
            &Scenario::treated("Optimistic", 1.0),
            &ranges,
        )
        .expect("tornado");

        let report = run_scenarios(
            &params,
            &Scenario::natural_history(),
            &[Scenario::treated("Optimistic", 1.0)],
        )
        .expect("report");
        let qalys = report.interventions[0].incremental.expect("inc").qalys;
        assert_approx(rows[0].range, 1_000_000.0 / qalys);
        assert_approx(rows[0].base_value, 3_000_000.0);
    }

    #[test]
    fn varying_the_death_stage_is_rejected() {
        let err = SensitivityParameter::StageCost { stage: Stage::Death }
            .varied(&ModelConfig::default(), 10.0)
            .expect_err("must reject");
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }

    #[test]
    fn invalid_range_value_fails_validation() {
        let err = SensitivityParameter::DiscountRate
            .varied(&ModelConfig::default(), 1.5)
            .expect_err("must reject");
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }

    #[test]
    fn decline_scale_multiplies_all_brackets() {
        let params = SensitivityParameter::DeclineScale
            .varied(&ModelConfig::default(), 2.0)
            .expect("valid");
        let decline = &params.config().decline;
        assert_approx(decline.early_rate, 2.0);
        assert_approx(decline.middle_rate, 6.0);
        assert_approx(decline.late_rate, 3.0);
    }

    #[test]
    fn theta_sweep_includes_bounds() {
        let config = ThresholdConfig {
            theta_min: 0.2,
            theta_max: 1.0,
            points: 5,
            ..ThresholdConfig::default()
        };
        let thetas = config.thetas();
        assert_eq!(thetas.len(), 5);
        assert_approx(thetas[0], 0.2);
        assert_approx(thetas[2], 0.6);
        assert_approx(thetas[4], 1.0);
    }

    #[test]
    fn minimum_theta_is_smallest_point_meeting_target() {
        let params = priced_params();
        let analysis = threshold_analysis(
            &params,
            &Scenario::natural_history(),
            ThresholdConfig {
                target_icer: 150_000.0,
                points: 11,
                ..ThresholdConfig::default()
            },
        )
        .expect("threshold");

        assert_eq!(analysis.points.len(), 11);
        let expected = analysis
            .points
            .iter()
            .find(|p| p.icer.is_within(150_000.0))
            .map(|p| p.theta);
        assert_eq!(analysis.minimum_theta, expected);
        // theta 0 buys no effect at full price
        assert!(!analysis.points[0].meets_threshold);
        assert!(analysis.points[10].incremental_qalys > analysis.points[5].incremental_qalys);
    }

    #[test]
    fn threshold_config_rejects_bad_bounds() {
        let bad = ThresholdConfig {
            theta_min: 0.9,
            theta_max: 0.1,
            ..ThresholdConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = ThresholdConfig {
            points: 0,
            ..ThresholdConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn population_average_is_proportion_weighted() {
        let params = priced_params();
        let analysis =
            heterogeneity_analysis(&params, &Scenario::natural_history(), &default_subgroups())
                .expect("heterogeneity");

        let weighted_cost: f64 = analysis
            .subgroups
            .iter()
            .map(|s| s.proportion * s.outcome.total_cost)
            .sum();
        assert_approx(analysis.population.total_cost, weighted_cost);
        let weighted_inc: f64 = analysis
            .subgroups
            .iter()
            .map(|s| s.proportion * s.incremental.qalys)
            .sum();
        assert!((analysis.population.incremental_qalys - weighted_inc).abs() < 1e-9);

        let non = &analysis.subgroups[3];
        assert_eq!(non.incremental.qalys, 0.0);
        assert_eq!(non.incremental.icer_qaly, Icer::Infinite);
    }

    #[test]
    fn subgroup_and_starting_age_results_are_reproducible() {
        let params = priced_params();
        let baseline = Scenario::natural_history();
        let run = || heterogeneity_analysis(&params, &baseline, &default_subgroups());
        assert_eq!(run().expect("first"), run().expect("second"));

        let config = StartingAgeConfig {
            ages: vec![3],
            ..StartingAgeConfig::default()
        };
        let interventions = [Scenario::treated("Realistic", 0.85)];
        let rows = || starting_age_analysis(&params, &baseline, &interventions, &config, &[]);
        let (a, b) = (rows().expect("first"), rows().expect("second"));
        assert_eq!(a, b);
        assert_eq!(a[0].incremental, b[0].incremental);
    }

    #[test]
    fn subgroup_proportions_must_sum_to_one() {
        let mut subgroups = default_subgroups();
        subgroups[0].proportion = 0.5;
        let err = heterogeneity_analysis(
            &ParameterSet::default(),
            &Scenario::natural_history(),
            &subgroups,
        )
        .expect_err("must reject");
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn starting_latent_declines_with_age_and_floors() {
        let config = StartingAgeConfig::default();
        assert_approx(config.starting_latent(95.0, 1), 95.0);
        assert_approx(config.starting_latent(95.0, 5), 87.0);
        assert_approx(config.starting_latent(95.0, 40), 30.0);
    }

    #[test]
    fn starting_age_rows_cover_every_age_and_scenario() {
        let params = priced_params();
        let interventions = [
            Scenario::treated("Optimistic", 1.0),
            Scenario::treated("Pessimistic", 0.5),
        ];
        let config = StartingAgeConfig {
            ages: vec![1, 10],
            ..StartingAgeConfig::default()
        };
        let rows = starting_age_analysis(
            &params,
            &Scenario::natural_history(),
            &interventions,
            &config,
            &[100_000.0],
        )
        .expect("rows");

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].starting_age, 1);
        assert_eq!(rows[3].starting_age, 10);
        assert_approx(rows[3].starting_latent, 77.0);
        assert_eq!(rows[0].prices.len(), 1);
        assert!(rows[0].incremental.qalys > rows[1].incremental.qalys);
    }
}
