use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use super::economics::evaluate_run;
use super::error::ModelError;
use super::markov::run_cohort;
use super::params::{ParameterSet, Scenario};
use super::types::{Icer, IncrementalResult, ScenarioResult};

/// Willingness-to-pay thresholds used when the caller supplies none.
pub const DEFAULT_PRICE_THRESHOLDS: [f64; 3] = [100_000.0, 150_000.0, 300_000.0];

/// Cost per unit of health gained. A zero gain is free when it costs nothing
/// and infinitely expensive otherwise; a loss is dominated.
pub fn icer(incremental_cost: f64, incremental_health: f64) -> Icer {
    if incremental_health > 0.0 {
        Icer::Value(incremental_cost / incremental_health)
    } else if incremental_health == 0.0 {
        if incremental_cost > 0.0 {
            Icer::Infinite
        } else {
            Icer::Value(0.0)
        }
    } else {
        Icer::Dominated
    }
}

/// Used when the baseline cohort accrues no life years to average over.
pub const FALLBACK_REFERENCE_UTILITY: f64 = 0.6;

/// Average baseline quality per life year.
pub fn reference_utility(baseline: &ScenarioResult) -> f64 {
    if baseline.life_years > 0.0 {
        baseline.total_qalys / baseline.life_years
    } else {
        FALLBACK_REFERENCE_UTILITY
    }
}

pub fn incremental(baseline: &ScenarioResult, intervention: &ScenarioResult) -> IncrementalResult {
    let cost = intervention.total_cost - baseline.total_cost;
    let qalys = intervention.total_qalys - baseline.total_qalys;
    let reference_utility = reference_utility(baseline);
    let evlyg = if reference_utility > 0.0 {
        qalys / reference_utility
    } else {
        0.0
    };

    IncrementalResult {
        cost,
        qalys,
        life_years: intervention.life_years - baseline.life_years,
        evlyg,
        reference_utility,
        icer_qaly: icer(cost, qalys),
        icer_evlyg: icer(cost, evlyg),
        time_to_end_stage_delay: intervention.time_to_end_stage as i64
            - baseline.time_to_end_stage as i64,
    }
}

pub fn run_scenario(
    params: &ParameterSet,
    scenario: &Scenario,
) -> Result<ScenarioResult, ModelError> {
    let run = run_cohort(params, scenario)?;
    let result = evaluate_run(params, scenario, run);
    debug!(
        "{}: cost {:.0}, QALYs {:.3}, life years {:.2}, EndStage at cycle {}",
        result.name,
        result.total_cost,
        result.total_qalys,
        result.life_years,
        result.time_to_end_stage
    );
    Ok(result)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub baseline: ScenarioResult,
    pub interventions: Vec<ScenarioResult>,
}

impl ScenarioReport {
    pub fn intervention(&self, name: &str) -> Option<&ScenarioResult> {
        self.interventions.iter().find(|r| r.name == name)
    }
}

/// Runs the baseline and every intervention against the same parameters and
/// fills in each intervention's incremental results.
pub fn run_scenarios(
    params: &ParameterSet,
    baseline: &Scenario,
    interventions: &[Scenario],
) -> Result<ScenarioReport, ModelError> {
    info!(
        "running baseline '{}' and {} intervention scenario(s)",
        baseline.name,
        interventions.len()
    );
    let baseline_result = run_scenario(params, baseline)?;
    let mut results = interventions
        .par_iter()
        .map(|scenario| run_scenario(params, scenario))
        .collect::<Result<Vec<_>, _>>()?;
    for result in &mut results {
        result.incremental = Some(incremental(&baseline_result, result));
    }
    info!("scenario analysis complete");

    Ok(ScenarioReport {
        baseline: baseline_result,
        interventions: results,
    })
}

/// Highest acquisition price at which the intervention still meets
/// `threshold`, given the other incremental costs it carries. Zero when there
/// is no health gain.
pub fn max_price(threshold: f64, health_gain: f64, cost_excluding_acquisition: f64) -> f64 {
    if health_gain <= 0.0 {
        return 0.0;
    }
    (threshold * health_gain - cost_excluding_acquisition).max(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub threshold: f64,
    pub qaly_based: f64,
    pub evlyg_based: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRow {
    pub scenario: String,
    pub incremental_qalys: f64,
    pub evlyg: f64,
    pub life_years_gained: f64,
    pub incremental_cost_excluding_acquisition: f64,
    pub prices: Vec<PricePoint>,
}

/// Maximum prices at each threshold for both health measures.
pub fn price_points(
    incremental: &IncrementalResult,
    acquisition_cost: f64,
    thresholds: &[f64],
) -> Vec<PricePoint> {
    let other_costs = incremental.cost - acquisition_cost;
    thresholds
        .iter()
        .map(|&threshold| PricePoint {
            threshold,
            qaly_based: max_price(threshold, incremental.qalys, other_costs),
            evlyg_based: max_price(threshold, incremental.evlyg, other_costs),
        })
        .collect()
}

pub fn pricing_row(intervention: &ScenarioResult, thresholds: &[f64]) -> Option<PricingRow> {
    let inc = intervention.incremental?;
    Some(PricingRow {
        scenario: intervention.name.clone(),
        incremental_qalys: inc.qalys,
        evlyg: inc.evlyg,
        life_years_gained: inc.life_years,
        incremental_cost_excluding_acquisition: inc.cost - intervention.acquisition_cost,
        prices: price_points(&inc, intervention.acquisition_cost, thresholds),
    })
}

/// One row per intervention in the report.
pub fn value_based_pricing(report: &ScenarioReport, thresholds: &[f64]) -> Vec<PricingRow> {
    report
        .interventions
        .iter()
        .filter_map(|result| pricing_row(result, thresholds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ModelConfig;
    use crate::core::types::Stage;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn icer_divides_for_positive_gain() {
        assert_eq!(icer(100.0, 4.0), Icer::Value(25.0));
        assert_eq!(icer(-100.0, 4.0), Icer::Value(-25.0));
    }

    #[test]
    fn zero_gain_with_positive_cost_is_infinite() {
        assert_eq!(icer(100.0, 0.0), Icer::Infinite);
    }

    #[test]
    fn zero_gain_without_extra_cost_is_zero() {
        assert_eq!(icer(0.0, 0.0), Icer::Value(0.0));
        assert_eq!(icer(-10.0, 0.0), Icer::Value(0.0));
    }

    #[test]
    fn negative_gain_is_dominated_not_infinite() {
        let result = icer(100.0, -0.5);
        assert_eq!(result, Icer::Dominated);
        assert_ne!(result, Icer::Infinite);
        assert!(!result.is_within(f64::MAX));
    }

    #[test]
    fn max_price_solves_threshold_and_clamps() {
        assert_approx(max_price(100_000.0, 2.0, 50_000.0), 150_000.0);
        assert_eq!(max_price(100_000.0, 0.1, 50_000.0), 0.0);
        assert_eq!(max_price(100_000.0, 0.0, -50_000.0), 0.0);
        assert_eq!(max_price(100_000.0, -1.0, 0.0), 0.0);
    }

    #[test]
    fn default_interventions_gain_health_over_natural_history() {
        let params = ParameterSet::default();
        let report = run_scenarios(
            &params,
            &Scenario::natural_history(),
            &Scenario::default_interventions(),
        )
        .expect("report");

        assert!(report.baseline.incremental.is_none());
        assert_eq!(report.interventions.len(), 5);
        let optimistic = report.intervention("Optimistic").expect("present");
        let pessimistic = report.intervention("Pessimistic").expect("present");
        let opt = optimistic.incremental.expect("incremental");
        let pes = pessimistic.incremental.expect("incremental");
        assert!(opt.qalys > pes.qalys);
        assert!(pes.qalys > 0.0);
        assert!(opt.time_to_end_stage_delay >= pes.time_to_end_stage_delay);
    }

    #[test]
    fn evlyg_exceeds_qaly_gain_when_reference_utility_below_one() {
        let params = ParameterSet::default();
        let report = run_scenarios(
            &params,
            &Scenario::natural_history(),
            &Scenario::default_interventions(),
        )
        .expect("report");
        for result in &report.interventions {
            let inc = result.incremental.expect("incremental");
            assert!(inc.reference_utility < 1.0);
            if inc.qalys > 0.0 {
                assert!(inc.evlyg >= inc.qalys, "{}", result.name);
            }
        }
    }

    #[test]
    fn identical_scenarios_have_zero_increment() {
        let params = ParameterSet::default();
        let mut same = Scenario::natural_history();
        same.name = "Copy".to_string();
        let report = run_scenarios(&params, &Scenario::natural_history(), &[same]).expect("report");
        let inc = report.interventions[0].incremental.expect("incremental");
        assert_eq!(inc.qalys, 0.0);
        assert_eq!(inc.cost, 0.0);
        assert_eq!(inc.icer_qaly, Icer::Value(0.0));
        assert_eq!(inc.time_to_end_stage_delay, 0);
    }

    #[test]
    fn baseline_without_life_years_uses_fallback_reference_utility() {
        let params = ParameterSet::default();
        let mut baseline = run_scenario(&params, &Scenario::natural_history()).expect("run");
        let treated = run_scenario(&params, &Scenario::treated("t", 1.0)).expect("run");
        baseline.life_years = 0.0;

        assert_eq!(reference_utility(&baseline), FALLBACK_REFERENCE_UTILITY);
        let inc = incremental(&baseline, &treated);
        assert!(inc.qalys > 0.0);
        assert_approx(inc.evlyg, inc.qalys / FALLBACK_REFERENCE_UTILITY);
    }

    #[test]
    fn repeated_runs_are_deterministic() {
        let params = ParameterSet::default();
        let a = run_scenario(&params, &Scenario::treated("t", 0.7)).expect("run");
        let b = run_scenario(&params, &Scenario::treated("t", 0.7)).expect("run");
        assert_eq!(a.total_cost, b.total_cost);
        assert_eq!(a.total_qalys, b.total_qalys);
        let final_death = |r: &ScenarioResult| r.run.trace.last().map(|s| s[Stage::Death]);
        assert_eq!(final_death(&a), final_death(&b));
    }

    #[test]
    fn pricing_excludes_acquisition_price_from_other_costs() {
        let mut config = ModelConfig::default();
        config.intervention_costs.acquisition = 2_000_000.0;
        let params = ParameterSet::new(config).expect("valid");
        let report = run_scenarios(
            &params,
            &Scenario::natural_history(),
            &[Scenario::treated("Optimistic", 1.0)],
        )
        .expect("report");

        let rows = value_based_pricing(&report, &DEFAULT_PRICE_THRESHOLDS);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        let inc = report.interventions[0].incremental.expect("incremental");
        assert_approx(row.incremental_cost_excluding_acquisition, inc.cost - 2_000_000.0);
        assert_eq!(row.prices.len(), 3);
        for point in &row.prices {
            let expected = (point.threshold * inc.qalys
                - row.incremental_cost_excluding_acquisition)
                .max(0.0);
            assert_approx(point.qaly_based, expected);
            assert!(point.evlyg_based >= point.qaly_based);
        }
    }

    #[test]
    fn invalid_scenario_theta_propagates_error() {
        let params = ParameterSet::default();
        let err = run_scenarios(
            &params,
            &Scenario::natural_history(),
            &[Scenario::treated("bad", 1.5)],
        )
        .expect_err("must reject");
        assert!(matches!(err, ModelError::InvalidConfig(_)));
    }
}
