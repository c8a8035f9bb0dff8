use super::params::{ParameterSet, Scenario};
use super::types::{CohortRun, CycleSeries, ScenarioResult, Stage};

/// Occupancy at or above this share of the cohort counts as "the cohort has
/// reached EndStage".
const END_STAGE_MAJORITY: f64 = 0.5;

/// Attaches costs, QALYs and survival summaries to a cohort run.
pub fn evaluate_run(params: &ParameterSet, scenario: &Scenario, run: CohortRun) -> ScenarioResult {
    let config = params.config();
    let utilities = params.utilities();
    let cycles = run.cycles();

    let mut costs = Vec::with_capacity(cycles);
    let mut qalys = Vec::with_capacity(cycles);
    let mut caregiver_qalys = Vec::with_capacity(cycles);
    let mut discount_factors = Vec::with_capacity(cycles);

    for (cycle, state) in run.trace.iter().enumerate() {
        let cycle_index = cycle as u32;
        let mut cost = state.dot(&config.stage_costs);
        if scenario.include_intervention_costs {
            if cycle == 0 {
                cost += config.intervention_costs.acquisition;
            }
            cost += config.intervention_costs.monitoring(cycle_index);
        }

        let caregiver = match &config.caregiver {
            Some(caregiver) => {
                let age = run.ages[cycle];
                state
                    .iter()
                    .map(|(stage, share)| share * caregiver.disutility(age, stage))
                    .sum()
            }
            None => 0.0,
        };

        costs.push(cost);
        qalys.push(state.dot(utilities));
        caregiver_qalys.push(caregiver);
        discount_factors.push(params.discount_factor(cycle_index));
    }

    let discounted_costs: Vec<f64> = costs
        .iter()
        .zip(&discount_factors)
        .map(|(c, d)| c * d)
        .collect();
    let discounted_qalys: Vec<f64> = qalys
        .iter()
        .zip(&discount_factors)
        .map(|(q, d)| q * d)
        .collect();
    let caregiver_total: f64 = caregiver_qalys
        .iter()
        .zip(&discount_factors)
        .map(|(q, d)| q * d)
        .sum();

    let life_years = run
        .trace
        .iter()
        .map(|state| 1.0 - state[Stage::Death])
        .sum();
    let first_end_stage = run
        .trace
        .iter()
        .position(|state| state[Stage::EndStage] > END_STAGE_MAJORITY);

    let total_cost = discounted_costs.iter().sum();
    let total_qalys: f64 = discounted_qalys.iter().sum();

    ScenarioResult {
        name: scenario.name.clone(),
        include_intervention_costs: scenario.include_intervention_costs,
        acquisition_cost: if scenario.include_intervention_costs {
            config.intervention_costs.acquisition
        } else {
            0.0
        },
        total_cost,
        total_qalys,
        total_cost_undiscounted: costs.iter().sum(),
        total_qalys_undiscounted: qalys.iter().sum(),
        caregiver_qalys: caregiver_total,
        total_qalys_with_caregiver: total_qalys + caregiver_total,
        life_years,
        time_to_end_stage: first_end_stage.map_or(config.horizon, |c| c as u32),
        end_stage_reached: first_end_stage.is_some(),
        incremental: None,
        series: CycleSeries {
            costs,
            qalys,
            caregiver_qalys,
            discount_factors,
            discounted_costs,
            discounted_qalys,
        },
        run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::markov::run_cohort;
    use crate::core::mortality::BackgroundMortality;
    use crate::core::params::{CaregiverParameters, ModelConfig};
    use crate::core::types::PerStage;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    /// Everyone stays in Normal and nobody dies.
    fn static_config(horizon: u32) -> ModelConfig {
        let mut config = ModelConfig {
            horizon,
            background_mortality: BackgroundMortality::constant(0.0),
            ..ModelConfig::default()
        };
        config.decline.early_rate = 0.0;
        config.decline.middle_rate = 0.0;
        config.decline.late_rate = 0.0;
        config.decline.background_rate = 0.0;
        config
    }

    fn evaluate(config: ModelConfig, scenario: &Scenario) -> ScenarioResult {
        let params = ParameterSet::new(config).expect("valid");
        let run = run_cohort(&params, scenario).expect("run");
        evaluate_run(&params, scenario, run)
    }

    #[test]
    fn undiscounted_totals_match_closed_form_for_static_cohort() {
        let config = ModelConfig {
            discount_rate: 0.0,
            ..static_config(9)
        };
        let result = evaluate(config, &Scenario::natural_history());

        assert_approx(result.total_cost, 10.0 * 28_000.0);
        assert_approx(result.total_qalys, 10.0 * 0.80 * 0.85);
        assert_approx(result.life_years, 10.0);
        assert_eq!(result.time_to_end_stage, 9);
        assert!(!result.end_stage_reached);
    }

    #[test]
    fn discounting_matches_geometric_series() {
        let config = ModelConfig {
            discount_rate: 0.035,
            ..static_config(20)
        };
        let result = evaluate(config, &Scenario::natural_history());
        let expected: f64 = (0..=20).map(|t| 28_000.0 / 1.035f64.powi(t)).sum();
        assert_approx(result.total_cost, expected);
        assert_approx(result.total_cost_undiscounted, 21.0 * 28_000.0);
        assert_eq!(result.series.discount_factors[0], 1.0);
    }

    #[test]
    fn intervention_costs_follow_acquisition_and_monitoring_schedule() {
        let mut config = ModelConfig {
            discount_rate: 0.0,
            ..static_config(10)
        };
        config.intervention_costs.acquisition = 1_000_000.0;
        let mut scenario = Scenario::treated("t", 1.0);
        let result = evaluate(config.clone(), &scenario);

        let costs = &result.series.costs;
        assert_approx(costs[0], 28_000.0 + 1_000_000.0 + 25_000.0);
        assert_approx(costs[1], 28_000.0 + 10_000.0);
        assert_approx(costs[4], 28_000.0 + 10_000.0);
        assert_approx(costs[5], 28_000.0 + 3_000.0);
        assert_approx(costs[10], 28_000.0 + 3_000.0);
        assert_approx(result.acquisition_cost, 1_000_000.0);

        scenario.include_intervention_costs = false;
        let without = evaluate(config, &scenario);
        assert_approx(without.series.costs[0], 28_000.0);
        assert_approx(without.acquisition_cost, 0.0);
    }

    #[test]
    fn time_to_end_stage_is_first_majority_cycle() {
        let mut config = static_config(40);
        config.decline.early_rate = 10.0;
        config.decline.middle_rate = 10.0;
        config.decline.late_rate = 10.0;
        // 95 -> 5 after 9 cycles; EndStage below 15 first reached at cycle 9.
        let result = evaluate(config, &Scenario::natural_history());
        assert_eq!(result.time_to_end_stage, 9);
        assert!(result.end_stage_reached);
    }

    #[test]
    fn life_years_count_cycle_zero_and_shrink_with_mortality() {
        let config = ModelConfig {
            background_mortality: BackgroundMortality::constant(0.1),
            relative_risks: PerStage([1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0]),
            ..static_config(2)
        };
        let result = evaluate(config, &Scenario::natural_history());
        assert_approx(result.life_years, 1.0 + 0.9 + 0.81);
    }

    #[test]
    fn caregiver_disutility_is_separate_and_discounted() {
        let config = ModelConfig {
            discount_rate: 0.0,
            caregiver: Some(CaregiverParameters::default()),
            ..static_config(4)
        };
        let result = evaluate(config, &Scenario::natural_history());
        // ages 1..=5, all early childhood, Normal adds nothing, two caregivers
        assert_approx(result.caregiver_qalys, 5.0 * -0.24);
        assert_approx(
            result.total_qalys_with_caregiver,
            result.total_qalys + result.caregiver_qalys,
        );
    }

    #[test]
    fn caregiver_disabled_contributes_nothing() {
        let result = evaluate(static_config(5), &Scenario::natural_history());
        assert_eq!(result.caregiver_qalys, 0.0);
        assert_eq!(result.total_qalys_with_caregiver, result.total_qalys);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_discount_factors_start_at_one_and_strictly_decrease(
            rate in 0.0001f64..0.99,
            horizon in 1u32..120,
        ) {
            let config = ModelConfig { discount_rate: rate, ..static_config(horizon) };
            let result = evaluate(config, &Scenario::natural_history());
            let factors = &result.series.discount_factors;
            prop_assert_eq!(factors[0], 1.0);
            for pair in factors.windows(2) {
                prop_assert!(pair[1] < pair[0]);
            }
        }

        #[test]
        fn prop_discounted_totals_never_exceed_undiscounted(
            rate in 0.0f64..0.2,
            horizon in 1u32..100,
        ) {
            let config = ModelConfig { discount_rate: rate, horizon, ..ModelConfig::default() };
            let result = evaluate(config, &Scenario::treated("t", 0.85));
            prop_assert!(result.total_cost <= result.total_cost_undiscounted + 1e-6);
            prop_assert!(result.total_qalys <= result.total_qalys_undiscounted + 1e-9);
        }
    }
}
