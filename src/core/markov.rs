use super::decline::DeclinePlan;
use super::error::ModelError;
use super::mortality::stage_mortality;
use super::params::{ParameterSet, Scenario};
use super::types::{CohortRun, PerStage, STAGE_COUNT, Stage};

/// Row-stochastic one-cycle transition probabilities, rows indexed by the
/// from-stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionMatrix {
    rows: [PerStage<f64>; STAGE_COUNT],
}

impl TransitionMatrix {
    pub fn row(&self, from: Stage) -> &PerStage<f64> {
        &self.rows[from.index()]
    }

    pub fn probability(&self, from: Stage, to: Stage) -> f64 {
        self.rows[from.index()][to]
    }

    /// `state * M` for a row vector `state`.
    pub fn apply(&self, state: &PerStage<f64>) -> PerStage<f64> {
        let mut next = PerStage::zeros();
        for (from, mass) in state.iter() {
            if mass == 0.0 {
                continue;
            }
            for (to, p) in self.rows[from.index()].iter() {
                next[to] += mass * p;
            }
        }
        next
    }
}

/// Builds the matrix for one cycle.
///
/// Every living row moves to the stage implied by `max(0, latent - decline)`
/// with the survival probability and to Death with the stage mortality. All
/// rows share the single cohort latent value. Death is absorbing.
pub fn build_transition_matrix(
    params: &ParameterSet,
    decline: f64,
    age: u32,
    cohort_latent: f64,
    cycle: u32,
) -> Result<TransitionMatrix, ModelError> {
    let config = params.config();
    let next_latent = (cohort_latent - decline).max(0.0);
    let predicted = config.thresholds.classify(next_latent);

    let mut rows = [PerStage::zeros(); STAGE_COUNT];
    for from in Stage::ALL {
        let row = &mut rows[from.index()];
        if !from.is_alive() {
            row[Stage::Death] = 1.0;
            continue;
        }

        let mortality = stage_mortality(
            &config.background_mortality,
            &config.relative_risks,
            from,
            age,
        );
        row[Stage::Death] = mortality;
        row[predicted] += 1.0 - mortality;

        let sum = row.sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(ModelError::DegenerateRow {
                cycle,
                stage: from,
                sum,
            });
        }
        if sum != 1.0 {
            for p in row.0.iter_mut() {
                *p /= sum;
            }
        }
    }

    Ok(TransitionMatrix { rows })
}

/// Propagates the cohort from a one-hot start through `horizon` cycles.
///
/// Cycle `t` (1-based) uses the decline for age `starting_age + t`, lowers the
/// shared latent value, and moves occupancy with the matrix built from the
/// pre-decline value, so occupancy always matches the classified latent value.
pub fn run_cohort(params: &ParameterSet, scenario: &Scenario) -> Result<CohortRun, ModelError> {
    let config = params.config();
    let plan = DeclinePlan::new(&config.decline, scenario.target, scenario.waning)?;
    let cycles = config.horizon as usize + 1;

    let mut trace = Vec::with_capacity(cycles);
    let mut latent = Vec::with_capacity(cycles);
    let mut decline_rates = Vec::with_capacity(cycles);
    let mut ages = Vec::with_capacity(cycles);

    let mut state = PerStage::one_hot(params.initial_stage());
    let mut cohort_latent = config.starting_latent;
    trace.push(state);
    latent.push(cohort_latent);
    decline_rates.push(0.0);
    ages.push(config.starting_age);

    for cycle in 1..=config.horizon {
        let age = config.starting_age + cycle;
        let rate = plan.rate(&config.decline, cycle, age);
        let matrix = build_transition_matrix(params, rate, age, cohort_latent, cycle)?;

        cohort_latent = (cohort_latent - rate).max(0.0);
        state = matrix.apply(&state);

        trace.push(state);
        latent.push(cohort_latent);
        decline_rates.push(rate);
        ages.push(age);
    }

    Ok(CohortRun {
        trace,
        latent,
        decline_rates,
        ages,
    })
}
