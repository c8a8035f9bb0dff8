use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use super::error::ModelError;

pub const STAGE_COUNT: usize = 7;
pub const LIVING_STAGE_COUNT: usize = 6;

/// Disease stages ordered from best kidney function to death.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Normal,
    Stage2,
    Stage3a,
    Stage3b,
    Stage4,
    EndStage,
    Death,
}

impl Stage {
    pub const ALL: [Stage; STAGE_COUNT] = [
        Stage::Normal,
        Stage::Stage2,
        Stage::Stage3a,
        Stage::Stage3b,
        Stage::Stage4,
        Stage::EndStage,
        Stage::Death,
    ];

    pub const LIVING: [Stage; LIVING_STAGE_COUNT] = [
        Stage::Normal,
        Stage::Stage2,
        Stage::Stage3a,
        Stage::Stage3b,
        Stage::Stage4,
        Stage::EndStage,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_alive(self) -> bool {
        self != Stage::Death
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Normal => "Normal",
            Stage::Stage2 => "Stage 2",
            Stage::Stage3a => "Stage 3a",
            Stage::Stage3b => "Stage 3b",
            Stage::Stage4 => "Stage 4",
            Stage::EndStage => "End stage",
            Stage::Death => "Death",
        }
    }
}

/// One value per stage, indexed by [`Stage`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerStage<T>(pub [T; STAGE_COUNT]);

impl<T: Copy> PerStage<T> {
    pub fn splat(value: T) -> Self {
        Self([value; STAGE_COUNT])
    }

    pub fn from_fn(mut f: impl FnMut(Stage) -> T) -> Self {
        Self(Stage::ALL.map(&mut f))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, T)> + '_ {
        Stage::ALL.iter().map(move |&stage| (stage, self.0[stage.index()]))
    }
}

impl PerStage<f64> {
    pub fn zeros() -> Self {
        Self::splat(0.0)
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn dot(&self, other: &PerStage<f64>) -> f64 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn one_hot(stage: Stage) -> Self {
        let mut out = Self::zeros();
        out[stage] = 1.0;
        out
    }
}

impl<T> Index<Stage> for PerStage<T> {
    type Output = T;

    fn index(&self, stage: Stage) -> &T {
        &self.0[stage.index()]
    }
}

impl<T> IndexMut<Stage> for PerStage<T> {
    fn index_mut(&mut self, stage: Stage) -> &mut T {
        &mut self.0[stage.index()]
    }
}

/// Lower bounds of the half-open latent-value interval for each living stage.
///
/// Stage `i` covers `[lower[i], lower[i - 1])`, with Normal open-ended above.
/// Values below the EndStage bound (which validation pins to zero) still map to
/// EndStage, so every non-negative value lands in exactly one stage.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageThresholds {
    pub lower_bounds: [f64; LIVING_STAGE_COUNT],
}

impl Default for StageThresholds {
    fn default() -> Self {
        Self {
            lower_bounds: [90.0, 60.0, 45.0, 30.0, 15.0, 0.0],
        }
    }
}

impl StageThresholds {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.lower_bounds.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::config("stage thresholds must be finite"));
        }
        for pair in self.lower_bounds.windows(2) {
            if pair[1] >= pair[0] {
                return Err(ModelError::config(format!(
                    "stage thresholds must be strictly decreasing (got {} then {})",
                    pair[0], pair[1]
                )));
            }
        }
        if self.lower_bounds[LIVING_STAGE_COUNT - 1] != 0.0 {
            return Err(ModelError::config(
                "end-stage threshold must start at 0 so the partition covers all values",
            ));
        }
        Ok(())
    }

    pub fn classify(&self, latent: f64) -> Stage {
        for stage in Stage::LIVING {
            if latent >= self.lower_bounds[stage.index()] {
                return stage;
            }
        }
        Stage::EndStage
    }
}

/// Occupancy trace plus the per-cycle latent series of one cohort run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRun {
    pub trace: Vec<PerStage<f64>>,
    pub latent: Vec<f64>,
    pub decline_rates: Vec<f64>,
    pub ages: Vec<u32>,
}

impl CohortRun {
    pub fn cycles(&self) -> usize {
        self.trace.len()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSeries {
    pub costs: Vec<f64>,
    pub qalys: Vec<f64>,
    pub caregiver_qalys: Vec<f64>,
    pub discount_factors: Vec<f64>,
    pub discounted_costs: Vec<f64>,
    pub discounted_qalys: Vec<f64>,
}

/// Cost-effectiveness ratio with explicit sentinels for degenerate denominators.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Icer {
    Value(f64),
    Infinite,
    Dominated,
}

impl Icer {
    pub fn value(self) -> Option<f64> {
        match self {
            Icer::Value(v) => Some(v),
            Icer::Infinite | Icer::Dominated => None,
        }
    }

    pub fn is_within(self, threshold: f64) -> bool {
        matches!(self, Icer::Value(v) if v <= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalResult {
    pub cost: f64,
    pub qalys: f64,
    pub life_years: f64,
    pub evlyg: f64,
    pub reference_utility: f64,
    pub icer_qaly: Icer,
    pub icer_evlyg: Icer,
    pub time_to_end_stage_delay: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub name: String,
    pub include_intervention_costs: bool,
    pub acquisition_cost: f64,
    pub total_cost: f64,
    pub total_qalys: f64,
    pub total_cost_undiscounted: f64,
    pub total_qalys_undiscounted: f64,
    pub caregiver_qalys: f64,
    pub total_qalys_with_caregiver: f64,
    pub life_years: f64,
    pub time_to_end_stage: u32,
    pub end_stage_reached: bool,
    pub incremental: Option<IncrementalResult>,
    pub series: CycleSeries,
    pub run: CohortRun,
}

/// Headline totals of one scenario run without the per-cycle detail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub total_cost: f64,
    pub total_qalys: f64,
    pub life_years: f64,
    pub time_to_end_stage: u32,
}

impl From<&ScenarioResult> for OutcomeSummary {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            total_cost: result.total_cost,
            total_qalys: result.total_qalys,
            life_years: result.life_years,
            time_to_end_stage: result.time_to_end_stage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub patients: u32,
    pub seed: u64,
    pub end_stage_fraction: f64,
    pub end_stage_age: Option<Percentiles>,
    pub exit_age: Percentiles,
    pub mean_exit_age: f64,
    pub stage_occupancy: PerStage<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_uses_half_open_intervals() {
        let thresholds = StageThresholds::default();
        assert_eq!(thresholds.classify(95.0), Stage::Normal);
        assert_eq!(thresholds.classify(90.0), Stage::Normal);
        assert_eq!(thresholds.classify(89.999), Stage::Stage2);
        assert_eq!(thresholds.classify(60.0), Stage::Stage2);
        assert_eq!(thresholds.classify(59.0), Stage::Stage3a);
        assert_eq!(thresholds.classify(45.0), Stage::Stage3a);
        assert_eq!(thresholds.classify(44.0), Stage::Stage3b);
        assert_eq!(thresholds.classify(15.0), Stage::Stage4);
        assert_eq!(thresholds.classify(14.9), Stage::EndStage);
        assert_eq!(thresholds.classify(0.0), Stage::EndStage);
    }

    #[test]
    fn classify_maps_values_far_above_normal_to_normal() {
        let thresholds = StageThresholds::default();
        assert_eq!(thresholds.classify(250.0), Stage::Normal);
    }

    #[test]
    fn classify_maps_below_partition_to_end_stage() {
        let thresholds = StageThresholds::default();
        assert_eq!(thresholds.classify(-3.0), Stage::EndStage);
    }

    #[test]
    fn validate_rejects_non_monotonic_thresholds() {
        let thresholds = StageThresholds {
            lower_bounds: [90.0, 60.0, 65.0, 30.0, 15.0, 0.0],
        };
        let err = thresholds.validate().expect_err("must reject");
        assert!(err.to_string().contains("strictly decreasing"));
    }

    #[test]
    fn validate_rejects_partition_with_gap_at_zero() {
        let thresholds = StageThresholds {
            lower_bounds: [90.0, 60.0, 45.0, 30.0, 15.0, 5.0],
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn icer_threshold_check_ignores_sentinels() {
        assert!(Icer::Value(50_000.0).is_within(100_000.0));
        assert!(!Icer::Value(150_000.0).is_within(100_000.0));
        assert!(!Icer::Infinite.is_within(f64::MAX));
        assert!(!Icer::Dominated.is_within(f64::MAX));
    }

    #[test]
    fn per_stage_dot_and_one_hot() {
        let weights = PerStage::from_fn(|stage| stage.index() as f64);
        let hot = PerStage::one_hot(Stage::Stage3b);
        assert_eq!(hot.sum(), 1.0);
        assert_eq!(weights.dot(&hot), 3.0);
    }

    #[test]
    fn icer_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Icer::Dominated).expect("serialize");
        assert_eq!(json, r#"{"kind":"dominated"}"#);
        let json = serde_json::to_string(&Icer::Value(2.5)).expect("serialize");
        assert_eq!(json, r#"{"kind":"value","value":2.5}"#);
    }
}
