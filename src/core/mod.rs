mod analysis;
mod decline;
mod economics;
mod error;
mod markov;
mod monte_carlo;
mod mortality;
mod params;
mod psa;
mod sensitivity;
mod types;

pub use analysis::{
    DEFAULT_PRICE_THRESHOLDS, FALLBACK_REFERENCE_UTILITY, PricePoint, PricingRow, ScenarioReport,
    icer, incremental, max_price, price_points, pricing_row, reference_utility, run_scenario,
    run_scenarios, value_based_pricing,
};
pub use decline::{
    DeclinePlan, DeclineSchedule, DeclineTarget, ReferenceEffect, ResolvedDecline, Waning,
};
pub use economics::evaluate_run;
pub use error::ModelError;
pub use markov::{TransitionMatrix, build_transition_matrix, run_cohort};
pub use monte_carlo::{
    MonteCarloConfig, PatientRecord, ValidationReport, run_monte_carlo, simulate_patient,
    validate_against_cohort,
};
pub use mortality::{BackgroundMortality, stage_mortality};
pub use params::{
    CaregiverParameters, InterventionCosts, MAX_MODELLED_AGE, ModelConfig, ParameterSet, Scenario,
};
pub use psa::{
    BetaParams, CeacPoint, GammaParams, LogNormalParams, NormalParams, PsaDistributions,
    PsaDraw, PsaIteration, PsaReport, PsaSampler, PsaScenarioSummary, PsaSettings, ceac, run_psa,
};
pub use sensitivity::{
    HeterogeneityAnalysis, ParameterRange, PopulationAverage, SensitivityParameter,
    StartingAgeConfig, StartingAgeRow, Subgroup, SubgroupResult, ThresholdAnalysis,
    ThresholdConfig, ThresholdPoint, TornadoRow, default_ranges, default_subgroups,
    heterogeneity_analysis, one_way_sensitivity, starting_age_analysis, threshold_analysis,
};
pub use types::{
    CohortRun, CycleSeries, Icer, IncrementalResult, LIVING_STAGE_COUNT, MonteCarloSummary,
    OutcomeSummary, PerStage, Percentiles, STAGE_COUNT, ScenarioResult, Stage, StageThresholds,
};
