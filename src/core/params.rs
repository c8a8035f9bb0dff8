use serde::{Deserialize, Serialize};

use super::decline::{DeclineSchedule, DeclineTarget, Waning};
use super::error::ModelError;
use super::mortality::BackgroundMortality;
use super::types::{PerStage, Stage, StageThresholds};

/// One-time acquisition price plus the tapering monitoring schedule that
/// accompanies the intervention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterventionCosts {
    pub acquisition: f64,
    pub first_year_monitoring: f64,
    pub early_monitoring: f64,
    pub ongoing_monitoring: f64,
}

impl Default for InterventionCosts {
    fn default() -> Self {
        Self {
            acquisition: 0.0,
            first_year_monitoring: 25_000.0,
            early_monitoring: 10_000.0,
            ongoing_monitoring: 3_000.0,
        }
    }
}

impl InterventionCosts {
    /// Monitoring cost in the given cycle: year 1 at cycle 0, years 2-5 at
    /// cycles 1-4, ongoing afterwards.
    pub fn monitoring(&self, cycle: u32) -> f64 {
        match cycle {
            0 => self.first_year_monitoring,
            1..=4 => self.early_monitoring,
            _ => self.ongoing_monitoring,
        }
    }
}

/// Annual QALY decrement per caregiver, by patient age bracket and stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaregiverParameters {
    pub early_childhood: f64,
    pub school_age: f64,
    pub adolescent: f64,
    pub adult: f64,
    pub stage_burden: PerStage<f64>,
    pub caregivers: u32,
}

impl Default for CaregiverParameters {
    fn default() -> Self {
        Self {
            early_childhood: -0.12,
            school_age: -0.10,
            adolescent: -0.08,
            adult: -0.05,
            stage_burden: PerStage([0.0, -0.01, -0.02, -0.03, -0.05, -0.10, 0.0]),
            caregivers: 2,
        }
    }
}

impl CaregiverParameters {
    pub fn disutility(&self, age: u32, stage: Stage) -> f64 {
        if !stage.is_alive() {
            return 0.0;
        }
        let by_age = match age {
            0..=5 => self.early_childhood,
            6..=12 => self.school_age,
            13..=18 => self.adolescent,
            _ => self.adult,
        };
        (by_age + self.stage_burden[stage]) * self.caregivers as f64
    }
}

/// Raw, serialisable model configuration. Turn it into a [`ParameterSet`]
/// before running anything.
/// Oldest age a cohort may reach by the end of the horizon.
pub const MAX_MODELLED_AGE: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    pub starting_age: u32,
    pub starting_latent: f64,
    pub horizon: u32,
    pub discount_rate: f64,
    pub decline: DeclineSchedule,
    pub thresholds: StageThresholds,
    pub base_utilities: PerStage<f64>,
    pub utility_multiplier: f64,
    pub stage_costs: PerStage<f64>,
    pub intervention_costs: InterventionCosts,
    pub relative_risks: PerStage<f64>,
    pub background_mortality: BackgroundMortality,
    pub caregiver: Option<CaregiverParameters>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            starting_age: 1,
            starting_latent: 95.0,
            horizon: 100,
            discount_rate: 0.015,
            decline: DeclineSchedule::default(),
            thresholds: StageThresholds::default(),
            base_utilities: PerStage([0.80, 0.72, 0.68, 0.61, 0.54, 0.40, 0.0]),
            utility_multiplier: 0.85,
            stage_costs: PerStage([
                28_000.0, 33_000.0, 38_000.0, 53_000.0, 63_000.0, 163_000.0, 0.0,
            ]),
            intervention_costs: InterventionCosts::default(),
            relative_risks: PerStage([10.0, 15.0, 30.0, 50.0, 80.0, 120.0, 0.0]),
            background_mortality: BackgroundMortality::default(),
            caregiver: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !self.starting_latent.is_finite() || self.starting_latent < 0.0 {
            return Err(ModelError::config("starting latent value must be >= 0"));
        }
        if self.horizon == 0 {
            return Err(ModelError::config("horizon must be > 0 cycles"));
        }
        match self.starting_age.checked_add(self.horizon) {
            Some(final_age) if final_age <= MAX_MODELLED_AGE => {}
            _ => {
                return Err(ModelError::config(format!(
                    "starting age {} plus horizon {} exceeds the maximum modelled age {MAX_MODELLED_AGE}",
                    self.starting_age, self.horizon
                )));
            }
        }
        if !self.discount_rate.is_finite() || !(0.0..1.0).contains(&self.discount_rate) {
            return Err(ModelError::config(format!(
                "discount rate must be within [0, 1), got {}",
                self.discount_rate
            )));
        }
        if !self.utility_multiplier.is_finite() || self.utility_multiplier < 0.0 {
            return Err(ModelError::config("utility multiplier must be >= 0"));
        }

        self.decline.validate()?;
        self.thresholds.validate()?;
        self.background_mortality.validate()?;

        for (stage, utility) in self.base_utilities.iter() {
            if !utility.is_finite() {
                return Err(ModelError::config(format!(
                    "utility for {} must be finite",
                    stage.label()
                )));
            }
        }
        for (stage, cost) in self.stage_costs.iter() {
            check_non_negative(&format!("annual cost for {}", stage.label()), cost)?;
        }
        for (stage, rr) in self.relative_risks.iter() {
            check_non_negative(&format!("relative risk for {}", stage.label()), rr)?;
        }

        let costs = &self.intervention_costs;
        for (name, v) in [
            ("acquisition cost", costs.acquisition),
            ("first-year monitoring cost", costs.first_year_monitoring),
            ("years 2-5 monitoring cost", costs.early_monitoring),
            ("ongoing monitoring cost", costs.ongoing_monitoring),
        ] {
            check_non_negative(name, v)?;
        }

        if let Some(caregiver) = &self.caregiver {
            let all = [
                caregiver.early_childhood,
                caregiver.school_age,
                caregiver.adolescent,
                caregiver.adult,
            ];
            if all
                .iter()
                .chain(caregiver.stage_burden.0.iter())
                .any(|v| !v.is_finite())
            {
                return Err(ModelError::config("caregiver disutilities must be finite"));
            }
        }
        Ok(())
    }
}

/// Validated, read-only parameters for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    config: ModelConfig,
    utilities: PerStage<f64>,
}

impl ParameterSet {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: ModelConfig) -> Self {
        let utilities = PerStage::from_fn(|stage| {
            if stage.is_alive() {
                config.base_utilities[stage] * config.utility_multiplier
            } else {
                0.0
            }
        });
        Self { config, utilities }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Disease-adjusted utility, zero for Death.
    pub fn utilities(&self) -> &PerStage<f64> {
        &self.utilities
    }

    pub fn initial_stage(&self) -> Stage {
        self.config.thresholds.classify(self.config.starting_latent)
    }

    pub fn discount_factor(&self, cycle: u32) -> f64 {
        (1.0 + self.config.discount_rate).powi(-(cycle as i32))
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self::from_valid(ModelConfig::default())
    }
}

/// One arm of the analysis: everything that differs between baseline and
/// intervention runs sharing a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub target: DeclineTarget,
    #[serde(default)]
    pub include_intervention_costs: bool,
    #[serde(default)]
    pub waning: Option<Waning>,
}

impl Scenario {
    pub fn natural_history() -> Self {
        Self {
            name: "Natural history".to_string(),
            target: DeclineTarget::Natural,
            include_intervention_costs: false,
            waning: None,
        }
    }

    pub fn treated(name: impl Into<String>, theta: f64) -> Self {
        Self {
            name: name.into(),
            target: DeclineTarget::Theta { theta },
            include_intervention_costs: true,
            waning: None,
        }
    }

    pub fn with_waning(mut self, waning: Waning) -> Self {
        self.waning = Some(waning);
        self
    }

    /// Optimistic through pessimistic effects plus an optimistic arm that wanes
    /// to the conservative effect over cycles 10-20.
    pub fn default_interventions() -> Vec<Scenario> {
        vec![
            Scenario::treated("Optimistic", 1.00),
            Scenario::treated("Realistic", 0.85),
            Scenario::treated("Conservative", 0.70),
            Scenario::treated("Pessimistic", 0.50),
            Scenario::treated("Treatment waning", 1.00).with_waning(Waning {
                start_cycle: 10,
                duration: 10,
                target: DeclineTarget::Theta { theta: 0.70 },
            }),
        ]
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ModelError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ModelError::config(format!(
            "{name} must be >= 0, got {value}"
        )));
    }
    Ok(())
}
