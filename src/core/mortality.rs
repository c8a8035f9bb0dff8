use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::ModelError;
use super::types::{PerStage, Stage};

/// Sparse anchors of an all-cause annual death probability schedule (male
/// period life table shape). Ages between anchors are interpolated.
const REFERENCE_LIFE_TABLE: [(u32, f64); 22] = [
    (0, 0.0034),
    (1, 0.0003),
    (5, 0.0001),
    (10, 0.0001),
    (15, 0.0002),
    (20, 0.0004),
    (25, 0.0005),
    (30, 0.0006),
    (35, 0.0008),
    (40, 0.0011),
    (45, 0.0017),
    (50, 0.0027),
    (55, 0.0045),
    (60, 0.0074),
    (65, 0.0118),
    (70, 0.0190),
    (75, 0.0310),
    (80, 0.0530),
    (85, 0.0950),
    (90, 0.1650),
    (95, 0.2700),
    (100, 0.3900),
];

/// Externally supplied age -> annual death probability mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackgroundMortality {
    by_age: BTreeMap<u32, f64>,
}

impl Default for BackgroundMortality {
    fn default() -> Self {
        Self::reference_table()
    }
}

impl BackgroundMortality {
    pub fn new(by_age: BTreeMap<u32, f64>) -> Result<Self, ModelError> {
        let table = Self { by_age };
        table.validate()?;
        Ok(table)
    }

    pub fn reference_table() -> Self {
        Self {
            by_age: REFERENCE_LIFE_TABLE.into_iter().collect(),
        }
    }

    /// Same probability at every age. Mostly useful for isolating progression.
    pub fn constant(probability: f64) -> Self {
        Self {
            by_age: BTreeMap::from([(0, probability)]),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.by_age.is_empty() {
            return Err(ModelError::config(
                "background mortality must cover at least one age",
            ));
        }
        for (age, p) in &self.by_age {
            if !p.is_finite() || !(0.0..=1.0).contains(p) {
                return Err(ModelError::config(format!(
                    "background mortality at age {age} must be a probability in [0, 1], got {p}"
                )));
            }
        }
        Ok(())
    }

    /// Exact lookup, linear interpolation between the bracketing known ages,
    /// or the nearest boundary value outside the supplied range.
    pub fn probability(&self, age: u32) -> f64 {
        if let Some(p) = self.by_age.get(&age) {
            return *p;
        }

        let below = self.by_age.range(..age).next_back();
        let above = self.by_age.range(age..).next();
        match (below, above) {
            (Some((&lo_age, &lo)), Some((&hi_age, &hi))) => {
                let w = (age - lo_age) as f64 / (hi_age - lo_age) as f64;
                lo + w * (hi - lo)
            }
            (Some((_, &lo)), None) => lo,
            (None, Some((_, &hi))) => hi,
            (None, None) => 0.0,
        }
    }
}

/// Background mortality scaled by the stage relative risk, capped at 1.
/// Death carries no further mortality.
pub fn stage_mortality(
    background: &BackgroundMortality,
    relative_risks: &PerStage<f64>,
    stage: Stage,
    age: u32,
) -> f64 {
    if !stage.is_alive() {
        return 0.0;
    }
    (background.probability(age) * relative_risks[stage]).min(1.0)
}
