use log::warn;
use serde::{Deserialize, Serialize};

use super::error::ModelError;

/// Nominal averaged decline rate paired with the fraction of pathological
/// decline it was calibrated to eliminate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEffect {
    pub nominal_rate: f64,
    pub theta: f64,
}

/// Age-bracketed natural decline of the latent variable, and its split into
/// an ageing background and a disease-driven component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeclineSchedule {
    pub early_rate: f64,
    pub middle_rate: f64,
    pub late_rate: f64,
    pub first_breakpoint: u32,
    pub second_breakpoint: u32,
    pub background_rate: f64,
    pub natural_average: f64,
    pub reference_effects: Vec<ReferenceEffect>,
    pub match_tolerance: f64,
}

impl Default for DeclineSchedule {
    fn default() -> Self {
        Self {
            early_rate: 1.0,
            middle_rate: 3.0,
            late_rate: 1.5,
            first_breakpoint: 10,
            second_breakpoint: 20,
            background_rate: 0.3,
            natural_average: 1.77,
            reference_effects: vec![
                ReferenceEffect {
                    nominal_rate: 0.30,
                    theta: 1.00,
                },
                ReferenceEffect {
                    nominal_rate: 0.52,
                    theta: 0.85,
                },
                ReferenceEffect {
                    nominal_rate: 0.74,
                    theta: 0.70,
                },
                ReferenceEffect {
                    nominal_rate: 1.04,
                    theta: 0.50,
                },
            ],
            match_tolerance: 0.05,
        }
    }
}

impl DeclineSchedule {
    pub fn validate(&self) -> Result<(), ModelError> {
        for (name, v) in [
            ("early decline rate", self.early_rate),
            ("middle decline rate", self.middle_rate),
            ("late decline rate", self.late_rate),
            ("background decline rate", self.background_rate),
            ("match tolerance", self.match_tolerance),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ModelError::config(format!("{name} must be >= 0, got {v}")));
            }
        }
        if !self.natural_average.is_finite() || self.natural_average <= 0.0 {
            return Err(ModelError::config("natural average decline must be > 0"));
        }
        if self.second_breakpoint < self.first_breakpoint {
            return Err(ModelError::config(
                "second decline breakpoint must be >= first breakpoint",
            ));
        }
        for effect in &self.reference_effects {
            if !effect.nominal_rate.is_finite() || effect.nominal_rate < 0.0 {
                return Err(ModelError::config("reference nominal rates must be >= 0"));
            }
            check_theta(effect.theta)?;
        }
        Ok(())
    }

    /// Untreated decline for the given age.
    pub fn natural_rate(&self, age: u32) -> f64 {
        if age < self.first_breakpoint {
            self.early_rate
        } else if age < self.second_breakpoint {
            self.middle_rate
        } else {
            self.late_rate
        }
    }

    /// `background + (1 - theta) * pathological`, never negative.
    pub fn treated_rate(&self, age: u32, theta: f64) -> f64 {
        let natural = self.natural_rate(age);
        let pathological = natural - self.background_rate;
        (self.background_rate + (1.0 - theta) * pathological).max(0.0)
    }

    pub fn rate(&self, age: u32, effect: ResolvedDecline) -> f64 {
        match effect {
            ResolvedDecline::Natural => self.natural_rate(age),
            ResolvedDecline::Treated { theta } => self.treated_rate(age, theta),
        }
    }

    /// Infers theta from a nominal averaged rate. Returns `None` when the rate
    /// is the natural average itself.
    fn infer_theta(&self, nominal: f64) -> Option<f64> {
        if (nominal - self.natural_average).abs() < 0.01 {
            return None;
        }

        let closest = self
            .reference_effects
            .iter()
            .map(|effect| ((effect.nominal_rate - nominal).abs(), effect.theta))
            .filter(|(distance, _)| *distance < self.match_tolerance)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((_, theta)) = closest {
            return Some(theta);
        }

        let proportional = (self.natural_average - nominal) / self.natural_average;
        let clamped = proportional.clamp(0.0, 1.0);
        if clamped != proportional {
            warn!(
                "nominal decline {nominal} implies theta {proportional:.3}; clamped to {clamped}"
            );
        } else {
            warn!(
                "nominal decline {nominal} matches no calibrated reference; using proportional theta {clamped:.3}"
            );
        }
        Some(clamped)
    }
}

/// How a scenario specifies its decline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DeclineTarget {
    Natural,
    Theta { theta: f64 },
    NominalRate { rate: f64 },
}

impl DeclineTarget {
    pub fn resolve(self, schedule: &DeclineSchedule) -> Result<ResolvedDecline, ModelError> {
        match self {
            DeclineTarget::Natural => Ok(ResolvedDecline::Natural),
            DeclineTarget::Theta { theta } => {
                check_theta(theta)?;
                Ok(ResolvedDecline::Treated { theta })
            }
            DeclineTarget::NominalRate { rate } => {
                if !rate.is_finite() || rate < 0.0 {
                    return Err(ModelError::config(format!(
                        "nominal decline rate must be >= 0, got {rate}"
                    )));
                }
                Ok(match schedule.infer_theta(rate) {
                    Some(theta) => ResolvedDecline::Treated { theta },
                    None => ResolvedDecline::Natural,
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedDecline {
    Natural,
    Treated { theta: f64 },
}

/// Gradual loss of treatment effect once `start_cycle` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waning {
    pub start_cycle: u32,
    pub duration: u32,
    pub target: DeclineTarget,
}

/// Per-cycle decline for one scenario, with waning already resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeclinePlan {
    initial: ResolvedDecline,
    waning: Option<(u32, u32, ResolvedDecline)>,
}

impl DeclinePlan {
    pub fn new(
        schedule: &DeclineSchedule,
        target: DeclineTarget,
        waning: Option<Waning>,
    ) -> Result<Self, ModelError> {
        let initial = target.resolve(schedule)?;
        let waning = match waning {
            Some(w) => Some((w.start_cycle, w.duration, w.target.resolve(schedule)?)),
            None => None,
        };
        Ok(Self { initial, waning })
    }

    pub fn rate(&self, schedule: &DeclineSchedule, cycle: u32, age: u32) -> f64 {
        let initial_rate = schedule.rate(age, self.initial);
        let Some((start, duration, target)) = self.waning else {
            return initial_rate;
        };
        if cycle < start {
            return initial_rate;
        }

        let final_rate = schedule.rate(age, target);
        let elapsed = cycle - start;
        if duration == 0 || elapsed >= duration {
            return final_rate;
        }
        let fraction = elapsed as f64 / duration as f64;
        initial_rate + fraction * (final_rate - initial_rate)
    }
}

fn check_theta(theta: f64) -> Result<(), ModelError> {
    if !theta.is_finite() || !(0.0..=1.0).contains(&theta) {
        return Err(ModelError::config(format!(
            "theta must be within [0, 1], got {theta}"
        )));
    }
    Ok(())
}
