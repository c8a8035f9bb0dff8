use thiserror::Error;

use super::types::Stage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Rejected parameter set or scenario definition.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A transition-matrix row summed to zero or to a non-finite value.
    #[error("degenerate transition row for {stage:?} at cycle {cycle}: row sum {sum}")]
    DegenerateRow { cycle: u32, stage: Stage, sum: f64 },

    #[error("invalid sampling distribution: {0}")]
    InvalidDistribution(String),
}

impl ModelError {
    pub fn config(message: impl Into<String>) -> Self {
        ModelError::InvalidConfig(message.into())
    }

    pub fn distribution(message: impl Into<String>) -> Self {
        ModelError::InvalidDistribution(message.into())
    }
}
