//! Simulator configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Sampled backend '{0}' needs at least one outcome")]
    EmptyDistribution(String),

    #[error("Outcome '{outcome}' has invalid weight {weight}")]
    InvalidWeight { outcome: String, weight: f64 },
}

pub type SimResult<T> = Result<T, SimError>;
