//! Error types for fund simulation

use thiserror::Error;

/// Errors raised by the simulation core
///
/// Only configuration and structural problems surface as errors. Numerical
/// degeneracies (non-converging IRR, zero variance) are absorbed and reported
/// as data on the relevant result types.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid fund configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("invalid loan: {0}")]
    InvalidLoan(String),

    #[error("invalid distribution parameters: {0}")]
    InvalidDistribution(String),

    #[error("portfolio generation impossible: {0}")]
    Generation(String),

    #[error("leverage rule error: {0}")]
    LeverageRule(String),

    #[error("zone dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimulationError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        SimulationError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimulationError>;
