use proj_models::KeyId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EstimationError>;

#[derive(Debug, Error)]
pub enum EstimationError {
    /// The input lies outside what an estimator is defined for.
    #[error("domain error: {0}")]
    Domain(String),
    /// A formula hit a (near-)zero denominator or produced a non-finite value.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl EstimationError {
    pub(crate) fn invalid_key(key: KeyId) -> Self {
        Self::Domain(format!("key id {key} cannot be used as a Zipf rank"))
    }

    pub(crate) fn empty_series(key: KeyId) -> Self {
        Self::Domain(format!("key {key} has no inter-arrival samples"))
    }

    pub(crate) fn non_positive_mean(key: KeyId) -> Self {
        Self::NumericalInstability(format!("key {key} has a non-positive mean inter-arrival time"))
    }
}

/// Build a [`EstimationError::NumericalInstability`] unless `value` is finite.
pub(crate) fn finite(value: f64, what: impl FnOnce() -> String) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EstimationError::NumericalInstability(what()))
    }
}
