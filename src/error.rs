use thiserror::Error;

/// Errors surfaced by the risk engine.
///
/// Every computation is pure, so none of these are worth retrying: the caller
/// has to fix the inputs or the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    /// Invalid weights, confidence level, portfolio value, window size, ...
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Empty or too-short series for the requested operation
    #[error("Insufficient data for {operation}: need at least {required} observations, got {actual}")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        actual: usize,
    },

    /// Non-finite inputs or moments a distribution cannot be built from
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),

    /// Conditional tail average taken over an empty subset under a strict tail policy
    #[error("Undefined tail average for {method} CVaR: no observations at or below the VaR threshold")]
    UndefinedTailAverage { method: &'static str },
}

impl RiskError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        RiskError::Configuration(message.into())
    }

    pub(crate) fn insufficient(operation: &'static str, required: usize, actual: usize) -> Self {
        RiskError::InsufficientData {
            operation,
            required,
            actual,
        }
    }
}

pub type RiskResult<T> = std::result::Result<T, RiskError>;
