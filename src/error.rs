//! Error types for the CLV pipeline

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors produced while estimating customer lifetime value
#[derive(Debug, Error)]
pub enum ClvError {
    /// Malformed input: missing columns, unparseable values, nothing usable left
    #[error("Validation error: {0}")]
    Validation(String),

    /// The run cannot be configured for this input (span too short, bad horizon)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A model fit did not converge to a finite optimum
    #[error("Convergence error: {0}")]
    Convergence(String),

    /// Too few customers qualify for a modelling step
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// K-Means failed inside linfa
    #[error("Clustering error: {0}")]
    Clustering(String),

    /// The chart could not be drawn
    #[error("Render error: {0}")]
    Render(String),

    /// Error from IO operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the CSV engine
    #[error("Polars error: {0}")]
    Polars(String),
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, ClvError>;

impl From<PolarsError> for ClvError {
    fn from(err: PolarsError) -> Self {
        ClvError::Polars(err.to_string())
    }
}

impl ClvError {
    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ClvError::Validation(_) => "validation",
            ClvError::Configuration(_) => "configuration",
            ClvError::Convergence(_) => "convergence",
            ClvError::InsufficientData(_) => "insufficient_data",
            ClvError::Clustering(_) => "clustering",
            ClvError::Render(_) => "render",
            ClvError::Io(_) => "io",
            ClvError::Polars(_) => "polars",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClvError::Configuration("span too short".to_string());
        assert_eq!(err.to_string(), "Configuration error: span too short");
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: ClvError = io_err.into();
        assert_eq!(err.kind(), "io");
        assert!(err.to_string().contains("missing.csv"));
    }
}
