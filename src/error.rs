use thiserror::Error;

/// Failures of the filtering core. Every variant aborts the current run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UkfError {
    /// Cholesky factorisation failed: the covariance is not positive definite.
    #[error("{0} is not positive definite")]
    Numerical(&'static str),

    /// A matrix that has to be inverted (Pyy, Pyy + R) is singular.
    #[error("{0} is singular")]
    SingularMatrix(&'static str),

    /// Tuning scalars or noise structures are unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{what}: expected length {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// `update` was called without a `predict` since the previous update.
    #[error("update called without a preceding predict")]
    MissingForecast,
}

pub type Result<T> = std::result::Result<T, UkfError>;
