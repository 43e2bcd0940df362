//! Error types for starfit.
//!
//! Everything detectable is raised before the parallel evaluation phase;
//! nothing is recovered mid-block, since partial sums inside a block are not
//! individually meaningful until reduced.

use thiserror::Error;

/// starfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error (PSF calibration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed input that is not a ceiling problem (bad lengths,
    /// non-finite parameters, empty grids)
    #[error("configuration error: {0}")]
    Config(String),

    /// A hard resource ceiling or the per-block memory budget was exceeded
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Non-positive-definite or non-finite covariance while building an
    /// image Gaussian
    #[error("degenerate covariance: {0}")]
    Degenerate(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
