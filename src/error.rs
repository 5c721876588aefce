//! Error types and result utilities for separation operations.

use thiserror::Error;

/// Convenience type alias for results that may contain a [`SeparationError`].
pub type SeparationResult<T> = Result<T, SeparationError>;

/// Error types that can occur while separating a mixture.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeparationError {
    /// Array dimensions do not agree with each other.
    ///
    /// Raised before any iteration starts, e.g. when the demixing tensor has a
    /// different channel count than the observation.
    #[error("Dimension mismatch error: {0}")]
    DimensionMismatch(String),

    /// The frequency support is empty, unsorted, duplicated or out of range.
    #[error("Invalid frequency support: {reason}")]
    InvalidSupport {
        /// Why the support was rejected.
        reason: String,
    },

    /// A configuration value is outside its valid range.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the offending parameter.
        parameter: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The operation only supports a fixed number of channels.
    #[error("Unsupported channel count: expected {expected}, got {actual}")]
    UnsupportedChannelCount {
        /// Channel count the operation requires.
        expected: usize,
        /// Channel count that was supplied.
        actual: usize,
    },

    /// A per-bin linear system was singular or produced a non-positive quadratic form.
    #[error("Singular system at frequency bin {bin}, source column {column}")]
    SingularMatrix {
        /// Frequency bin index.
        bin: usize,
        /// Source (column) index.
        column: usize,
    },

    /// The sparse recovery stage failed to produce a finite filter.
    #[error("Reconstruction failed: {0}")]
    Reconstruction(String),
}

impl SeparationError {
    /// Create a new invalid parameter error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid support error.
    pub fn invalid_support(reason: impl Into<String>) -> Self {
        Self::InvalidSupport {
            reason: reason.into(),
        }
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(message: impl Into<String>) -> Self {
        Self::DimensionMismatch(message.into())
    }

    /// Create a new reconstruction error.
    pub fn reconstruction(message: impl Into<String>) -> Self {
        Self::Reconstruction(message.into())
    }
}
