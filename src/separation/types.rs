//! Supporting types for the separation pipeline.
//!
//! Configuration enums and the result structures returned by the solver and
//! the pipeline.

use crate::Complex64;
use ndarray::Array3;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// What to do when a per-bin linear system is singular.
///
/// Degenerate observations (e.g. a bin that is silent on every channel) make
/// the auxiliary covariance rank deficient, so the update for that bin has no
/// unique solution.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SingularPolicy {
    /// Stop and return [`crate::SeparationError::SingularMatrix`].
    #[default]
    Abort,
    /// Keep the previous column for that (bin, source), log a warning and
    /// retry on the next epoch.
    Skip,
}

/// Diagnostics collected while separating.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeparationReport {
    /// Number of epochs actually run.
    pub epochs_run: usize,
    /// `true` if a tolerance was set and the demixing change fell below it.
    pub converged: bool,
    /// Relative Frobenius change of the support demixing matrices in the last epoch.
    pub last_change: f64,
    /// Number of (bin, source) updates skipped under [`SingularPolicy::Skip`].
    pub skipped_updates: usize,
    /// `true` if the sparse RTF stage rebuilt the full-band filters.
    pub reconstructed: bool,
    /// `true` if the Nyquist bin was dropped from the recovery measurements.
    pub nyquist_excluded: bool,
}

/// Output of the separation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Separation {
    /// Separated signals, shape `(frames, bins, sources)`.
    pub signals: Array3<Complex64>,
    /// Full-band demixing matrices, shape `(bins, channels, sources)`, when requested.
    pub filters: Option<Array3<Complex64>>,
    /// Run diagnostics.
    pub report: SeparationReport,
}

impl Separation {
    /// Number of separated sources.
    pub fn n_sources(&self) -> usize {
        self.signals.dim().2
    }
}
