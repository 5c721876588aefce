//! Sparse time-domain recovery from partial frequency measurements.
//!
//! The RTF reconstructor only knows the relative transfer function at the
//! support bins. Recovering the full-band response is an under-determined
//! inverse problem, made well posed by assuming the time-domain filter is
//! short. The reconstructor delegates the solve to a [`SparseRecovery`]
//! implementation, so the solver can be swapped without touching the IVA core.
//!
//! - [`fourier`] - the partial Fourier sampling operator
//! - [`lasso`] - weighted LASSO solver, the default oracle

pub mod fourier;
pub mod lasso;

pub use fourier::PartialFourier;
pub use lasso::WeightedLasso;

use crate::{Complex64, SeparationResult};
use ndarray::{Array1, ArrayView1};

/// Capability to recover a sparse time-domain filter from partial spectra.
pub trait SparseRecovery {
    /// Find `h` of length `operator.filter_len()` such that
    /// `operator.apply(h) ≈ measurements` and `h` is sparse/short in time.
    ///
    /// `measurements[i]` is the response at `operator.support()[i]`.
    ///
    /// # Errors
    /// Returns [`crate::SeparationError::Reconstruction`] if no finite solution
    /// can be produced.
    fn solve(
        &self,
        measurements: ArrayView1<'_, Complex64>,
        operator: &PartialFourier,
    ) -> SeparationResult<Array1<Complex64>>;
}

impl<R: SparseRecovery + ?Sized> SparseRecovery for &R {
    fn solve(
        &self,
        measurements: ArrayView1<'_, Complex64>,
        operator: &PartialFourier,
    ) -> SeparationResult<Array1<Complex64>> {
        (**self).solve(measurements, operator)
    }
}

impl<R: SparseRecovery + ?Sized> SparseRecovery for Box<R> {
    fn solve(
        &self,
        measurements: ArrayView1<'_, Complex64>,
        operator: &PartialFourier,
    ) -> SeparationResult<Array1<Complex64>> {
        (**self).solve(measurements, operator)
    }
}
