//! Linear mixing operator.
//!
//! Applies a per-frequency demixing matrix to the observation tensor:
//! `Y[t, f, s] = Σ_c X[t, f, c] · conj(W[f, c, s])`, i.e. `y = Wᴴ x` in every
//! bin. Only the requested bins of the output are written.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{ArrayView3, ArrayViewMut3, Axis};
use num_traits::Zero;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Capability to apply demixing matrices to an observation.
///
/// The IVA solver only talks to this trait, so alternative operators (e.g. a
/// BLAS-backed or GPU kernel) can be substituted without touching the solver.
pub trait MixingOperator {
    /// Write the demixed signal into `y` at every bin in `bins`.
    ///
    /// `y`: `(frames, bins, sources)`, `x`: `(frames, bins, channels)`,
    /// `w`: `(bins, channels, sources)`.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if the shapes disagree or
    /// a bin is out of range.
    fn demix(
        &self,
        y: ArrayViewMut3<'_, Complex64>,
        x: ArrayView3<'_, Complex64>,
        bins: &[usize],
        w: ArrayView3<'_, Complex64>,
    ) -> SeparationResult<()>;
}

/// Default dense mixing operator.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Demix;

impl MixingOperator for Demix {
    fn demix(
        &self,
        mut y: ArrayViewMut3<'_, Complex64>,
        x: ArrayView3<'_, Complex64>,
        bins: &[usize],
        w: ArrayView3<'_, Complex64>,
    ) -> SeparationResult<()> {
        check_shapes(&y.view(), &x, bins, &w)?;

        for &f in bins {
            let x_f = x.index_axis(Axis(1), f);
            let w_f = w.index_axis(Axis(0), f);
            let mut y_f = y.index_axis_mut(Axis(1), f);

            for (x_t, mut y_t) in x_f.outer_iter().zip(y_f.outer_iter_mut()) {
                for (s, y_ts) in y_t.iter_mut().enumerate() {
                    *y_ts = x_t
                        .iter()
                        .zip(w_f.column(s).iter())
                        .fold(Complex64::zero(), |acc, (xc, wc)| acc + xc * wc.conj());
                }
            }
        }
        Ok(())
    }
}

/// Apply [`Demix`] to `bins`.
///
/// # Errors
/// See [`MixingOperator::demix`].
pub fn demix(
    y: ArrayViewMut3<'_, Complex64>,
    x: ArrayView3<'_, Complex64>,
    bins: &[usize],
    w: ArrayView3<'_, Complex64>,
) -> SeparationResult<()> {
    Demix.demix(y, x, bins, w)
}

fn check_shapes(
    y: &ArrayView3<'_, Complex64>,
    x: &ArrayView3<'_, Complex64>,
    bins: &[usize],
    w: &ArrayView3<'_, Complex64>,
) -> SeparationResult<()> {
    let (x_frames, x_bins, x_chan) = x.dim();
    let (y_frames, y_bins, y_src) = y.dim();
    let (w_bins, w_chan, w_src) = w.dim();

    if w_chan != x_chan {
        return Err(SeparationError::dimension_mismatch(format!(
            "demixing matrices have {w_chan} channels but the observation has {x_chan}"
        )));
    }
    if w_src != y_src {
        return Err(SeparationError::dimension_mismatch(format!(
            "demixing matrices have {w_src} sources but the output buffer has {y_src}"
        )));
    }
    if y_frames != x_frames || y_bins != x_bins {
        return Err(SeparationError::dimension_mismatch(format!(
            "output buffer is ({y_frames}, {y_bins}) frames x bins, observation is ({x_frames}, {x_bins})"
        )));
    }
    if w_bins != x_bins {
        return Err(SeparationError::dimension_mismatch(format!(
            "demixing tensor covers {w_bins} bins, observation has {x_bins}"
        )));
    }
    if let Some(&bad) = bins.iter().find(|&&f| f >= x_bins) {
        return Err(SeparationError::dimension_mismatch(format!(
            "bin {bad} is out of range for {x_bins} bins"
        )));
    }
    Ok(())
}
