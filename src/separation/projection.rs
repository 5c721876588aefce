//! Scale normalization by projection back onto a reference microphone.
//!
//! Independence-based separation recovers each source only up to a complex
//! scale per bin. Projection back picks, for every (bin, source), the scale
//! that best reproduces the reference channel in the least-squares sense:
//!
//! `z[f, s] = Σ_t conj(ref[t, f]) · Y[t, f, s] / Σ_t |Y[t, f, s]|²`
//!
//! and outputs `Y[t, f, s] · conj(z[f, s])`, which is the source image as
//! heard at the reference microphone.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{Array2, ArrayView3, ArrayViewMut3, Axis, Zip, s};
use num_traits::{One, Zero};
use tracing::warn;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Projection back configuration.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProjectionBack {
    /// Channel of the observation used as the scale reference.
    pub reference_channel: usize,
    /// Upper bound on `|z|`.
    pub clip_up: Option<f64>,
    /// Lower bound on `|z|`.
    pub clip_down: Option<f64>,
}

impl ProjectionBack {
    /// Projection onto `reference_channel` without clipping.
    pub const fn new(reference_channel: usize) -> Self {
        Self {
            reference_channel,
            clip_up: None,
            clip_down: None,
        }
    }

    /// Clamp `|z|` to at most `limit`.
    pub const fn clip_up(mut self, limit: f64) -> Self {
        self.clip_up = Some(limit);
        self
    }

    /// Clamp `|z|` to at least `limit`.
    pub const fn clip_down(mut self, limit: f64) -> Self {
        self.clip_down = Some(limit);
        self
    }

    /// Validate against an observation with `n_chan` channels.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] if the reference channel
    /// does not exist, a bound is not finite and positive, or the lower bound
    /// exceeds the upper one.
    pub fn validate(&self, n_chan: usize) -> SeparationResult<()> {
        if self.reference_channel >= n_chan {
            return Err(SeparationError::invalid_parameter(
                "reference_channel",
                format!(
                    "channel {} does not exist in a {n_chan}-channel observation",
                    self.reference_channel
                ),
            ));
        }
        for (name, bound) in [("clip_up", self.clip_up), ("clip_down", self.clip_down)] {
            if let Some(value) = bound {
                if !(value.is_finite() && value > 0.0) {
                    return Err(SeparationError::invalid_parameter(
                        name,
                        format!("must be finite and > 0, got {value}"),
                    ));
                }
            }
        }
        if let (Some(up), Some(down)) = (self.clip_up, self.clip_down) {
            if down > up {
                return Err(SeparationError::invalid_parameter(
                    "clip_down",
                    format!("lower bound {down} exceeds upper bound {up}"),
                ));
            }
        }
        Ok(())
    }

    /// Compute the projection scalars `z`, shape `(bins, sources)`.
    ///
    /// Bins where a source is silent get `z = 1`.
    ///
    /// # Errors
    /// Returns [`SeparationError::DimensionMismatch`] if `y` and `x` disagree
    /// on frames or bins, or any error from [`ProjectionBack::validate`].
    pub fn scalars(
        &self,
        y: ArrayView3<'_, Complex64>,
        x: ArrayView3<'_, Complex64>,
    ) -> SeparationResult<Array2<Complex64>> {
        let (n_frames, n_bins, n_src) = y.dim();
        let (x_frames, x_bins, x_chan) = x.dim();
        if (n_frames, n_bins) != (x_frames, x_bins) {
            return Err(SeparationError::dimension_mismatch(format!(
                "signal has {n_frames} frames and {n_bins} bins, observation has {x_frames} and {x_bins}"
            )));
        }
        self.validate(x_chan)?;

        let reference = x.index_axis(Axis(2), self.reference_channel);
        let mut z = Array2::<Complex64>::zeros((n_bins, n_src));
        let mut clipped = 0_usize;

        for (f, mut z_f) in z.outer_iter_mut().enumerate() {
            let ref_f = reference.column(f);
            for (s, z_fs) in z_f.iter_mut().enumerate() {
                let y_fs = y.slice(s![.., f, s]);
                let mut numerator = Complex64::zero();
                let mut denominator = 0.0;
                Zip::from(&ref_f).and(&y_fs).for_each(|r, v| {
                    numerator += r.conj() * v;
                    denominator += v.norm_sqr();
                });

                let mut value = if denominator > 0.0 {
                    numerator / denominator
                } else {
                    Complex64::one()
                };
                if let Some(bounded) = self.clamp(value) {
                    value = bounded;
                    clipped += 1;
                }
                *z_fs = value;
            }
        }

        if clipped > 0 {
            warn!(clipped, "projection back scalars clipped");
        }
        Ok(z)
    }

    fn clamp(&self, z: Complex64) -> Option<Complex64> {
        let magnitude = z.norm();
        match (self.clip_up, self.clip_down) {
            (Some(up), _) if magnitude > up => Some(z * (up / magnitude)),
            (_, Some(down)) if magnitude < down => {
                if magnitude > 0.0 {
                    Some(z * (down / magnitude))
                } else {
                    Some(Complex64::new(down, 0.0))
                }
            }
            _ => None,
        }
    }

    /// Rescale `y` in place and return the scalars that were applied.
    ///
    /// # Errors
    /// See [`ProjectionBack::scalars`].
    pub fn apply(
        &self,
        mut y: ArrayViewMut3<'_, Complex64>,
        x: ArrayView3<'_, Complex64>,
    ) -> SeparationResult<Array2<Complex64>> {
        let z = self.scalars(y.view(), x)?;
        for mut y_t in y.outer_iter_mut() {
            Zip::from(&mut y_t).and(&z).for_each(|v, zz| *v *= zz.conj());
        }
        Ok(z)
    }
}

/// Project `y` back onto channel `reference_channel` of `x` in place.
///
/// # Errors
/// See [`ProjectionBack::scalars`].
pub fn projection_back(
    y: ArrayViewMut3<'_, Complex64>,
    x: ArrayView3<'_, Complex64>,
    reference_channel: usize,
) -> SeparationResult<()> {
    ProjectionBack::new(reference_channel)
        .apply(y, x)
        .map(|_| ())
}
