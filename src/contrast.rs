//! Contrast functions for the auxiliary-function IVA update.
//!
//! A contrast function `G(r)` scores the broadband activity envelope `r` of
//! a source in one frame. The solver only needs the weight
//! `G'(r) / r`, which scales each frame's contribution to the auxiliary
//! covariance. Frames with a large envelope get a smaller weight, so the
//! choice of contrast controls how strongly loud frames are discounted.

use crate::{SeparationError, SeparationResult};
use ndarray::{Array2, ArrayView2};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Contrast functions available to the separator.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Contrast {
    /// `G(r) = c · r`, the Laplacian source model.
    ///
    /// The weight reduces to `c / r`.
    Norm {
        /// Slope of the contrast.
        c: f64,
    },
    /// `G(r) = m · log(cosh(c · r))`.
    ///
    /// Quadratic for small envelopes and linear for large ones, which bounds
    /// the weight by `c² · m` and makes the update less sensitive to outlier
    /// frames.
    Cosh {
        /// Curvature of the transition between the quadratic and linear regimes.
        c: f64,
        /// Overall scale of the contrast.
        m: f64,
    },
}

impl Default for Contrast {
    fn default() -> Self {
        Self::Norm { c: 1.0 }
    }
}

impl Contrast {
    /// Plain contrast with unit slope.
    pub const fn norm() -> Self {
        Self::Norm { c: 1.0 }
    }

    /// Saturating contrast with unit parameters.
    pub const fn cosh() -> Self {
        Self::Cosh { c: 1.0, m: 1.0 }
    }

    /// Evaluate `G(r)`.
    pub fn value(&self, r: f64) -> f64 {
        match *self {
            Self::Norm { c } => c * r,
            Self::Cosh { c, m } => {
                // ln cosh(a) without overflowing cosh for large arguments
                let a = (c * r).abs();
                m * (a + (-2.0 * a).exp().ln_1p() - std::f64::consts::LN_2)
            }
        }
    }

    /// Evaluate `G'(r)`.
    pub fn derivative(&self, r: f64) -> f64 {
        match *self {
            Self::Norm { c } => c,
            Self::Cosh { c, m } => c * m * (c * r).tanh(),
        }
    }

    /// Evaluate the auxiliary weight `G'(r) / r`.
    ///
    /// `r` must be strictly positive; callers floor the envelope before
    /// calling this.
    pub fn weight(&self, r: f64) -> f64 {
        self.derivative(r) / r
    }

    /// Map an envelope array `(frames, sources)` to its weights.
    ///
    /// Envelope values are floored at `floor` first so that silent frames
    /// produce a large but finite weight.
    pub fn weights(&self, envelope: ArrayView2<'_, f64>, floor: f64) -> Array2<f64> {
        envelope.mapv(|r| self.weight(r.max(floor)))
    }

    /// Check that every parameter is finite and strictly positive.
    pub fn validate(&self) -> SeparationResult<()> {
        let check = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(SeparationError::invalid_parameter(
                    name,
                    format!("contrast parameter must be finite and > 0, got {v}"),
                ))
            }
        };
        match *self {
            Self::Norm { c } => check("contrast.c", c),
            Self::Cosh { c, m } => {
                check("contrast.c", c)?;
                check("contrast.m", m)
            }
        }
    }
}
