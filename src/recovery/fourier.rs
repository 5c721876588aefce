//! Partial Fourier sampling operator.
//!
//! Relates a time-domain filter `h` of length `n` to its response on the
//! one-sided frequency grid of a `2n`-point transform:
//!
//! `H[k] = Σ_{t<n} h[t] · e^{-iπ k (t - lead) / n}`
//!
//! `lead` shifts the time origin so that the first `lead` taps model
//! non-causal (negative-lag) coefficients. Bin `k` of this grid matches
//! bin `k` of a one-sided spectrum with `n + 1` bins, including the Nyquist
//! bin at `k = n`.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{Array1, ArrayView1};
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Partial Fourier operator `A: C^n -> C^{|S|}` and its adjoint.
#[derive(Clone)]
pub struct PartialFourier {
    support: Vec<usize>,
    filter_len: usize,
    lead: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for PartialFourier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialFourier")
            .field("support", &self.support)
            .field("filter_len", &self.filter_len)
            .field("lead", &self.lead)
            .finish()
    }
}

impl PartialFourier {
    /// Build the operator for a filter of `filter_len` taps sampled at `support`.
    ///
    /// # Errors
    /// Returns [`SeparationError::Reconstruction`] if `filter_len` is zero,
    /// `lead >= filter_len`, the support is empty, or a support index is
    /// outside the `2 · filter_len` grid.
    pub fn new(support: Vec<usize>, filter_len: usize, lead: usize) -> SeparationResult<Self> {
        if filter_len == 0 {
            return Err(SeparationError::reconstruction("filter length must be > 0"));
        }
        if lead >= filter_len {
            return Err(SeparationError::reconstruction(format!(
                "lead {lead} must be smaller than the filter length {filter_len}"
            )));
        }
        if support.is_empty() {
            return Err(SeparationError::reconstruction(
                "no frequency measurements available for recovery",
            ));
        }
        let grid = 2 * filter_len;
        if let Some(&bad) = support.iter().find(|&&k| k >= grid) {
            return Err(SeparationError::reconstruction(format!(
                "frequency index {bad} is outside the {grid}-point grid"
            )));
        }

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(grid);
        let inverse = planner.plan_fft_inverse(grid);

        Ok(Self {
            support,
            filter_len,
            lead,
            forward,
            inverse,
        })
    }

    /// Frequency indices sampled by the operator.
    pub fn support(&self) -> &[usize] {
        &self.support
    }

    /// Number of taps of the time-domain filter.
    pub const fn filter_len(&self) -> usize {
        self.filter_len
    }

    /// Number of non-causal taps at the start of the filter.
    pub const fn lead(&self) -> usize {
        self.lead
    }

    /// Number of measurements, `|S|`.
    pub fn n_measurements(&self) -> usize {
        self.support.len()
    }

    fn phase(&self, k: usize) -> Complex64 {
        // e^{+iπ k lead / n}
        Complex64::from_polar(1.0, PI * (k * self.lead) as f64 / self.filter_len as f64)
    }

    fn spectrum(&self, h: ArrayView1<'_, Complex64>) -> Vec<Complex64> {
        let mut buffer = vec![Complex64::new(0.0, 0.0); 2 * self.filter_len];
        for (slot, &tap) in buffer.iter_mut().zip(h.iter()) {
            *slot = tap;
        }
        self.forward.process(&mut buffer);
        buffer
    }

    /// Apply `A`: evaluate the response of `h` at the support bins.
    ///
    /// # Panics
    /// Panics if `h.len() != filter_len`.
    pub fn apply(&self, h: ArrayView1<'_, Complex64>) -> Array1<Complex64> {
        assert_eq!(h.len(), self.filter_len, "filter length mismatch");
        let buffer = self.spectrum(h);
        self.support
            .iter()
            .map(|&k| buffer[k] * self.phase(k))
            .collect()
    }

    /// Apply `Aᴴ`: map measurement-domain residuals back to filter taps.
    ///
    /// # Panics
    /// Panics if `r.len() != |S|`.
    pub fn adjoint(&self, r: ArrayView1<'_, Complex64>) -> Array1<Complex64> {
        assert_eq!(r.len(), self.support.len(), "measurement length mismatch");
        let mut buffer = vec![Complex64::new(0.0, 0.0); 2 * self.filter_len];
        for (&k, &value) in self.support.iter().zip(r.iter()) {
            buffer[k] += value * self.phase(k).conj();
        }
        // unnormalized inverse transform: Σ_k b[k] e^{+2πi k t / 2n}
        self.inverse.process(&mut buffer);
        buffer.truncate(self.filter_len);
        Array1::from_vec(buffer)
    }

    /// Evaluate the response of `h` on bins `0..n_bins` of the grid.
    ///
    /// # Errors
    /// Returns [`SeparationError::Reconstruction`] if `h` has the wrong
    /// length or `n_bins` exceeds the `2 · filter_len` grid.
    pub fn full_response(
        &self,
        h: ArrayView1<'_, Complex64>,
        n_bins: usize,
    ) -> SeparationResult<Array1<Complex64>> {
        if h.len() != self.filter_len {
            return Err(SeparationError::reconstruction(format!(
                "recovered filter has {} taps, expected {}",
                h.len(),
                self.filter_len
            )));
        }
        if n_bins > 2 * self.filter_len {
            return Err(SeparationError::reconstruction(format!(
                "{n_bins} bins requested from a {}-point grid",
                2 * self.filter_len
            )));
        }
        let buffer = self.spectrum(h);
        Ok((0..n_bins).map(|k| buffer[k] * self.phase(k)).collect())
    }

    /// Upper bound on `‖A‖²`, the Lipschitz constant of `∇ ½‖A h − g‖²`.
    ///
    /// The unnormalized `2n`-point DFT has `‖F‖² = 2n` and restricting rows or
    /// columns cannot increase it; the Frobenius norm gives `|S| · n`.
    pub fn lipschitz(&self) -> f64 {
        let n = self.filter_len;
        (2 * n).min(self.support.len() * n) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(n: usize) -> Array1<Complex64> {
        Array1::from_shape_fn(n, |t| Complex64::new((t as f64 * 0.9).sin(), (t as f64 * 0.4).cos()))
    }

    fn direct_response(h: &Array1<Complex64>, k: usize, lead: usize) -> Complex64 {
        let n = h.len();
        h.iter().enumerate().fold(Complex64::new(0.0, 0.0), |acc, (t, &tap)| {
            let angle = -PI * k as f64 * (t as f64 - lead as f64) / n as f64;
            acc + tap * Complex64::from_polar(1.0, angle)
        })
    }

    #[test]
    fn test_apply_matches_direct_sum() {
        let h = filter(8);
        for lead in [0, 3] {
            let op = PartialFourier::new(vec![0, 2, 5, 8], 8, lead).unwrap();
            let measured = op.apply(h.view());
            for (&k, got) in op.support().iter().zip(measured.iter()) {
                let want = direct_response(&h, k, lead);
                assert!((got - want).norm() < 1e-10, "bin {k}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn test_adjoint_identity() {
        let op = PartialFourier::new(vec![1, 2, 4, 7, 8], 8, 2).unwrap();
        let h = filter(8);
        let r = Array1::from_shape_fn(5, |i| Complex64::new(i as f64 - 1.5, 0.3 * i as f64));

        let ah = op.apply(h.view());
        let ahr = op.adjoint(r.view());
        // <A h, r> == <h, Aᴴ r>
        let lhs: Complex64 = ah.iter().zip(r.iter()).map(|(a, b)| b.conj() * a).sum();
        let rhs: Complex64 = h.iter().zip(ahr.iter()).map(|(a, b)| b.conj() * a).sum();
        assert!((lhs - rhs).norm() < 1e-9, "{lhs} vs {rhs}");
    }

    #[test]
    fn test_full_response_covers_nyquist() {
        let h = filter(6);
        let op = PartialFourier::new(vec![0, 1], 6, 0).unwrap();
        let full = op.full_response(h.view(), 7).unwrap();
        assert_eq!(full.len(), 7);
        for k in 0..7 {
            assert!((full[k] - direct_response(&h, k, 0)).norm() < 1e-10);
        }
        assert!(op.full_response(h.view(), 13).is_err());
    }

    #[test]
    fn test_lipschitz_bounds_operator_norm() {
        let op = PartialFourier::new((0..9).collect(), 8, 0).unwrap();
        let lip = op.lipschitz();
        assert_eq!(lip, 16.0);

        let h = filter(8);
        let ah = op.apply(h.view());
        let gain = ah.iter().map(|z| z.norm_sqr()).sum::<f64>()
            / h.iter().map(|z| z.norm_sqr()).sum::<f64>();
        assert!(gain <= lip * (1.0 + 1e-9));
    }

    #[test]
    fn test_invalid_operators_are_rejected() {
        assert!(PartialFourier::new(vec![0], 0, 0).is_err());
        assert!(PartialFourier::new(vec![], 4, 0).is_err());
        assert!(PartialFourier::new(vec![8], 4, 0).is_err());
        assert!(PartialFourier::new(vec![1], 4, 4).is_err());
    }
}
