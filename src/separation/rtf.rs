//! Full-band demixing filters from a sparse support, for two microphones.
//!
//! After the solver has run on the support bins, the ratio of the two
//! demixing coefficients of each source is a sample of its relative transfer
//! function (RTF). A [`SparseRecovery`] oracle turns those samples into a
//! short time-domain filter, whose spectrum then fills in every bin.
//!
//! The reassembly `W[k, :, s] = conj([H[k], 1])` is specific to two channels,
//! so [`RtfReconstructor::reconstruct`] rejects any other channel count.

use crate::recovery::{PartialFourier, SparseRecovery};
use crate::support::FrequencySupport;
use crate::{Complex64, SeparationError, SeparationResult, linalg};

use ndarray::{Array1, Array2, Array3, Axis};
use num_traits::One;
use tracing::info;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Result of a reconstruction, one row per source.
#[derive(Debug, Clone, PartialEq)]
pub struct RtfEstimate {
    /// Recovered time-domain filters, shape `(sources, bins - 1)`.
    pub filters: Array2<Complex64>,
    /// Full-band responses, shape `(sources, bins)`.
    pub responses: Array2<Complex64>,
    /// Bins whose measurements were passed to the oracle.
    pub recovery_support: Vec<usize>,
    /// `true` if the Nyquist bin was removed from the measurements.
    pub nyquist_excluded: bool,
}

/// Rebuilds every bin of a two-channel demixing tensor from its support bins.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtfReconstructor {
    /// Number of non-causal taps in the recovered filters.
    pub lead: usize,
}

impl RtfReconstructor {
    /// Reconstructor for causal filters.
    pub const fn new() -> Self {
        Self { lead: 0 }
    }

    /// Allow `lead` non-causal taps.
    pub const fn with_lead(lead: usize) -> Self {
        Self { lead }
    }

    /// Replace every bin of `w` with the response of a filter recovered from
    /// the support bins.
    ///
    /// `w` has shape `(bins, 2, sources)`. On success every bin of `w`, in or
    /// out of the support, has the form `conj([H[k], 1])`. On error `w` is
    /// left untouched.
    ///
    /// # Errors
    /// - [`SeparationError::UnsupportedChannelCount`] unless `w` has two channels
    /// - [`SeparationError::InvalidSupport`] if the support does not fit `w`
    /// - [`SeparationError::SingularMatrix`] if a second-channel coefficient is
    ///   zero or the ratio is not finite
    /// - [`SeparationError::Reconstruction`] if nothing is left to measure or
    ///   the oracle fails
    pub fn reconstruct<R: SparseRecovery + ?Sized>(
        &self,
        w: &mut Array3<Complex64>,
        support: &FrequencySupport,
        oracle: &R,
    ) -> SeparationResult<RtfEstimate> {
        let (n_bins, n_chan, n_src) = w.dim();
        if n_chan != 2 {
            return Err(SeparationError::UnsupportedChannelCount {
                expected: 2,
                actual: n_chan,
            });
        }
        support.check_against(n_bins)?;

        let nyquist = n_bins.saturating_sub(1);
        let nyquist_excluded = support.last() == nyquist;
        let measured: Vec<usize> = if nyquist_excluded {
            support.bins()[..support.len() - 1].to_vec()
        } else {
            support.bins().to_vec()
        };

        let filter_len = n_bins.saturating_sub(1);
        let operator = PartialFourier::new(measured, filter_len, self.lead)?;

        let mut filters = Array2::<Complex64>::zeros((n_src, filter_len));
        let mut responses = Array2::<Complex64>::zeros((n_src, n_bins));

        for s in 0..n_src {
            let measurements = operator
                .support()
                .iter()
                .map(|&f| {
                    let ratio = w[[f, 0, s]] / w[[f, 1, s]];
                    if w[[f, 1, s]].norm() > 0.0 && ratio.re.is_finite() && ratio.im.is_finite() {
                        Ok(ratio.conj())
                    } else {
                        Err(SeparationError::SingularMatrix { bin: f, column: s })
                    }
                })
                .collect::<SeparationResult<Array1<Complex64>>>()?;

            let h = oracle.solve(measurements.view(), &operator)?;
            let response = operator.full_response(h.view(), n_bins)?;
            if !linalg::all_finite(h.iter()) || !linalg::all_finite(response.iter()) {
                return Err(SeparationError::reconstruction(format!(
                    "non-finite filter recovered for source {s}"
                )));
            }
            filters.row_mut(s).assign(&h);
            responses.row_mut(s).assign(&response);
        }

        for (k, mut w_k) in w.axis_iter_mut(Axis(0)).enumerate() {
            for s in 0..n_src {
                w_k[[0, s]] = responses[[s, k]].conj();
                w_k[[1, s]] = Complex64::one();
            }
        }

        info!(
            sources = n_src,
            measured = operator.n_measurements(),
            bins = n_bins,
            nyquist_excluded,
            "rebuilt full-band demixing filters"
        );

        Ok(RtfEstimate {
            filters,
            responses,
            recovery_support: operator.support().to_vec(),
            nyquist_excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::WeightedLasso;
    use ndarray::ArrayView1;
    use std::cell::RefCell;
    use std::f64::consts::PI;

    /// Oracle that records the bins it was asked about and returns a unit tap.
    #[derive(Default)]
    struct RecordingOracle {
        calls: RefCell<Vec<Vec<usize>>>,
    }

    impl SparseRecovery for RecordingOracle {
        fn solve(
            &self,
            measurements: ArrayView1<'_, Complex64>,
            operator: &PartialFourier,
        ) -> SeparationResult<Array1<Complex64>> {
            assert_eq!(measurements.len(), operator.n_measurements());
            self.calls.borrow_mut().push(operator.support().to_vec());
            let mut h = Array1::zeros(operator.filter_len());
            h[1] = Complex64::new(0.5, 0.0);
            Ok(h)
        }
    }

    fn random_like_demixing(n_bins: usize) -> Array3<Complex64> {
        Array3::from_shape_fn((n_bins, 2, 2), |(f, c, s)| {
            let phase = 0.37 * (f * 3 + c * 5 + s * 7) as f64;
            Complex64::from_polar(1.0 + 0.2 * c as f64, phase)
        })
    }

    #[test]
    fn test_nyquist_bin_is_not_measured() {
        let mut w = random_like_demixing(9);
        let support = FrequencySupport::new(vec![1, 3, 5, 8], 9).unwrap();
        let oracle = RecordingOracle::default();

        let estimate = RtfReconstructor::new()
            .reconstruct(&mut w, &support, &oracle)
            .unwrap();

        assert!(estimate.nyquist_excluded);
        assert_eq!(estimate.recovery_support, vec![1, 3, 5]);
        assert_eq!(*oracle.calls.borrow(), vec![vec![1, 3, 5], vec![1, 3, 5]]);

        // every bin, Nyquist included, follows the recovered response
        for k in 0..9 {
            let expected = Complex64::from_polar(0.5, -PI * k as f64 / 8.0);
            for s in 0..2 {
                assert!((w[[k, 0, s]] - expected.conj()).norm() < 1e-12, "bin {k}");
                assert_eq!(w[[k, 1, s]], Complex64::one());
            }
        }
    }

    #[test]
    fn test_support_without_nyquist_is_measured_as_is() {
        let mut w = random_like_demixing(9);
        let support = FrequencySupport::new(vec![0, 2, 4], 9).unwrap();
        let oracle = RecordingOracle::default();
        let estimate = RtfReconstructor::new()
            .reconstruct(&mut w, &support, &oracle)
            .unwrap();
        assert!(!estimate.nyquist_excluded);
        assert_eq!(estimate.recovery_support, vec![0, 2, 4]);
        assert_eq!(estimate.responses.dim(), (2, 9));
        assert_eq!(estimate.filters.dim(), (2, 8));
    }

    #[test]
    fn test_recovers_full_band_response_with_lasso() {
        let n = 32;
        let n_bins = n + 1;
        let taps = [(1, 0.9), (2, 0.2)];
        let response = |k: usize| {
            taps.iter().fold(Complex64::new(0.0, 0.0), |acc, &(t, a)| {
                acc + Complex64::from_polar(a, -PI * (k * t) as f64 / n as f64)
            })
        };

        // a per-bin scale on both channels leaves the ratio unchanged
        let mut w = Array3::from_shape_fn((n_bins, 2, 1), |(k, c, _)| {
            let scale = Complex64::from_polar(1.0 + 0.01 * k as f64, 0.3 * k as f64);
            if c == 0 { response(k).conj() * scale } else { scale }
        });
        let support =
            FrequencySupport::new((0..n_bins).filter(|k| k % 3 != 1).collect(), n_bins).unwrap();
        let oracle = WeightedLasso::new().max_iter(3000);

        RtfReconstructor::new()
            .reconstruct(&mut w, &support, &oracle)
            .unwrap();

        let (err, energy) = (0..n_bins).fold((0.0, 0.0), |(e, en), k| {
            let truth = response(k).conj();
            (e + (w[[k, 0, 0]] - truth).norm_sqr(), en + truth.norm_sqr())
        });
        assert!(err / energy < 1e-2, "relative error {}", err / energy);
    }

    #[test]
    fn test_lead_recovers_noncausal_tap() {
        let n = 32;
        let n_bins = n + 1;
        // lag -1 with gain 0.6 and lag 0 with gain 1.0
        let response = |k: usize| {
            Complex64::from_polar(0.6, PI * k as f64 / n as f64) + Complex64::new(1.0, 0.0)
        };
        let mut w = Array3::from_shape_fn((n_bins, 2, 1), |(k, c, _)| {
            let scale = Complex64::from_polar(0.8, -0.2 * k as f64);
            if c == 0 { response(k).conj() * scale } else { scale }
        });
        let support =
            FrequencySupport::new((0..n_bins).filter(|k| k % 4 != 2).collect(), n_bins).unwrap();
        let oracle = WeightedLasso::new().max_iter(3000);

        let estimate = RtfReconstructor::with_lead(2)
            .reconstruct(&mut w, &support, &oracle)
            .unwrap();

        // tap t sits at lag t - 2
        let h = estimate.filters.row(0);
        assert!((h[1] - Complex64::new(0.6, 0.0)).norm() < 0.1, "h[1] = {}", h[1]);
        assert!((h[2] - Complex64::new(1.0, 0.0)).norm() < 0.1, "h[2] = {}", h[2]);
        let (peak, _) = h
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (t, v)| if v.norm() > best.1 { (t, v.norm()) } else { best });
        assert_eq!(peak, 2);

        let (err, energy) = (0..n_bins).fold((0.0, 0.0), |(e, en), k| {
            let truth = response(k).conj();
            (e + (w[[k, 0, 0]] - truth).norm_sqr(), en + truth.norm_sqr())
        });
        assert!(err / energy < 1e-2, "relative error {}", err / energy);
    }

    #[test]
    fn test_rejects_other_channel_counts() {
        let mut w = Array3::<Complex64>::zeros((9, 3, 3));
        let support = FrequencySupport::full(9).unwrap();
        let err = RtfReconstructor::new()
            .reconstruct(&mut w, &support, &WeightedLasso::new())
            .unwrap_err();
        assert_eq!(
            err,
            SeparationError::UnsupportedChannelCount {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_zero_second_channel_is_singular() {
        let mut w = random_like_demixing(9);
        w[[2, 1, 1]] = Complex64::new(0.0, 0.0);
        let before = w.clone();
        let support = FrequencySupport::new(vec![1, 2, 3], 9).unwrap();
        let err = RtfReconstructor::new()
            .reconstruct(&mut w, &support, &RecordingOracle::default())
            .unwrap_err();
        assert_eq!(err, SeparationError::SingularMatrix { bin: 2, column: 1 });
        assert_eq!(w, before);
    }

    #[test]
    fn test_nyquist_only_support_has_nothing_to_measure() {
        let mut w = random_like_demixing(9);
        let support = FrequencySupport::new(vec![8], 9).unwrap();
        let err = RtfReconstructor::new()
            .reconstruct(&mut w, &support, &RecordingOracle::default())
            .unwrap_err();
        assert!(matches!(err, SeparationError::Reconstruction(_)));
    }
}
