//! Synthetic mixture generation utilities.
//!
//! This module builds convolutive mixtures directly in the short-time
//! frequency domain, for testing and benchmarking the separator without an
//! STFT front end.
//!
//! Some helpers are feature-gated:
//! - Random source generation requires `feature = "random-generation"`.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{Array1, Array3};
use num_traits::Zero;
use std::f64::consts::PI;

#[cfg(feature = "random-generation")]
use rand::rngs::StdRng;
#[cfg(feature = "random-generation")]
use rand::{Rng, SeedableRng};

/// Filter taps `(lag, gain)` for the default first source.
pub const DEFAULT_ECHO_TAPS: [(usize, f64); 2] = [(1, 0.9), (2, 0.2)];

/// Filter taps `(lag, gain)` for the default second source.
pub const DEFAULT_GAIN_TAPS: [(usize, f64); 1] = [(0, 0.5)];

/// Frequency response of a sparse filter on a one-sided grid of `n_bins` bins.
///
/// Evaluates `H[k] = Σ gain · e^{-iπ k lag / (n_bins - 1)}`.
///
/// # Errors
/// Returns an error if `n_bins < 2` or a lag does not fit the filter length.
pub fn sparse_filter_response(
    taps: &[(usize, f64)],
    n_bins: usize,
) -> SeparationResult<Array1<Complex64>> {
    if n_bins < 2 {
        return Err(SeparationError::invalid_parameter(
            "n_bins",
            format!("need at least 2 bins, got {n_bins}"),
        ));
    }
    let n = n_bins - 1;
    if let Some(&(lag, _)) = taps.iter().find(|(lag, _)| *lag >= n) {
        return Err(SeparationError::invalid_parameter(
            "taps",
            format!("lag {lag} does not fit a filter of {n} taps"),
        ));
    }
    Ok(Array1::from_shape_fn(n_bins, |k| {
        taps.iter().fold(Complex64::zero(), |acc, &(lag, gain)| {
            acc + Complex64::from_polar(gain, -PI * (k * lag) as f64 / n as f64)
        })
    }))
}

/// A synthetic two-microphone convolutive mixture.
///
/// Microphone 0 receives every source directly. Microphone 1 receives source
/// `s` through the sparse filter `taps[s]`. The ground truth for separation
/// is the image of each source at microphone 0, which is the source itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutiveMixture {
    /// Microphone signals, shape `(frames, bins, 2)`.
    pub observation: Array3<Complex64>,
    /// Source images at microphone 0, shape `(frames, bins, sources)`.
    pub images: Array3<Complex64>,
    /// Mixing tensor, shape `(bins, 2, sources)`.
    pub mixing: Array3<Complex64>,
}

impl ConvolutiveMixture {
    /// Mix the given sources through the given second-microphone filters.
    ///
    /// # Arguments
    /// * `sources` - Source spectra, `(frames, bins, sources)`
    /// * `taps` - One sparse filter per source for microphone 1
    ///
    /// # Errors
    /// Returns an error if the number of filters differs from the number of
    /// sources, or a filter does not fit the bin count.
    pub fn from_sources(
        sources: Array3<Complex64>,
        taps: &[&[(usize, f64)]],
    ) -> SeparationResult<Self> {
        let (n_frames, n_bins, n_src) = sources.dim();
        if taps.len() != n_src {
            return Err(SeparationError::dimension_mismatch(format!(
                "{} filters supplied for {n_src} sources",
                taps.len()
            )));
        }

        let mut mixing = Array3::<Complex64>::zeros((n_bins, 2, n_src));
        for (s, filter) in taps.iter().enumerate() {
            let response = sparse_filter_response(filter, n_bins)?;
            for f in 0..n_bins {
                mixing[[f, 0, s]] = Complex64::new(1.0, 0.0);
                mixing[[f, 1, s]] = response[f];
            }
        }

        let observation = Array3::from_shape_fn((n_frames, n_bins, 2), |(t, f, c)| {
            (0..n_src).fold(Complex64::zero(), |acc, s| {
                acc + mixing[[f, c, s]] * sources[[t, f, s]]
            })
        });

        Ok(Self {
            observation,
            images: sources,
            mixing,
        })
    }

    /// Number of sources in the mixture.
    pub fn n_sources(&self) -> usize {
        self.images.dim().2
    }
}

/// Generates random source spectra that follow the IVA source model.
///
/// Every frame of source `s` is a complex Gaussian vector across bins scaled
/// by a common activity level drawn once per frame, so the bins of one source
/// share an envelope while different sources are independent.
///
/// # Arguments
/// * `n_frames` - Number of STFT frames
/// * `n_bins` - Number of one-sided frequency bins
/// * `n_sources` - Number of sources
/// * `seed` - Seed of the random generator
#[cfg(feature = "random-generation")]
pub fn random_sources(
    n_frames: usize,
    n_bins: usize,
    n_sources: usize,
    seed: u64,
) -> Array3<Complex64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sources = Array3::<Complex64>::zeros((n_frames, n_bins, n_sources));
    for t in 0..n_frames {
        for s in 0..n_sources {
            // exponential activity, heavy-tailed across frames
            let activity = -(1.0 - rng.random::<f64>()).ln();
            for f in 0..n_bins {
                sources[[t, f, s]] = complex_gaussian(&mut rng) * activity;
            }
        }
    }
    sources
}

#[cfg(feature = "random-generation")]
fn complex_gaussian(rng: &mut StdRng) -> Complex64 {
    // Box-Muller, unit variance split over both components
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let radius = (-u1.ln()).sqrt();
    Complex64::from_polar(radius, 2.0 * PI * u2)
}

#[cfg(feature = "random-generation")]
impl ConvolutiveMixture {
    /// Two sources, two microphones, with the default filters.
    ///
    /// Source 0 reaches microphone 1 through [`DEFAULT_ECHO_TAPS`] and source 1
    /// through [`DEFAULT_GAIN_TAPS`]. The mixing matrix is invertible in every
    /// bin.
    ///
    /// # Errors
    /// Returns an error if `n_bins < 4`.
    pub fn two_by_two(n_frames: usize, n_bins: usize, seed: u64) -> SeparationResult<Self> {
        let sources = random_sources(n_frames, n_bins, 2, seed);
        Self::from_sources(sources, &[&DEFAULT_ECHO_TAPS, &DEFAULT_GAIN_TAPS])
    }
}
