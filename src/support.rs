//! Frequency support sets.
//!
//! A [`FrequencySupport`] is the subset of frequency bins the iterative solver
//! works on. It is always non-empty, strictly ascending and within range of
//! the observation it was validated against.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{ArrayView3, Axis};

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Validated, strictly ascending set of frequency bin indices.
///
/// Deserialized values go through [`FrequencySupport::new`], so they obey
/// the same invariants as constructed ones.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialization", serde(try_from = "RawSupport"))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrequencySupport {
    bins: Vec<usize>,
    n_bins: usize,
}

#[cfg(feature = "serialization")]
#[derive(Deserialize)]
struct RawSupport {
    bins: Vec<usize>,
    n_bins: usize,
}

#[cfg(feature = "serialization")]
impl TryFrom<RawSupport> for FrequencySupport {
    type Error = SeparationError;

    fn try_from(raw: RawSupport) -> SeparationResult<Self> {
        Self::new(raw.bins, raw.n_bins)
    }
}

impl FrequencySupport {
    /// Validate `bins` against a spectrum with `n_bins` bins.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidSupport`] if `bins` is empty, not
    /// strictly ascending, or contains an index `>= n_bins`.
    pub fn new(bins: Vec<usize>, n_bins: usize) -> SeparationResult<Self> {
        if bins.is_empty() {
            return Err(SeparationError::invalid_support("support must not be empty"));
        }
        if bins.len() > n_bins {
            return Err(SeparationError::invalid_support(format!(
                "support has {} entries but the spectrum only has {n_bins} bins",
                bins.len()
            )));
        }
        if let Some(pair) = bins.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(SeparationError::invalid_support(format!(
                "indices must be strictly ascending, found {} followed by {}",
                pair[0], pair[1]
            )));
        }
        // ascending, so the last entry is the maximum
        if let Some(&last) = bins.last() {
            if last >= n_bins {
                return Err(SeparationError::invalid_support(format!(
                    "bin {last} is out of range for {n_bins} bins"
                )));
            }
        }
        Ok(Self { bins, n_bins })
    }

    /// Support covering every bin of an `n_bins` spectrum.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidSupport`] if `n_bins` is zero.
    pub fn full(n_bins: usize) -> SeparationResult<Self> {
        Self::new((0..n_bins).collect(), n_bins)
    }

    /// Select the `floor(bins · ratio)` most energetic bins of an observation.
    ///
    /// The observation is averaged over channels and frames, and the bins are
    /// ranked by the magnitude of that average. At least one bin is always
    /// kept. The returned indices are sorted.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] if `ratio` is not in
    /// `(0, 1]`, or [`SeparationError::InvalidSupport`] for an empty observation.
    pub fn from_energy(x: ArrayView3<'_, Complex64>, ratio: f64) -> SeparationResult<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(SeparationError::invalid_parameter(
                "ratio",
                format!("must be in (0, 1], got {ratio}"),
            ));
        }
        let (_, n_bins, _) = x.dim();
        let average = match x.mean_axis(Axis(2)).and_then(|m| m.mean_axis(Axis(0))) {
            Some(avg) => avg.mapv(|z| z.norm()),
            None => return Err(SeparationError::invalid_support("observation is empty")),
        };

        let keep = ((n_bins as f64 * ratio).floor() as usize).clamp(1, n_bins);
        let mut ranked: Vec<usize> = (0..n_bins).collect();
        // stable sort keeps lower bins first among equal magnitudes
        ranked.sort_by(|&a, &b| average[b].total_cmp(&average[a]));
        ranked.truncate(keep);
        ranked.sort_unstable();

        Self::new(ranked, n_bins)
    }

    /// Bin indices in ascending order.
    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    /// Number of bins in the support.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Always `false`; a validated support is never empty.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Number of bins of the spectrum this support was validated against.
    pub const fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Returns `true` if the support covers every bin.
    pub fn is_full(&self) -> bool {
        self.bins.len() == self.n_bins
    }

    /// Largest bin index in the support.
    pub fn last(&self) -> usize {
        self.bins.last().copied().unwrap_or_default()
    }

    /// Check that this support was built for a spectrum with `n_bins` bins.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidSupport`] if the support was
    /// validated against a different number of bins.
    pub fn check_against(&self, n_bins: usize) -> SeparationResult<()> {
        if self.n_bins != n_bins {
            return Err(SeparationError::invalid_support(format!(
                "support was built for {} bins but the spectrum has {n_bins}",
                self.n_bins
            )));
        }
        Ok(())
    }
}

impl AsRef<[usize]> for FrequencySupport {
    fn as_ref(&self) -> &[usize] {
        &self.bins
    }
}
