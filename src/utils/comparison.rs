//! Separation quality and similarity utilities.
//!
//! This module provides functions for comparing separated spectrograms with
//! reference signals. All spectrograms are complex `(frames, bins)` arrays,
//! and multi-source tensors are `(frames, bins, sources)`.

use crate::{Complex64, SeparationError, SeparationResult};
use ndarray::{ArrayView2, ArrayView3, Axis};
use num_traits::Zero;

/// Assignment of estimated sources to references.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMatch {
    /// `permutation[r]` is the estimate matched to reference `r`.
    pub permutation: Vec<usize>,
    /// Correlation of each reference with its matched estimate.
    pub correlations: Vec<f64>,
}

impl SourceMatch {
    /// Smallest correlation over all matched pairs.
    pub fn worst(&self) -> f64 {
        self.correlations.iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// Computes the normalized cross-correlation magnitude between two spectrograms.
///
/// The value is `|Σ conj(a) · b| / sqrt(Σ|a|² · Σ|b|²)`, which ranges from 0
/// (orthogonal) to 1 (equal up to a complex scale).
///
/// # Arguments
/// * `a` - First spectrogram
/// * `b` - Second spectrogram
///
/// # Returns
/// Correlation magnitude as f64, or 0.0 if either input is silent
///
/// # Errors
/// Returns an error if the spectrograms have different shapes.
pub fn correlation(
    a: ArrayView2<'_, Complex64>,
    b: ArrayView2<'_, Complex64>,
) -> SeparationResult<f64> {
    if a.dim() != b.dim() {
        return Err(SeparationError::dimension_mismatch(format!(
            "cannot correlate spectrograms of shape {:?} and {:?}",
            a.dim(),
            b.dim()
        )));
    }

    let (mut cross, mut energy_a, mut energy_b) = (Complex64::zero(), 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        cross += x.conj() * y;
        energy_a += x.norm_sqr();
        energy_b += y.norm_sqr();
    }

    let denominator = (energy_a * energy_b).sqrt();
    if denominator == 0.0 {
        return Ok(0.0);
    }
    Ok(cross.norm() / denominator)
}

/// Computes the Mean Squared Error (MSE) between two spectrograms.
///
/// # Errors
/// Returns an error if the spectrograms have different shapes or are empty.
pub fn mse(a: ArrayView2<'_, Complex64>, b: ArrayView2<'_, Complex64>) -> SeparationResult<f64> {
    if a.dim() != b.dim() {
        return Err(SeparationError::dimension_mismatch(
            "spectrograms must have the same shape for MSE",
        ));
    }
    if a.is_empty() {
        return Err(SeparationError::dimension_mismatch("spectrograms are empty"));
    }
    let total: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm_sqr()).sum();
    Ok(total / a.len() as f64)
}

/// Computes the signal-to-distortion ratio of `estimate` against `reference` in dB.
///
/// # Arguments
/// * `reference` - Clean reference spectrogram
/// * `estimate` - Estimated spectrogram
///
/// # Returns
/// SDR in dB (`+inf` for a perfect estimate)
///
/// # Errors
/// Returns an error if the shapes differ or the reference is silent.
pub fn sdr(
    reference: ArrayView2<'_, Complex64>,
    estimate: ArrayView2<'_, Complex64>,
) -> SeparationResult<f64> {
    let error = mse(reference, estimate)?;
    let power = reference.iter().map(|v| v.norm_sqr()).sum::<f64>() / reference.len() as f64;
    if power == 0.0 {
        return Err(SeparationError::invalid_parameter(
            "reference",
            "reference spectrogram is silent",
        ));
    }
    if error == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (power / error).log10())
}

/// Matches estimated sources to references by maximizing the total correlation.
///
/// Separation only recovers sources up to a permutation, so every assignment
/// is scored and the best one is returned.
///
/// # Arguments
/// * `estimates` - Separated signals, `(frames, bins, sources)`
/// * `references` - Reference signals, `(frames, bins, sources)`
///
/// # Errors
/// Returns an error if the tensors have different shapes.
pub fn match_sources(
    estimates: ArrayView3<'_, Complex64>,
    references: ArrayView3<'_, Complex64>,
) -> SeparationResult<SourceMatch> {
    if estimates.dim() != references.dim() {
        return Err(SeparationError::dimension_mismatch(format!(
            "estimates {:?} and references {:?} differ in shape",
            estimates.dim(),
            references.dim()
        )));
    }
    let n_src = estimates.dim().2;

    // scores[r][e]
    let mut scores = vec![vec![0.0; n_src]; n_src];
    for (r, row) in scores.iter_mut().enumerate() {
        let reference = references.index_axis(Axis(2), r);
        for (e, score) in row.iter_mut().enumerate() {
            *score = correlation(reference, estimates.index_axis(Axis(2), e))?;
        }
    }

    let mut best = SourceMatch {
        permutation: (0..n_src).collect(),
        correlations: Vec::new(),
    };
    let mut best_total = f64::NEG_INFINITY;
    let mut candidate: Vec<usize> = (0..n_src).collect();
    for_each_permutation(&mut candidate, 0, &mut |perm| {
        let total: f64 = perm.iter().enumerate().map(|(r, &e)| scores[r][e]).sum();
        if total > best_total {
            best_total = total;
            best.permutation = perm.to_vec();
        }
    });
    best.correlations = best
        .permutation
        .iter()
        .enumerate()
        .map(|(r, &e)| scores[r][e])
        .collect();
    Ok(best)
}

fn for_each_permutation(items: &mut [usize], start: usize, visit: &mut impl FnMut(&[usize])) {
    if start + 1 >= items.len() {
        visit(items);
        return;
    }
    for i in start..items.len() {
        items.swap(start, i);
        for_each_permutation(items, start + 1, visit);
        items.swap(start, i);
    }
}
