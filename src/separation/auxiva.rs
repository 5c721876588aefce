//! Auxiliary-function IVA restricted to a frequency support.
//!
//! Each epoch majorizes the IVA objective by a quadratic surrogate built from
//! the current estimate and minimizes it in closed form, one source at a time
//! ("iterative projection"):
//!
//! 1. demix the support bins with the current filters
//! 2. compute the broadband envelope `r[t, s] = sqrt(Σ_{f∈S} |Y[t, f, s]|²)`
//! 3. compute the frame weights `G'(r) / r`
//! 4. build the weighted covariance `V[f, s]` of the observation per bin
//! 5. solve `(W[f]ᴴ V[f, s]) w = e_s`, store `w`, and rescale so `wᴴ V w = 1`
//!
//! The envelope sums over every processed bin, which ties the bins of one
//! source together and prevents frequency-wise permutations.
//!
//! ## References
//!
//! - Ono, N. (2011). "Stable and fast update rules for independent vector
//!   analysis based on auxiliary function technique"

use super::types::{SeparationReport, SingularPolicy};
use crate::contrast::Contrast;
use crate::demix::MixingOperator;
use crate::linalg::{
    self, DEFAULT_PIVOT_TOLERANCE, basis_vector, conj_transpose, quadratic_form, solve,
    weighted_covariance,
};
use crate::support::FrequencySupport;
use crate::{Complex64, SeparationError, SeparationResult};

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use tracing::{debug, warn};

#[cfg(feature = "parallel-processing")]
use rayon::prelude::*;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Working buffers of the iterative solver.
///
/// Owned by the iteration loop and handed to each epoch by `&mut`. The
/// full-band stage takes the demixing tensor by value through
/// [`AuxIvaState::into_demixing`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuxIvaState {
    demixing: Array3<Complex64>,
    signals: Array3<Complex64>,
    envelope: Array2<f64>,
    weights: Array2<f64>,
}

impl AuxIvaState {
    /// Fresh state with identity demixing matrices in every bin.
    pub fn new(n_frames: usize, n_bins: usize, n_chan: usize) -> Self {
        let mut demixing = Array3::<Complex64>::zeros((n_bins, n_chan, n_chan));
        let eye = linalg::identity(n_chan);
        for mut w_f in demixing.outer_iter_mut() {
            w_f.assign(&eye);
        }
        Self {
            demixing,
            signals: Array3::zeros((n_frames, n_bins, n_chan)),
            envelope: Array2::zeros((n_frames, n_chan)),
            weights: Array2::zeros((n_frames, n_chan)),
        }
    }

    /// Fresh state sized for an observation `(frames, bins, channels)`.
    pub fn for_observation(x: ArrayView3<'_, Complex64>) -> Self {
        let (n_frames, n_bins, n_chan) = x.dim();
        Self::new(n_frames, n_bins, n_chan)
    }

    /// Demixing matrices, shape `(bins, channels, sources)`.
    pub fn demixing(&self) -> ArrayView3<'_, Complex64> {
        self.demixing.view()
    }

    /// Separated signal at the support bins as of the last epoch's demix step.
    pub fn signals(&self) -> ArrayView3<'_, Complex64> {
        self.signals.view()
    }

    /// Broadband activity envelope `(frames, sources)` of the last epoch.
    pub fn envelope(&self) -> ArrayView2<'_, f64> {
        self.envelope.view()
    }

    /// Frame weights `G'(r) / r`, shape `(frames, sources)`, of the last epoch.
    pub fn weights(&self) -> ArrayView2<'_, f64> {
        self.weights.view()
    }

    /// Consume the state and keep only the demixing tensor.
    pub fn into_demixing(self) -> Array3<Complex64> {
        self.demixing
    }
}

/// Statistics of a single epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    /// Relative Frobenius change of the support demixing matrices.
    pub change: f64,
    /// Mean over frames of `Σ_s G(r[t, s])` for the envelope of this epoch.
    pub objective: f64,
    /// Number of (bin, source) updates skipped as singular.
    pub skipped: usize,
}

/// Configuration of the iterative solver.
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuxIvaSolver {
    /// Number of epochs to run (upper bound when a tolerance is set).
    pub epochs: usize,
    /// Contrast function driving the frame weights.
    pub contrast: Contrast,
    /// Optional early-stopping tolerance on the relative demixing change.
    pub tolerance: Option<f64>,
    /// Handling of singular per-bin systems.
    pub singular_policy: SingularPolicy,
    /// Relative pivot threshold of the per-bin linear solve.
    pub pivot_tolerance: f64,
    /// Lower bound applied to the envelope before computing weights.
    pub envelope_floor: f64,
}

impl Default for AuxIvaSolver {
    fn default() -> Self {
        Self::new()
    }
}

struct BinUpdate {
    matrix: Array2<Complex64>,
    diff_sqr: f64,
    prev_sqr: f64,
    skipped: usize,
}

impl AuxIvaSolver {
    /// Solver with 20 epochs, the plain contrast and no early stopping.
    pub const fn new() -> Self {
        Self {
            epochs: 20,
            contrast: Contrast::norm(),
            tolerance: None,
            singular_policy: SingularPolicy::Abort,
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
            envelope_floor: 1e-10,
        }
    }

    /// Validate the solver configuration.
    ///
    /// # Errors
    /// Returns [`SeparationError::InvalidParameter`] for a zero epoch count,
    /// invalid contrast parameters, or a non-positive tolerance, pivot
    /// threshold or envelope floor.
    pub fn validate(&self) -> SeparationResult<()> {
        if self.epochs == 0 {
            return Err(SeparationError::invalid_parameter("epochs", "must be > 0"));
        }
        self.contrast.validate()?;
        if let Some(tol) = self.tolerance {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(SeparationError::invalid_parameter(
                    "tolerance",
                    format!("must be finite and > 0, got {tol}"),
                ));
            }
        }
        if !(self.pivot_tolerance.is_finite() && self.pivot_tolerance > 0.0) {
            return Err(SeparationError::invalid_parameter(
                "pivot_tolerance",
                format!("must be finite and > 0, got {}", self.pivot_tolerance),
            ));
        }
        if !(self.envelope_floor.is_finite() && self.envelope_floor > 0.0) {
            return Err(SeparationError::invalid_parameter(
                "envelope_floor",
                format!("must be finite and > 0, got {}", self.envelope_floor),
            ));
        }
        Ok(())
    }

    /// Run up to `epochs` epochs on `state`.
    ///
    /// # Errors
    /// Returns a shape or parameter error before iterating, or
    /// [`SeparationError::SingularMatrix`] under [`SingularPolicy::Abort`].
    pub fn run<M: MixingOperator + ?Sized>(
        &self,
        state: &mut AuxIvaState,
        x: ArrayView3<'_, Complex64>,
        support: &FrequencySupport,
        mixer: &M,
    ) -> SeparationResult<SeparationReport> {
        self.validate()?;
        check_state(state, x, support)?;

        let mut report = SeparationReport::default();
        for epoch in 0..self.epochs {
            let stats = self.epoch(state, x, support, mixer)?;
            report.epochs_run = epoch + 1;
            report.last_change = stats.change;
            report.skipped_updates += stats.skipped;
            debug!(
                epoch,
                change = stats.change,
                objective = stats.objective,
                skipped = stats.skipped,
                "auxiva epoch"
            );

            if self.tolerance.is_some_and(|tol| stats.change < tol) {
                report.converged = true;
                break;
            }
        }
        Ok(report)
    }

    /// Run one epoch on `state`.
    ///
    /// Callers going through [`AuxIvaSolver::run`] get shape validation for
    /// free; direct callers must pass a state built for `x`.
    ///
    /// # Errors
    /// See [`AuxIvaSolver::run`].
    pub fn epoch<M: MixingOperator + ?Sized>(
        &self,
        state: &mut AuxIvaState,
        x: ArrayView3<'_, Complex64>,
        support: &FrequencySupport,
        mixer: &M,
    ) -> SeparationResult<EpochStats> {
        let bins = support.bins();
        mixer.demix(state.signals.view_mut(), x, bins, state.demixing.view())?;

        state.envelope.fill(0.0);
        for &f in bins {
            let y_f = state.signals.index_axis(Axis(1), f);
            Zip::from(&mut state.envelope)
                .and(&y_f)
                .for_each(|r, y| *r += y.norm_sqr());
        }
        state.envelope.mapv_inplace(f64::sqrt);
        state.weights = self
            .contrast
            .weights(state.envelope.view(), self.envelope_floor);
        let objective = state
            .envelope
            .iter()
            .map(|&r| self.contrast.value(r.max(self.envelope_floor)))
            .sum::<f64>()
            / state.envelope.nrows().max(1) as f64;

        let updates = self.update_bins(state, x, bins)?;

        let mut stats = EpochStats {
            objective,
            ..EpochStats::default()
        };
        let (mut diff_sqr, mut prev_sqr) = (0.0, 0.0);
        for (&f, update) in bins.iter().zip(updates) {
            state
                .demixing
                .index_axis_mut(Axis(0), f)
                .assign(&update.matrix);
            diff_sqr += update.diff_sqr;
            prev_sqr += update.prev_sqr;
            stats.skipped += update.skipped;
        }
        stats.change = diff_sqr.sqrt() / prev_sqr.sqrt().max(f64::EPSILON);
        Ok(stats)
    }

    #[cfg(not(feature = "parallel-processing"))]
    fn update_bins(
        &self,
        state: &AuxIvaState,
        x: ArrayView3<'_, Complex64>,
        bins: &[usize],
    ) -> SeparationResult<Vec<BinUpdate>> {
        bins.iter()
            .map(|&f| self.update_bin(state, x, f))
            .collect()
    }

    #[cfg(feature = "parallel-processing")]
    fn update_bins(
        &self,
        state: &AuxIvaState,
        x: ArrayView3<'_, Complex64>,
        bins: &[usize],
    ) -> SeparationResult<Vec<BinUpdate>> {
        // each worker reads shared inputs and owns its own output matrix
        bins.par_iter()
            .map(|&f| self.update_bin(state, x, f))
            .collect()
    }

    fn update_bin(
        &self,
        state: &AuxIvaState,
        x: ArrayView3<'_, Complex64>,
        f: usize,
    ) -> SeparationResult<BinUpdate> {
        let x_f = x.index_axis(Axis(1), f);
        let previous = state.demixing.index_axis(Axis(0), f);
        let mut w_f = previous.to_owned();
        let n_src = w_f.ncols();
        let mut skipped = 0;

        for s in 0..n_src {
            let v = weighted_covariance(x_f, state.weights.column(s));
            let lhs = conj_transpose(w_f.view()).dot(&v);

            let column = solve(lhs.view(), basis_vector(n_src, s).view(), self.pivot_tolerance)
                .and_then(|w| {
                    let q = quadratic_form(v.view(), w.view()).re;
                    (q.is_finite() && q > 0.0).then(|| w.mapv(|z| z / q.sqrt()))
                });

            match (column, self.singular_policy) {
                (Some(w), _) => w_f.column_mut(s).assign(&w),
                (None, SingularPolicy::Abort) => {
                    return Err(SeparationError::SingularMatrix { bin: f, column: s });
                }
                (None, SingularPolicy::Skip) => {
                    warn!(bin = f, source = s, "singular auxiliary system, keeping previous filter");
                    skipped += 1;
                }
            }
        }

        let diff_sqr = linalg::frobenius_norm_sqr((&w_f - &previous).iter());
        let prev_sqr = linalg::frobenius_norm_sqr(previous.iter());
        Ok(BinUpdate {
            matrix: w_f,
            diff_sqr,
            prev_sqr,
            skipped,
        })
    }
}

fn check_state(
    state: &AuxIvaState,
    x: ArrayView3<'_, Complex64>,
    support: &FrequencySupport,
) -> SeparationResult<()> {
    let (n_frames, n_bins, n_chan) = x.dim();
    if n_frames == 0 || n_bins == 0 || n_chan == 0 {
        return Err(SeparationError::dimension_mismatch(format!(
            "observation must be non-empty, got ({n_frames}, {n_bins}, {n_chan})"
        )));
    }
    let (w_bins, w_chan, w_src) = state.demixing.dim();
    if w_chan != w_src {
        return Err(SeparationError::dimension_mismatch(format!(
            "only the determined case is supported, got {w_chan} channels and {w_src} sources"
        )));
    }
    if w_bins != n_bins || w_chan != n_chan || state.signals.dim() != (n_frames, n_bins, w_src) {
        return Err(SeparationError::dimension_mismatch(
            "solver state was not built for this observation",
        ));
    }
    support.check_against(n_bins)
}

#[cfg(all(test, feature = "random-generation"))]
mod tests {
    use super::*;
    use crate::demix::Demix;
    use crate::separation::projection::ProjectionBack;
    use crate::utils::comparison::match_sources;
    use crate::utils::generation::ConvolutiveMixture;
    use ndarray::s;

    fn mixture() -> Array3<Complex64> {
        ConvolutiveMixture::two_by_two(200, 17, 7).unwrap().observation
    }

    #[test]
    fn test_normalization_invariant_after_one_epoch() {
        let x = mixture();
        let support = FrequencySupport::new(vec![1, 2, 5, 8, 11, 16], 17).unwrap();
        let mut state = AuxIvaState::for_observation(x.view());
        let solver = AuxIvaSolver::new();

        solver.epoch(&mut state, x.view(), &support, &Demix).unwrap();

        for &f in support.bins() {
            let x_f = x.index_axis(Axis(1), f);
            let w_f = state.demixing().index_axis(Axis(0), f).to_owned();
            for s in 0..2 {
                let v = weighted_covariance(x_f, state.weights().column(s));
                let q = quadratic_form(v.view(), w_f.column(s));
                assert!((q.re - 1.0).abs() < 1e-8, "bin {f}, source {s}: {q}");
                assert!(q.im.abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_saturating_contrast_separates_and_normalizes() {
        let mixture = ConvolutiveMixture::two_by_two(400, 33, 11).unwrap();
        let x = mixture.observation.view();
        let support = FrequencySupport::full(33).unwrap();
        let mut state = AuxIvaState::for_observation(x);
        let solver = AuxIvaSolver {
            epochs: 60,
            contrast: Contrast::cosh(),
            ..AuxIvaSolver::new()
        };

        let report = solver.run(&mut state, x, &support, &Demix).unwrap();
        assert_eq!(report.epochs_run, 60);
        assert_eq!(report.skipped_updates, 0);

        let stats = solver.epoch(&mut state, x, &support, &Demix).unwrap();
        assert!(stats.objective.is_finite() && stats.objective > 0.0);
        for f in [0, 7, 16, 32] {
            let x_f = x.index_axis(Axis(1), f);
            let w_f = state.demixing().index_axis(Axis(0), f).to_owned();
            for s in 0..2 {
                let v = weighted_covariance(x_f, state.weights().column(s));
                let q = quadratic_form(v.view(), w_f.column(s));
                assert!((q.re - 1.0).abs() < 1e-8, "bin {f}, source {s}: {q}");
            }
        }

        let mut y = Array3::<Complex64>::zeros((400, 33, 2));
        Demix
            .demix(y.view_mut(), x, support.bins(), state.demixing())
            .unwrap();
        ProjectionBack::new(0).apply(y.view_mut(), x).unwrap();
        let matched = match_sources(y.view(), mixture.images.view()).unwrap();
        assert!(matched.worst() > 0.9, "correlations {:?}", matched.correlations);
    }

    #[test]
    fn test_bins_outside_support_keep_identity() {
        let x = mixture();
        let support = FrequencySupport::new(vec![3, 4], 17).unwrap();
        let mut state = AuxIvaState::for_observation(x.view());
        AuxIvaSolver::new()
            .run(&mut state, x.view(), &support, &Demix)
            .unwrap();

        let eye = linalg::identity(2);
        for f in (0..17).filter(|f| !support.bins().contains(f)) {
            assert_eq!(state.demixing().index_axis(Axis(0), f), eye.view());
        }
        assert_ne!(state.demixing().index_axis(Axis(0), 3), eye.view());
    }

    #[test]
    fn test_envelope_sums_support_bins_only() {
        let x = mixture();
        let support = FrequencySupport::new(vec![2, 9], 17).unwrap();
        let mut state = AuxIvaState::for_observation(x.view());
        AuxIvaSolver::new()
            .epoch(&mut state, x.view(), &support, &Demix)
            .unwrap();

        // with identity filters the first demix is the observation itself
        for t in [0, 57, 199] {
            for s in 0..2 {
                let expected = (x[[t, 2, s]].norm_sqr() + x[[t, 9, s]].norm_sqr()).sqrt();
                assert!((state.envelope()[[t, s]] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_tolerance_stops_early() {
        let x = mixture();
        let support = FrequencySupport::full(17).unwrap();
        let mut state = AuxIvaState::for_observation(x.view());
        let solver = AuxIvaSolver {
            epochs: 500,
            tolerance: Some(1e-2),
            ..AuxIvaSolver::new()
        };
        let report = solver.run(&mut state, x.view(), &support, &Demix).unwrap();
        assert!(report.converged);
        assert!(report.epochs_run < 500);
        assert!(report.last_change < 1e-2);
    }

    #[test]
    fn test_silent_bin_abort_and_skip() {
        let mut x = mixture();
        x.slice_mut(s![.., 4, ..]).fill(Complex64::new(0.0, 0.0));
        let support = FrequencySupport::new(vec![1, 4, 6], 17).unwrap();

        let mut state = AuxIvaState::for_observation(x.view());
        let err = AuxIvaSolver::new()
            .run(&mut state, x.view(), &support, &Demix)
            .unwrap_err();
        assert_eq!(err, SeparationError::SingularMatrix { bin: 4, column: 0 });

        let mut state = AuxIvaState::for_observation(x.view());
        let solver = AuxIvaSolver {
            epochs: 3,
            singular_policy: SingularPolicy::Skip,
            ..AuxIvaSolver::new()
        };
        let report = solver.run(&mut state, x.view(), &support, &Demix).unwrap();
        assert_eq!(report.skipped_updates, 3 * 2);
        assert!(linalg::all_finite(state.demixing().iter()));
        assert_eq!(
            state.demixing().index_axis(Axis(0), 4),
            linalg::identity(2).view()
        );
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let x = mixture();
        let support = FrequencySupport::full(17).unwrap();
        let mut state = AuxIvaState::for_observation(x.view());

        let zero_epochs = AuxIvaSolver {
            epochs: 0,
            ..AuxIvaSolver::new()
        };
        assert!(zero_epochs.run(&mut state, x.view(), &support, &Demix).is_err());

        let bad_contrast = AuxIvaSolver {
            contrast: Contrast::Cosh { c: 0.0, m: 1.0 },
            ..AuxIvaSolver::new()
        };
        assert!(bad_contrast.run(&mut state, x.view(), &support, &Demix).is_err());

        let mut wrong_state = AuxIvaState::new(200, 16, 2);
        assert!(matches!(
            AuxIvaSolver::new().run(&mut wrong_state, x.view(), &support, &Demix),
            Err(SeparationError::DimensionMismatch(_))
        ));
    }
}
