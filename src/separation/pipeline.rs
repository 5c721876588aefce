//! End-to-end separation: solver, full-band reconstruction, projection back.
//!
//! [`SparseAuxIva`] is the configurable entry point and [`sparse_auxiva`] is
//! the one-call version with default settings.

use super::auxiva::{AuxIvaSolver, AuxIvaState};
use super::projection::ProjectionBack;
use super::rtf::RtfReconstructor;
use super::types::{Separation, SingularPolicy};
use crate::contrast::Contrast;
use crate::demix::{Demix, MixingOperator};
use crate::recovery::{SparseRecovery, WeightedLasso};
use crate::support::FrequencySupport;
use crate::{Complex64, SeparationError, SeparationResult};

use ndarray::{Array3, ArrayView3};
use tracing::info;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Builder for the sparse AuxIVA separation pipeline.
///
/// The pipeline runs the iterative solver on the support bins, optionally
/// rebuilds the remaining bins from sparse relative transfer functions,
/// demixes the full band and optionally fixes the scale by projection back.
///
/// # Example
/// ```rust,ignore
/// use sparse_auxiva::{FrequencySupport, SparseAuxIva};
///
/// let support = FrequencySupport::from_energy(x.view(), 0.8)?;
/// let separation = SparseAuxIva::new()
///     .epochs(50)
///     .return_filters(true)
///     .separate(x.view(), &support)?;
/// ```
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SparseAuxIva<R = WeightedLasso, M = Demix> {
    solver: AuxIvaSolver,
    projection: Option<ProjectionBack>,
    return_filters: bool,
    sparse_reconstruction: bool,
    rtf: RtfReconstructor,
    recovery: R,
    mixer: M,
}

impl Default for SparseAuxIva {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseAuxIva {
    /// Create a pipeline with the default configuration.
    ///
    /// 20 epochs of the plain contrast, sparse reconstruction with
    /// [`WeightedLasso`], projection back onto channel 0, no filters returned.
    pub const fn new() -> Self {
        Self {
            solver: AuxIvaSolver::new(),
            projection: Some(ProjectionBack::new(0)),
            return_filters: false,
            sparse_reconstruction: true,
            rtf: RtfReconstructor::new(),
            recovery: WeightedLasso::new(),
            mixer: Demix,
        }
    }
}

impl<R, M> SparseAuxIva<R, M> {
    /// Set the number of solver epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.solver.epochs = epochs;
        self
    }

    /// Set the contrast function.
    pub fn contrast(mut self, contrast: Contrast) -> Self {
        self.solver.contrast = contrast;
        self
    }

    /// Stop early once the relative demixing change falls below `tolerance`.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.solver.tolerance = Some(tolerance);
        self
    }

    /// Set the handling of singular per-bin systems.
    pub fn singular_policy(mut self, policy: SingularPolicy) -> Self {
        self.solver.singular_policy = policy;
        self
    }

    /// Replace the whole solver configuration.
    pub fn solver(mut self, solver: AuxIvaSolver) -> Self {
        self.solver = solver;
        self
    }

    /// Configure projection back, or disable it with `None`.
    pub fn projection_back(mut self, projection: Option<ProjectionBack>) -> Self {
        self.projection = projection;
        self
    }

    /// Include the full-band demixing tensor in the output.
    pub fn return_filters(mut self, enabled: bool) -> Self {
        self.return_filters = enabled;
        self
    }

    /// Enable or disable the full-band RTF reconstruction.
    ///
    /// When disabled, bins outside the support keep identity demixing
    /// matrices.
    pub fn sparse_reconstruction(mut self, enabled: bool) -> Self {
        self.sparse_reconstruction = enabled;
        self
    }

    /// Allow `lead` non-causal taps in the recovered filters.
    pub fn rtf_lead(mut self, lead: usize) -> Self {
        self.rtf = RtfReconstructor::with_lead(lead);
        self
    }

    /// Use a different sparse recovery oracle.
    pub fn with_recovery<R2>(self, recovery: R2) -> SparseAuxIva<R2, M> {
        SparseAuxIva {
            solver: self.solver,
            projection: self.projection,
            return_filters: self.return_filters,
            sparse_reconstruction: self.sparse_reconstruction,
            rtf: self.rtf,
            recovery,
            mixer: self.mixer,
        }
    }

    /// Use a different mixing operator.
    pub fn with_mixer<M2>(self, mixer: M2) -> SparseAuxIva<R, M2> {
        SparseAuxIva {
            solver: self.solver,
            projection: self.projection,
            return_filters: self.return_filters,
            sparse_reconstruction: self.sparse_reconstruction,
            rtf: self.rtf,
            recovery: self.recovery,
            mixer,
        }
    }

    /// Current solver configuration.
    pub const fn solver_config(&self) -> &AuxIvaSolver {
        &self.solver
    }
}

impl<R: SparseRecovery, M: MixingOperator> SparseAuxIva<R, M> {
    /// Check the configuration against an observation and support.
    ///
    /// # Errors
    /// Returns the first failing check, in this order: empty observation,
    /// support built for a different spectrum, epochs, contrast and other solver parameters,
    /// channel count for the sparse stage, projection reference channel.
    pub fn validate(
        &self,
        x: ArrayView3<'_, Complex64>,
        support: &FrequencySupport,
    ) -> SeparationResult<()> {
        check_observation(x)?;
        let (_, n_bins, n_chan) = x.dim();
        support.check_against(n_bins)?;
        self.solver.validate()?;
        if self.sparse_reconstruction && n_chan != 2 {
            return Err(SeparationError::UnsupportedChannelCount {
                expected: 2,
                actual: n_chan,
            });
        }
        if let Some(projection) = &self.projection {
            projection.validate(n_chan)?;
        }
        Ok(())
    }

    /// Separate `x`, shape `(frames, bins, channels)`, using the bins of `support`.
    ///
    /// # Errors
    /// Any error from [`SparseAuxIva::validate`], a singular bin under
    /// [`SingularPolicy::Abort`], or a failed reconstruction.
    pub fn separate(
        &self,
        x: ArrayView3<'_, Complex64>,
        support: &FrequencySupport,
    ) -> SeparationResult<Separation> {
        self.validate(x, support)?;
        let (n_frames, n_bins, n_chan) = x.dim();
        info!(
            frames = n_frames,
            bins = n_bins,
            channels = n_chan,
            support = support.len(),
            epochs = self.solver.epochs,
            "starting sparse auxiva"
        );

        let mut state = AuxIvaState::for_observation(x);
        let mut report = self.solver.run(&mut state, x, support, &self.mixer)?;
        let mut demixing = state.into_demixing();

        if self.sparse_reconstruction {
            let estimate = self
                .rtf
                .reconstruct(&mut demixing, support, &self.recovery)?;
            report.reconstructed = true;
            report.nyquist_excluded = estimate.nyquist_excluded;
        }

        let mut signals = Array3::<Complex64>::zeros((n_frames, n_bins, n_chan));
        let all_bins: Vec<usize> = (0..n_bins).collect();
        self.mixer
            .demix(signals.view_mut(), x, &all_bins, demixing.view())?;

        if let Some(projection) = &self.projection {
            projection.apply(signals.view_mut(), x)?;
        }

        info!(
            epochs_run = report.epochs_run,
            converged = report.converged,
            last_change = report.last_change,
            skipped = report.skipped_updates,
            reconstructed = report.reconstructed,
            "sparse auxiva finished"
        );

        Ok(Separation {
            signals,
            filters: self.return_filters.then_some(demixing),
            report,
        })
    }
}

fn check_observation(x: ArrayView3<'_, Complex64>) -> SeparationResult<()> {
    let (n_frames, n_bins, n_chan) = x.dim();
    if n_frames == 0 || n_bins == 0 || n_chan == 0 {
        return Err(SeparationError::dimension_mismatch(format!(
            "observation must be non-empty, got ({n_frames}, {n_bins}, {n_chan})"
        )));
    }
    Ok(())
}

/// Separate a determined mixture with sparse AuxIVA.
///
/// Runs `epochs` solver epochs on the bins in `support`, then (if `lasso` is
/// set) rebuilds the full band from sparse relative transfer functions, and
/// (if `proj_back` is set) projects the output onto channel 0.
///
/// # Arguments
/// * `x` - Observation, `(frames, bins, channels)`
/// * `support` - Ascending bin indices processed by the solver
/// * `epochs` - Number of solver epochs
/// * `proj_back` - Fix the scale by projection back
/// * `return_filters` - Include the demixing tensor in the output
/// * `lasso` - Enable the full-band RTF reconstruction (two channels only)
///
/// # Errors
/// See [`SparseAuxIva::separate`]. An invalid support gives
/// [`SeparationError::InvalidSupport`].
pub fn sparse_auxiva(
    x: ArrayView3<'_, Complex64>,
    support: &[usize],
    epochs: usize,
    proj_back: bool,
    return_filters: bool,
    lasso: bool,
) -> SeparationResult<Separation> {
    check_observation(x)?;
    let support = FrequencySupport::new(support.to_vec(), x.dim().1)?;
    SparseAuxIva::new()
        .epochs(epochs)
        .projection_back(proj_back.then(|| ProjectionBack::new(0)))
        .return_filters(return_filters)
        .sparse_reconstruction(lasso)
        .separate(x, &support)
}

#[cfg(all(test, feature = "random-generation"))]
mod tests {
    use super::*;
    use crate::utils::comparison::match_sources;
    use crate::utils::generation::{ConvolutiveMixture, random_sources};
    use crate::recovery::PartialFourier;
    use ndarray::{Array1, ArrayView1};

    #[test]
    fn test_recovers_sources_from_sparse_support() {
        let mixture = ConvolutiveMixture::two_by_two(400, 65, 2024).unwrap();
        let x = mixture.observation.view();
        let support = FrequencySupport::from_energy(x, 0.8).unwrap();

        let separation = SparseAuxIva::new()
            .epochs(50)
            .return_filters(true)
            .separate(x, &support)
            .unwrap();

        assert!(separation.report.reconstructed);
        assert_eq!(separation.report.epochs_run, 50);
        assert_eq!(separation.filters.as_ref().map(|w| w.dim()), Some((65, 2, 2)));

        let matched = match_sources(separation.signals.view(), mixture.images.view()).unwrap();
        assert!(
            matched.worst() > 0.9,
            "correlations {:?}",
            matched.correlations
        );
    }

    #[test]
    fn test_saturating_contrast_with_noncausal_filters() {
        let mixture = ConvolutiveMixture::two_by_two(400, 65, 77).unwrap();
        let x = mixture.observation.view();
        let support = FrequencySupport::from_energy(x, 0.8).unwrap();

        let pipeline = SparseAuxIva::new()
            .epochs(50)
            .contrast(Contrast::cosh())
            .rtf_lead(2);
        assert_eq!(pipeline.solver_config().contrast, Contrast::cosh());
        let separation = pipeline.separate(x, &support).unwrap();

        assert!(separation.report.reconstructed);
        let matched = match_sources(separation.signals.view(), mixture.images.view()).unwrap();
        assert!(
            matched.worst() > 0.9,
            "correlations {:?}",
            matched.correlations
        );
    }

    #[test]
    fn test_full_support_without_reconstruction_is_plain_auxiva() {
        let mixture = ConvolutiveMixture::two_by_two(120, 9, 5).unwrap();
        let x = mixture.observation.view();
        let support = FrequencySupport::full(9).unwrap();

        let separation = SparseAuxIva::new()
            .epochs(10)
            .sparse_reconstruction(false)
            .return_filters(true)
            .separate(x, &support)
            .unwrap();

        let solver = AuxIvaSolver {
            epochs: 10,
            ..AuxIvaSolver::new()
        };
        let mut state = AuxIvaState::for_observation(x);
        solver.run(&mut state, x, &support, &Demix).unwrap();
        let mut expected = Array3::<Complex64>::zeros((120, 9, 2));
        Demix
            .demix(expected.view_mut(), x, support.bins(), state.demixing())
            .unwrap();
        ProjectionBack::new(0).apply(expected.view_mut(), x).unwrap();

        assert!(!separation.report.reconstructed);
        assert_eq!(separation.filters.as_ref(), Some(&state.into_demixing()));
        for (a, b) in separation.signals.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_free_function_matches_builder() {
        let mixture = ConvolutiveMixture::two_by_two(80, 17, 9).unwrap();
        let x = mixture.observation.view();
        let bins: Vec<usize> = (0..17).filter(|f| f % 4 != 3).collect();

        let direct = sparse_auxiva(x, &bins, 5, true, false, true).unwrap();
        let support = FrequencySupport::new(bins, 17).unwrap();
        let built = SparseAuxIva::new().epochs(5).separate(x, &support).unwrap();

        assert!(direct.filters.is_none());
        assert_eq!(direct, built);
        assert!(direct.report.nyquist_excluded);
    }

    #[test]
    fn test_custom_recovery_oracle() {
        struct DirectPath;

        impl SparseRecovery for DirectPath {
            fn solve(
                &self,
                _measurements: ArrayView1<'_, Complex64>,
                operator: &PartialFourier,
            ) -> SeparationResult<Array1<Complex64>> {
                let mut h = Array1::zeros(operator.filter_len());
                h[0] = Complex64::new(-1.0, 0.0);
                Ok(h)
            }
        }

        let mixture = ConvolutiveMixture::two_by_two(60, 9, 3).unwrap();
        let support = FrequencySupport::new(vec![1, 2, 3], 9).unwrap();
        let separation = SparseAuxIva::new()
            .epochs(3)
            .projection_back(None)
            .return_filters(true)
            .with_recovery(Box::new(DirectPath) as Box<dyn SparseRecovery>)
            .separate(mixture.observation.view(), &support)
            .unwrap();

        // W = conj([-1, 1]) in every bin, so every output is x1 - x0
        let x = &mixture.observation;
        for ((t, f, _), y) in separation.signals.indexed_iter() {
            assert!((y - (x[[t, f, 1]] - x[[t, f, 0]])).norm() < 1e-12);
        }
    }

    #[test]
    fn test_validation_errors() {
        let mixture = ConvolutiveMixture::two_by_two(20, 9, 1).unwrap();
        let x = mixture.observation.view();

        let empty = Array3::<Complex64>::zeros((0, 9, 2));
        assert!(matches!(
            sparse_auxiva(empty.view(), &[1, 2], 5, true, false, true),
            Err(SeparationError::DimensionMismatch(_))
        ));
        assert!(matches!(
            sparse_auxiva(x, &[1, 9], 5, true, false, true),
            Err(SeparationError::InvalidSupport { .. })
        ));
        assert!(matches!(
            sparse_auxiva(x, &[3, 1], 5, true, false, true),
            Err(SeparationError::InvalidSupport { .. })
        ));
        assert!(matches!(
            sparse_auxiva(x, &[1, 2], 0, true, false, true),
            Err(SeparationError::InvalidParameter { .. })
        ));

        let support = FrequencySupport::full(9).unwrap();
        let bad_contrast = SparseAuxIva::new().contrast(Contrast::Norm { c: -1.0 });
        assert!(bad_contrast.separate(x, &support).is_err());

        // a support must be built for the observation's own spectrum
        for other_bins in [8, 10] {
            let support = FrequencySupport::new(vec![1, 2, 3], other_bins).unwrap();
            assert!(matches!(
                SparseAuxIva::new().separate(x, &support),
                Err(SeparationError::InvalidSupport { .. })
            ));
        }
        let below_nyquist = FrequencySupport::new((0..8).collect(), 9).unwrap();
        assert!(SparseAuxIva::new().separate(x, &below_nyquist).is_ok());
    }

    #[test]
    fn test_three_channels_require_dense_mode() {
        let sources = random_sources(100, 9, 3, 11);
        let mixing = [[1.0, 0.6, 0.3], [0.4, 1.0, 0.5], [0.2, 0.7, 1.0]];
        let x = Array3::from_shape_fn((100, 9, 3), |(t, f, c)| {
            (0..3).fold(Complex64::new(0.0, 0.0), |acc, s| {
                acc + sources[[t, f, s]] * mixing[c][s]
            })
        });
        let support = FrequencySupport::full(9).unwrap();

        let err = SparseAuxIva::new().separate(x.view(), &support).unwrap_err();
        assert_eq!(
            err,
            SeparationError::UnsupportedChannelCount {
                expected: 2,
                actual: 3
            }
        );

        let separation = SparseAuxIva::new()
            .sparse_reconstruction(false)
            .separate(x.view(), &support)
            .unwrap();
        assert_eq!(separation.n_sources(), 3);
        assert!(crate::linalg::all_finite(separation.signals.iter()));
    }
}
