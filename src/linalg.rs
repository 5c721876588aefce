//! Small dense complex linear-algebra helpers.
//!
//! The separator works on `channels × channels` matrices per frequency bin,
//! which are tiny (2×2 in the common case). The linear solve goes through
//! nalgebra's LU decomposition; the remaining helpers operate on ndarray
//! views directly.

use crate::Complex64;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use num_traits::{One, Zero};

/// Default relative pivot threshold for [`solve`].
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve `a · x = b` with an LU decomposition with partial pivoting.
///
/// Returns `None` when the matrix is not square, does not match `b`, or when
/// a pivot of the factorization falls below `pivot_tol · max|a|`
/// (numerically singular). A returned solution is always finite.
pub fn solve(
    a: ArrayView2<'_, Complex64>,
    b: ArrayView1<'_, Complex64>,
    pivot_tol: f64,
) -> Option<Array1<Complex64>> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n || n == 0 {
        return None;
    }

    let scale = a.iter().map(|z| z.norm()).fold(0.0_f64, f64::max);
    if !(scale.is_finite() && scale > 0.0) {
        return None;
    }

    let lu = DMatrix::from_fn(n, n, |i, j| a[[i, j]]).lu();
    let threshold = pivot_tol * scale;
    if lu.u().diagonal().iter().any(|pivot| pivot.norm() <= threshold) {
        return None;
    }

    let rhs = DVector::from_iterator(n, b.iter().copied());
    let x: Array1<Complex64> = lu.solve(&rhs)?.iter().copied().collect();
    all_finite(x.iter()).then_some(x)
}

/// Identity matrix of size `n`.
pub fn identity(n: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            Complex64::one()
        } else {
            Complex64::zero()
        }
    })
}

/// `n`-th standard basis vector of length `len`.
pub fn basis_vector(len: usize, n: usize) -> Array1<Complex64> {
    let mut e = Array1::<Complex64>::zeros(len);
    e[n] = Complex64::one();
    e
}

/// Conjugate transpose of `a`.
pub fn conj_transpose(a: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    a.t().mapv(|z| z.conj())
}

/// Hermitian quadratic form `wᴴ · v · w`.
///
/// For a Hermitian `v` the result is real up to rounding; the full complex
/// value is returned so callers can check the imaginary residue.
pub fn quadratic_form(v: ArrayView2<'_, Complex64>, w: ArrayView1<'_, Complex64>) -> Complex64 {
    let vw = v.dot(&w);
    w.iter()
        .zip(vw.iter())
        .fold(Complex64::zero(), |acc, (wi, vwi)| acc + wi.conj() * vwi)
}

/// Weighted covariance `(1/T) Σ_t g[t] · x_t x_tᴴ` of the rows of `x`.
///
/// `x` has shape `(frames, channels)` and `weights` has length `frames`.
/// Entry `(i, j)` of the result is `(1/T) Σ_t g[t] · x[t, i] · conj(x[t, j])`,
/// which is Hermitian by construction.
pub fn weighted_covariance(
    x: ArrayView2<'_, Complex64>,
    weights: ArrayView1<'_, f64>,
) -> Array2<Complex64> {
    let (n_frames, n_chan) = x.dim();
    let mut cov = Array2::<Complex64>::zeros((n_chan, n_chan));
    if n_frames == 0 {
        return cov;
    }

    for (row, &g) in x.axis_iter(Axis(0)).zip(weights.iter()) {
        for i in 0..n_chan {
            let xi = row[i] * g;
            for j in i..n_chan {
                cov[[i, j]] += xi * row[j].conj();
            }
        }
    }

    let inv_t = 1.0 / n_frames as f64;
    for i in 0..n_chan {
        cov[[i, i]] = Complex64::new(cov[[i, i]].re * inv_t, 0.0);
        for j in (i + 1)..n_chan {
            let upper = cov[[i, j]] * inv_t;
            cov[[i, j]] = upper;
            cov[[j, i]] = upper.conj();
        }
    }
    cov
}

/// Squared Frobenius norm of a complex array of any dimension.
pub fn frobenius_norm_sqr<'a, I>(values: I) -> f64
where
    I: IntoIterator<Item = &'a Complex64>,
{
    values.into_iter().map(|z| z.norm_sqr()).sum()
}

/// Returns `true` if every entry is finite.
pub fn all_finite<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a Complex64>,
{
    values
        .into_iter()
        .all(|z| z.re.is_finite() && z.im.is_finite())
}
