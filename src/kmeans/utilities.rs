use std::ops::Range;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::matrix::{Dataset, DenseMatrix, RowView};

pub fn feature_means<D: Dataset + ?Sized>(x: &D) -> Vec<f64> {
    let mut m = vec![0.0; x.n_cols()];
    let n = x.n_rows();
    if n == 0 {
        return m;
    }
    for i in 0..n {
        x.row(i).add_to(&mut m);
    }
    for v in m.iter_mut() {
        *v /= n as f64;
    }
    m
}

/// Mean over features of the per-feature (population) variance.
pub fn mean_variance<D: Dataset + ?Sized>(x: &D) -> f64 {
    let (n, d) = (x.n_rows(), x.n_cols());
    if n == 0 || d == 0 {
        return 0.0;
    }
    let means = feature_means(x);
    let mut acc = vec![0.0; d];
    let mut sparse_rows = 0usize;
    for i in 0..n {
        match x.row(i) {
            RowView::Dense(r) => {
                for j in 0..d {
                    let e = r[j] - means[j];
                    acc[j] += e * e;
                }
            }
            RowView::Sparse { indices, values } => {
                // implicit zeros contribute means[j]^2, added below
                sparse_rows += 1;
                for (&j, &v) in indices.iter().zip(values) {
                    let e = v - means[j];
                    acc[j] += e * e - means[j] * means[j];
                }
            }
        }
    }
    let mut total = 0.0;
    for j in 0..d {
        let var = (acc[j] + sparse_rows as f64 * means[j] * means[j]) / n as f64;
        total += var.max(0.0);
    }
    total / d as f64
}

#[inline]
pub(crate) fn nearest_center(
    row: &RowView<'_>,
    row_norm: f64,
    centers: &DenseMatrix,
    center_norms: &[f64],
) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (c, cn) in center_norms.iter().enumerate() {
        let d = (row_norm + cn - 2.0 * row.dot_dense(centers.row_slice(c))).max(0.0);
        if d < best_d {
            best_d = d;
            best = c;
        }
    }
    (best, best_d)
}

/// Nearest-centroid labels (ties to the lowest index) and the inertia of
/// that assignment.
pub fn labels_inertia<D: Dataset + ?Sized>(
    x: &D,
    x_squared_norms: &[f64],
    centers: &DenseMatrix,
) -> (Vec<usize>, f64) {
    let center_norms: Vec<f64> = centers
        .rows()
        .map(|c| c.iter().map(|v| v * v).sum())
        .collect();
    let mut labels = Vec::with_capacity(x.n_rows());
    let mut inertia = 0.0;
    for i in 0..x.n_rows() {
        let (l, d) = nearest_center(&x.row(i), x_squared_norms[i], centers, &center_norms);
        labels.push(l);
        inertia += d;
    }
    (labels, inertia)
}

/// `n_packs` contiguous slices covering `0..n`, lengths differing by at most one.
pub fn gen_even_slices(n: usize, n_packs: usize) -> Vec<Range<usize>> {
    let mut out = Vec::with_capacity(n_packs);
    let mut start = 0usize;
    for p in 0..n_packs {
        let mut len = n / n_packs;
        if p < n % n_packs {
            len += 1;
        }
        if len > 0 {
            out.push(start..start + len);
            start += len;
        }
    }
    out
}

pub(crate) fn check_n_features(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(KMeansError::DimensionMismatch { expected, got });
    }
    Ok(())
}

pub(crate) fn check_tol(tol: f64) -> Result<()> {
    if !tol.is_finite() || tol < 0.0 {
        return Err(KMeansError::Configuration(format!(
            "tol must be finite and >= 0, got {}",
            tol
        )));
    }
    Ok(())
}

#[inline]
pub fn resolve_seed(random_state: Option<u64>) -> u64 {
    random_state.unwrap_or_else(|| rand::rng().random())
}

/// Generator for restart `run`: same key as the master seed, stream = run.
pub fn rng_for_run(seed: u64, run: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(run as u64);
    rng
}
