use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::matrix::{Dataset, DenseMatrix};

pub fn squared_norms<D: Dataset + ?Sized>(x: &D) -> Vec<f64> {
    (0..x.n_rows()).map(|i| x.squared_norm(i)).collect()
}

/// Pairwise squared distances between the rows of `a` and the rows of `b`.
/// With `b_squared_norms` the expansion `|a|^2 + |b|^2 - 2ab` is used.
pub fn squared_distances<A, B>(a: &A, b: &B, b_squared_norms: Option<&[f64]>) -> Result<DenseMatrix>
where
    A: Dataset + ?Sized,
    B: Dataset + ?Sized,
{
    euclidean_distances(a, b, b_squared_norms, true)
}

pub fn euclidean_distances<A, B>(
    a: &A,
    b: &B,
    b_squared_norms: Option<&[f64]>,
    squared: bool,
) -> Result<DenseMatrix>
where
    A: Dataset + ?Sized,
    B: Dataset + ?Sized,
{
    if a.n_cols() != b.n_cols() {
        return Err(KMeansError::DimensionMismatch {
            expected: b.n_cols(),
            got: a.n_cols(),
        });
    }
    if let Some(norms) = b_squared_norms {
        if norms.len() != b.n_rows() {
            return Err(KMeansError::DimensionMismatch {
                expected: b.n_rows(),
                got: norms.len(),
            });
        }
    }

    let (n, m) = (a.n_rows(), b.n_rows());
    let mut out = vec![0.0; n * m];
    for i in 0..n {
        let ra = a.row(i);
        let dst = &mut out[i * m..(i + 1) * m];
        match b_squared_norms {
            Some(norms) => {
                let na = ra.squared_norm();
                for (j, d) in dst.iter_mut().enumerate() {
                    *d = (na + norms[j] - 2.0 * ra.dot(&b.row(j))).max(0.0);
                }
            }
            None => {
                for (j, d) in dst.iter_mut().enumerate() {
                    *d = ra.squared_distance(&b.row(j));
                }
            }
        }
        if !squared {
            for d in dst.iter_mut() {
                *d = d.sqrt();
            }
        }
    }
    DenseMatrix::new(n, m, out)
}

/// Squared distances from row `i` of `x` to every row of `x`.
pub(crate) fn row_to_all_squared<D: Dataset + ?Sized>(
    x: &D,
    i: usize,
    x_squared_norms: &[f64],
) -> Vec<f64> {
    let ri = x.row(i);
    let ni = x_squared_norms[i];
    (0..x.n_rows())
        .map(|j| (ni + x_squared_norms[j] - 2.0 * x.row(j).dot(&ri)).max(0.0))
        .collect()
}
