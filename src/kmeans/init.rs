use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;

use crate::kmeans::distances::{row_to_all_squared, squared_norms};
use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::matrix::{Dataset, DenseMatrix};

pub type InitFn = dyn Fn(&dyn Dataset, usize, &mut ChaCha8Rng) -> Result<DenseMatrix> + Send + Sync;

/// How the first centroids of a run are chosen.
#[derive(Clone, Default)]
pub enum Init {
    /// k distinct rows drawn uniformly.
    Random,
    /// Arthur & Vassilvitskii seeding with greedy local trials.
    #[default]
    KMeansPlusPlus,
    /// Explicit centroids, one row per cluster.
    Array(DenseMatrix),
    Custom {
        seed_fn: Arc<InitFn>,
        accepts_sparse: bool,
    },
}

impl Init {
    pub fn custom<F>(seed_fn: F, accepts_sparse: bool) -> Self
    where
        F: Fn(&dyn Dataset, usize, &mut ChaCha8Rng) -> Result<DenseMatrix> + Send + Sync + 'static,
    {
        Init::Custom {
            seed_fn: Arc::new(seed_fn),
            accepts_sparse,
        }
    }

    pub fn supports_sparse(&self) -> bool {
        match self {
            Init::Random | Init::KMeansPlusPlus | Init::Array(_) => true,
            Init::Custom { accepts_sparse, .. } => *accepts_sparse,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Init::Random => "random",
            Init::KMeansPlusPlus => "k-means++",
            Init::Array(_) => "array",
            Init::Custom { .. } => "custom",
        }
    }

    pub(crate) fn check_input<D: Dataset + ?Sized>(&self, x: &D, k: usize) -> Result<()> {
        if x.is_sparse() && !self.supports_sparse() {
            return Err(KMeansError::Configuration(format!(
                "init '{}' does not support sparse input",
                self.name()
            )));
        }
        if let Init::Array(c) = self {
            check_centers_shape(c, k, x.n_cols())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Init::Array(c) => f
                .debug_tuple("Array")
                .field(&(c.n_rows(), c.n_cols()))
                .finish(),
            Init::Custom { accepts_sparse, .. } => f
                .debug_struct("Custom")
                .field("accepts_sparse", accepts_sparse)
                .finish_non_exhaustive(),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Init {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "k-means++" | "kmeans++" => Ok(Init::KMeansPlusPlus),
            "random" => Ok(Init::Random),
            other => Err(KMeansError::Configuration(format!(
                "init should be 'k-means++', 'random', an array or a callable, got '{}'",
                other
            ))),
        }
    }
}

fn check_centers_shape(c: &DenseMatrix, k: usize, n_features: usize) -> Result<()> {
    if c.n_rows() != k || c.n_cols() != n_features {
        return Err(KMeansError::Configuration(format!(
            "initial centers have shape ({}, {}), expected ({}, {})",
            c.n_rows(),
            c.n_cols(),
            k,
            n_features
        )));
    }
    Ok(())
}

fn rows_to_centers<D: Dataset + ?Sized>(x: &D, ids: &[usize]) -> DenseMatrix {
    let d = x.n_cols();
    let mut centers = DenseMatrix::zeros(ids.len(), d);
    for (c, &i) in ids.iter().enumerate() {
        centers.row_mut(c).copy_from_slice(&x.row(i).to_dense(d));
    }
    centers
}

pub fn random_rows<D, R>(x: &D, k: usize, rng: &mut R) -> Result<DenseMatrix>
where
    D: Dataset + ?Sized,
    R: Rng + ?Sized,
{
    let n = x.n_rows();
    if k > n {
        return Err(KMeansError::Configuration(format!(
            "n_samples={} should be >= n_clusters={}",
            n, k
        )));
    }
    let ids = sample(rng, n, k).into_vec();
    Ok(rows_to_centers(x, &ids))
}

/// k-means++ seeding. Each slot after the first draws `n_local_trials`
/// candidates proportionally to the current squared distance and keeps the
/// one that lowers the potential the most (default `2 + ln(k)` trials).
pub fn kmeans_plusplus<D, R>(
    x: &D,
    k: usize,
    rng: &mut R,
    x_squared_norms: Option<&[f64]>,
    n_local_trials: Option<usize>,
) -> Result<DenseMatrix>
where
    D: Dataset + ?Sized,
    R: Rng + ?Sized,
{
    let n = x.n_rows();
    if k == 0 || k > n {
        return Err(KMeansError::Configuration(format!(
            "n_samples={} should be >= n_clusters={} > 0",
            n, k
        )));
    }
    let owned;
    let norms: &[f64] = match x_squared_norms {
        Some(v) if v.len() == n => v,
        Some(v) => {
            return Err(KMeansError::DimensionMismatch {
                expected: n,
                got: v.len(),
            });
        }
        None => {
            owned = squared_norms(x);
            &owned
        }
    };
    let n_local_trials = n_local_trials
        .unwrap_or_else(|| 2 + (k as f64).ln().floor() as usize)
        .max(1);

    let mut ids = Vec::with_capacity(k);
    let first = rng.random_range(0..n);
    ids.push(first);
    let mut closest_dist_sq = row_to_all_squared(x, first, norms);
    let mut current_pot: f64 = closest_dist_sq.iter().sum();

    let mut cumsum = vec![0.0; n];
    for _ in 1..k {
        let mut acc = 0.0;
        for (c, d) in cumsum.iter_mut().zip(&closest_dist_sq) {
            acc += d;
            *c = acc;
        }

        let mut best: Option<(usize, f64, Vec<f64>)> = None;
        for _ in 0..n_local_trials {
            let r = rng.random::<f64>() * current_pot;
            let candidate = cumsum.partition_point(|&v| v < r).min(n - 1);
            let to_candidate = row_to_all_squared(x, candidate, norms);
            let new_dist_sq: Vec<f64> = closest_dist_sq
                .iter()
                .zip(&to_candidate)
                .map(|(a, b)| a.min(*b))
                .collect();
            let new_pot: f64 = new_dist_sq.iter().sum();
            if best.as_ref().is_none_or(|b| new_pot < b.1) {
                best = Some((candidate, new_pot, new_dist_sq));
            }
        }
        if let Some((candidate, pot, dist_sq)) = best {
            ids.push(candidate);
            current_pot = pot;
            closest_dist_sq = dist_sq;
        }
    }
    Ok(rows_to_centers(x, &ids))
}

/// Initial centroids for one run. `offset` is the mean subtracted from `x`
/// when it was centered; explicit arrays are moved by the same amount.
pub fn init_centroids<D: Dataset>(
    x: &D,
    k: usize,
    init: &Init,
    rng: &mut ChaCha8Rng,
    x_squared_norms: Option<&[f64]>,
    offset: Option<&[f64]>,
    n_local_trials: Option<usize>,
) -> Result<DenseMatrix> {
    if x.n_rows() < k {
        return Err(KMeansError::Configuration(format!(
            "n_samples={} should be >= n_clusters={}",
            x.n_rows(),
            k
        )));
    }
    init.check_input(x, k)?;
    let centers = match init {
        Init::Random => random_rows(x, k, rng)?,
        Init::KMeansPlusPlus => kmeans_plusplus(x, k, rng, x_squared_norms, n_local_trials)?,
        Init::Array(c) => {
            let mut c = c.clone();
            if let Some(o) = offset {
                c.shift_rows(o, -1.0);
            }
            c
        }
        Init::Custom { seed_fn, .. } => {
            let c = (seed_fn.as_ref())(x, k, rng)?;
            check_centers_shape(&c, k, x.n_cols())?;
            c
        }
    };
    Ok(centers)
}
