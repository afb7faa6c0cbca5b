use rayon::{ThreadPoolBuilder, prelude::*};
use serde::Serialize;
use serde_json::json;

use crate::kmeans::distances::squared_norms;
use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::init::{Init, init_centroids};
use crate::kmeans::matrix::{Dataset, DenseMatrix};
use crate::kmeans::utilities::{
    check_n_features, check_tol, feature_means, labels_inertia, mean_variance, resolve_seed,
    rng_for_run,
};
use crate::log_json;

#[derive(Clone, Debug)]
pub struct KMeansOptions {
    pub n_clusters: usize,
    pub init: Init,
    /// Independent seedings; the lowest-inertia run is kept.
    pub n_init: usize,
    pub max_iter: usize,
    /// Relative to the mean feature variance of the data.
    pub tol: f64,
    pub random_state: Option<u64>,
    pub n_local_trials: Option<usize>,
    /// Threads used for the restarts, 1 keeps everything on the caller's thread.
    pub cores: usize,
    pub verbose: bool,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            init: Init::KMeansPlusPlus,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            random_state: None,
            n_local_trials: None,
            cores: 1,
            verbose: false,
        }
    }
}

impl KMeansOptions {
    pub(crate) fn validate<D: Dataset + ?Sized>(&self, x: &D) -> Result<()> {
        if self.n_clusters == 0 {
            return Err(KMeansError::Configuration(
                "n_clusters must be greater than zero".into(),
            ));
        }
        if self.n_init == 0 {
            return Err(KMeansError::Configuration(
                "n_init must be at least 1".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(KMeansError::Configuration(
                "max_iter must be greater than zero".into(),
            ));
        }
        check_tol(self.tol)?;
        if x.n_rows() < self.n_clusters {
            return Err(KMeansError::Configuration(format!(
                "n_samples={} should be >= n_clusters={}",
                x.n_rows(),
                self.n_clusters
            )));
        }
        self.init.check_input(x, self.n_clusters)
    }

    /// Restarts actually run: explicit centers are only refined once.
    pub fn effective_n_init(&self) -> usize {
        match self.init {
            Init::Array(_) => 1,
            _ => self.n_init,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KMeansResult {
    pub centroids: DenseMatrix,
    pub labels: Vec<usize>,
    pub inertia: f64,
    pub n_iter: usize,
}

/// One assign + update step. `labels` and `inertia` describe the
/// assignment to the input `centers`.
#[derive(Clone, Debug)]
pub struct LloydStep {
    pub centers: DenseMatrix,
    pub labels: Vec<usize>,
    pub inertia: f64,
    pub center_shift: f64,
}

pub fn lloyd_iteration<D: Dataset + ?Sized>(
    x: &D,
    centers: &DenseMatrix,
    x_squared_norms: &[f64],
) -> Result<LloydStep> {
    check_n_features(centers.n_cols(), x.n_cols())?;
    if x_squared_norms.len() != x.n_rows() {
        return Err(KMeansError::DimensionMismatch {
            expected: x.n_rows(),
            got: x_squared_norms.len(),
        });
    }
    let (labels, inertia) = labels_inertia(x, x_squared_norms, centers);
    let next = update_centers(x, &labels, centers);
    let center_shift = next
        .as_slice()
        .iter()
        .zip(centers.as_slice())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    Ok(LloydStep {
        centers: next,
        labels,
        inertia,
        center_shift,
    })
}

// empty clusters keep their previous position
fn update_centers<D: Dataset + ?Sized>(
    x: &D,
    labels: &[usize],
    centers: &DenseMatrix,
) -> DenseMatrix {
    let (k, d) = (centers.n_rows(), centers.n_cols());
    let mut next = DenseMatrix::zeros(k, d);
    let mut counts = vec![0usize; k];
    for (i, &l) in labels.iter().enumerate() {
        x.row(i).add_to(next.row_mut(l));
        counts[l] += 1;
    }
    for (c, &cnt) in counts.iter().enumerate() {
        let row = next.row_mut(c);
        if cnt == 0 {
            row.copy_from_slice(centers.row_slice(c));
        } else {
            for v in row.iter_mut() {
                *v /= cnt as f64;
            }
        }
    }
    next
}

fn lloyd_single<D: Dataset + ?Sized>(
    x: &D,
    mut centers: DenseMatrix,
    x_squared_norms: &[f64],
    max_iter: usize,
    tol: f64,
    run: usize,
    verbose: bool,
) -> Result<KMeansResult> {
    let mut n_iter = 0usize;
    for it in 0..max_iter {
        let step = lloyd_iteration(x, &centers, x_squared_norms)?;
        n_iter = it + 1;
        centers = step.centers;
        if verbose {
            log_json(&json!({
                "stage": "lloyd",
                "run": run,
                "iteration": it,
                "inertia": step.inertia,
                "center_shift": step.center_shift
            }));
        }
        if step.center_shift <= tol {
            if verbose {
                log_json(&json!({
                    "stage": "lloyd",
                    "run": run,
                    "converged_at": it,
                    "center_shift": step.center_shift,
                    "tol": tol
                }));
            }
            break;
        }
    }
    let (labels, inertia) = labels_inertia(x, x_squared_norms, &centers);
    Ok(KMeansResult {
        centroids: centers,
        labels,
        inertia,
        n_iter,
    })
}

/// Batch k-means: `n_init` seedings, each refined with Lloyd iterations,
/// keeping the run with the lowest inertia. Dense input is iterated on a
/// mean-centered private copy.
pub fn k_means<D: Dataset>(x: &D, options: &KMeansOptions) -> Result<KMeansResult> {
    options.validate(x)?;
    let seed = resolve_seed(options.random_state);
    let tol = options.tol * mean_variance(x);
    let means = feature_means(x);
    match x.centered(&means) {
        Some(xc) => {
            let mut best = run_restarts(&xc, Some(&means), tol, seed, options)?;
            best.centroids.shift_rows(&means, 1.0);
            Ok(best)
        }
        None => run_restarts(x, None, tol, seed, options),
    }
}

fn run_restarts<D: Dataset>(
    x: &D,
    offset: Option<&[f64]>,
    tol: f64,
    seed: u64,
    options: &KMeansOptions,
) -> Result<KMeansResult> {
    let x_squared_norms = squared_norms(x);
    let n_init = options.effective_n_init();
    if options.verbose && n_init != options.n_init {
        log_json(&json!({
            "warning": "explicit initial centers passed, performing only one init",
            "n_init": options.n_init
        }));
    }

    let run = |r: usize| -> Result<KMeansResult> {
        let mut rng = rng_for_run(seed, r);
        let centers = init_centroids(
            x,
            options.n_clusters,
            &options.init,
            &mut rng,
            Some(&x_squared_norms),
            offset,
            options.n_local_trials,
        )?;
        let res = lloyd_single(
            x,
            centers,
            &x_squared_norms,
            options.max_iter,
            tol,
            r,
            options.verbose,
        )?;
        if options.verbose {
            log_json(&json!({
                "stage": "lloyd",
                "run": r,
                "n_iter": res.n_iter,
                "inertia": res.inertia
            }));
        }
        Ok(res)
    };

    let runs: Vec<Result<KMeansResult>> = if options.cores <= 1 || n_init < 2 {
        (0..n_init).map(run).collect()
    } else {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.cores)
            .thread_name(|i| format!("kmeans-{}", i))
            .build()
            .map_err(|e| KMeansError::Configuration(format!("thread pool: {}", e)))?;
        pool.install(|| (0..n_init).into_par_iter().map(run).collect())
    };

    let mut best: Option<KMeansResult> = None;
    for res in runs {
        let res = res?;
        if best.as_ref().is_none_or(|b| res.inertia < b.inertia) {
            best = Some(res);
        }
    }
    best.ok_or_else(|| KMeansError::Configuration("n_init must be at least 1".into()))
}
