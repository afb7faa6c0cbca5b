use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::json;

use crate::kmeans::distances::{euclidean_distances, squared_norms};
use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::init::{Init, init_centroids};
use crate::kmeans::matrix::{Dataset, DenseMatrix};
use crate::kmeans::utilities::{
    check_n_features, check_tol, gen_even_slices, labels_inertia, mean_variance, nearest_center,
    resolve_seed,
};
use crate::log_json;

#[derive(Clone, Debug)]
pub struct MiniBatchOptions {
    pub n_clusters: usize,
    pub init: Init,
    /// Passes over the full dataset.
    pub max_iter: usize,
    pub batch_size: usize,
    /// Stop once the smoothed center displacement drops below
    /// `tol * mean_variance`; 0 disables the check.
    pub tol: f64,
    /// Consecutive steps without a lower smoothed inertia before stopping;
    /// `None` disables the check.
    pub max_no_improvement: Option<usize>,
    pub compute_labels: bool,
    pub random_state: Option<u64>,
    pub n_local_trials: Option<usize>,
    pub verbose: bool,
}

impl Default for MiniBatchOptions {
    fn default() -> Self {
        Self {
            n_clusters: 8,
            init: Init::Random,
            max_iter: 100,
            batch_size: 1000,
            tol: 0.0,
            max_no_improvement: Some(3),
            compute_labels: true,
            random_state: None,
            n_local_trials: None,
            verbose: false,
        }
    }
}

impl MiniBatchOptions {
    fn validate(&self) -> Result<()> {
        if self.n_clusters == 0 {
            return Err(KMeansError::Configuration(
                "n_clusters must be greater than zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(KMeansError::Configuration(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(KMeansError::Configuration(
                "max_iter must be greater than zero".into(),
            ));
        }
        if self.max_no_improvement == Some(0) {
            return Err(KMeansError::Configuration(
                "max_no_improvement must be >= 1 or None".into(),
            ));
        }
        check_tol(self.tol)
    }
}

/// Assigns `batch` rows to the current centers, then moves each touched
/// center to the running mean of everything it has absorbed so far.
/// Returns the batch inertia (against the centers before the update) and
/// the summed squared center displacement.
pub fn mini_batch_step<D: Dataset + ?Sized>(
    x: &D,
    x_squared_norms: &[f64],
    batch: &[usize],
    centers: &mut DenseMatrix,
    counts: &mut [u64],
) -> (f64, f64) {
    let (k, d) = (centers.n_rows(), centers.n_cols());
    let center_norms: Vec<f64> = centers
        .rows()
        .map(|c| c.iter().map(|v| v * v).sum())
        .collect();

    let mut sums = DenseMatrix::zeros(k, d);
    let mut batch_counts = vec![0u64; k];
    let mut inertia = 0.0;
    for &i in batch {
        let row = x.row(i);
        let (l, dist) = nearest_center(&row, x_squared_norms[i], centers, &center_norms);
        inertia += dist;
        row.add_to(sums.row_mut(l));
        batch_counts[l] += 1;
    }

    let mut squared_diff = 0.0;
    for c in 0..k {
        let m = batch_counts[c];
        if m == 0 {
            continue;
        }
        let old_count = counts[c] as f64;
        let total = old_count + m as f64;
        let sum = sums.row_slice(c).to_vec();
        for (v, s) in centers.row_mut(c).iter_mut().zip(sum) {
            let next = (*v * old_count + s) / total;
            squared_diff += (next - *v) * (next - *v);
            *v = next;
        }
        counts[c] += m;
    }
    (inertia, squared_diff)
}

#[derive(Clone, Debug, Serialize)]
pub struct MiniBatchState {
    pub centroids: DenseMatrix,
    pub counts: Vec<u64>,
    pub labels: Option<Vec<usize>>,
    pub inertia: Option<f64>,
    pub n_steps: usize,
}

#[derive(Debug)]
pub struct MiniBatchKMeans {
    options: MiniBatchOptions,
    state: Option<MiniBatchState>,
    rng: Option<ChaCha8Rng>,
}

impl MiniBatchKMeans {
    pub fn new(options: MiniBatchOptions) -> Self {
        Self {
            options,
            state: None,
            rng: None,
        }
    }

    pub fn options(&self) -> &MiniBatchOptions {
        &self.options
    }

    /// Replaces the configuration and forgets any fitted state.
    pub fn set_options(&mut self, options: MiniBatchOptions) {
        self.options = options;
        self.state = None;
        self.rng = None;
    }

    pub fn state(&self) -> Option<&MiniBatchState> {
        self.state.as_ref()
    }

    pub fn centroids(&self) -> Option<&DenseMatrix> {
        self.state.as_ref().map(|s| &s.centroids)
    }

    pub fn counts(&self) -> Option<&[u64]> {
        self.state.as_ref().map(|s| s.counts.as_slice())
    }

    pub fn labels(&self) -> Option<&[usize]> {
        self.state.as_ref().and_then(|s| s.labels.as_deref())
    }

    pub fn inertia(&self) -> Option<f64> {
        self.state.as_ref().and_then(|s| s.inertia)
    }

    pub fn fit<D: Dataset>(&mut self, x: &D) -> Result<()> {
        let o = &self.options;
        o.validate()?;
        let (n, k) = (x.n_rows(), o.n_clusters);
        if n < k {
            return Err(KMeansError::Configuration(format!(
                "n_samples={} should be >= n_clusters={}",
                n, k
            )));
        }
        o.init.check_input(x, k)?;

        let mut rng = ChaCha8Rng::seed_from_u64(resolve_seed(o.random_state));
        let x_squared_norms = squared_norms(x);
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);

        let mut centers = init_centroids(
            x,
            k,
            &o.init,
            &mut rng,
            Some(&x_squared_norms),
            None,
            o.n_local_trials,
        )?;
        let mut counts = vec![0u64; k];

        let tol = if o.tol > 0.0 {
            o.tol * mean_variance(x)
        } else {
            0.0
        };
        let n_batches = n.div_ceil(o.batch_size);
        let slices = gen_even_slices(n, n_batches);
        let n_steps = o.max_iter * slices.len();
        let alpha = (2.0 * o.batch_size as f64 / (n as f64 + 1.0)).min(1.0);

        let mut ewa_inertia: Option<f64> = None;
        let mut ewa_diff = 0.0;
        let mut no_improvement = 0usize;
        let mut steps = 0usize;
        for i in 0..n_steps {
            let batch = &order[slices[i % slices.len()].clone()];
            let (inertia, diff) =
                mini_batch_step(x, &x_squared_norms, batch, &mut centers, &mut counts);
            steps = i + 1;
            let inertia = inertia / batch.len() as f64;
            let diff = diff / batch.len() as f64;

            let previous = ewa_inertia;
            let smoothed = match previous {
                None => {
                    ewa_diff = diff;
                    inertia
                }
                Some(prev) => {
                    ewa_diff = ewa_diff * (1.0 - alpha) + diff * alpha;
                    prev * (1.0 - alpha) + inertia * alpha
                }
            };
            ewa_inertia = Some(smoothed);

            if o.verbose {
                log_json(&json!({
                    "stage": "minibatch",
                    "step": steps,
                    "n_steps": n_steps,
                    "inertia": inertia,
                    "ewa_inertia": smoothed,
                    "diff": diff,
                    "ewa_diff": ewa_diff
                }));
            }

            if tol > 0.0 && ewa_diff < tol {
                if o.verbose {
                    log_json(&json!({
                        "stage": "minibatch",
                        "converged_at": steps,
                        "reason": "center displacement below tol"
                    }));
                }
                break;
            }
            if let Some(prev) = previous {
                if smoothed >= prev {
                    no_improvement += 1;
                } else {
                    no_improvement = 0;
                }
            }
            if o.max_no_improvement.is_some_and(|limit| no_improvement >= limit) {
                if o.verbose {
                    log_json(&json!({
                        "stage": "minibatch",
                        "converged_at": steps,
                        "reason": "no improvement of the smoothed inertia"
                    }));
                }
                break;
            }
        }

        let (labels, inertia) = if o.compute_labels {
            let (l, i) = labels_inertia(x, &x_squared_norms, &centers);
            (Some(l), Some(i))
        } else {
            (None, None)
        };
        self.rng = Some(rng);
        self.state = Some(MiniBatchState {
            centroids: centers,
            counts,
            labels,
            inertia,
            n_steps: steps,
        });
        Ok(())
    }

    /// One update step using every row of `x` as the batch. Seeds the
    /// centers from `x` when nothing has been fitted yet.
    pub fn partial_fit<D: Dataset>(&mut self, x: &D) -> Result<()> {
        self.options.validate()?;
        let k = self.options.n_clusters;
        if let Some(s) = &self.state {
            check_n_features(s.centroids.n_cols(), x.n_cols())?;
        }
        if x.n_rows() == 0 {
            return Ok(());
        }

        let x_squared_norms = squared_norms(x);
        if self.state.is_none() {
            let o = &self.options;
            let rng = self
                .rng
                .get_or_insert_with(|| ChaCha8Rng::seed_from_u64(resolve_seed(o.random_state)));
            let centers = init_centroids(
                x,
                k,
                &o.init,
                rng,
                Some(&x_squared_norms),
                None,
                o.n_local_trials,
            )?;
            self.state = Some(MiniBatchState {
                centroids: centers,
                counts: vec![0; k],
                labels: None,
                inertia: None,
                n_steps: 0,
            });
        }

        let compute_labels = self.options.compute_labels;
        let verbose = self.options.verbose;
        let state = self
            .state
            .as_mut()
            .ok_or(KMeansError::NotFitted("partial_fit"))?;
        let batch: Vec<usize> = (0..x.n_rows()).collect();
        let (inertia, diff) = mini_batch_step(
            x,
            &x_squared_norms,
            &batch,
            &mut state.centroids,
            &mut state.counts,
        );
        state.n_steps += 1;
        if verbose {
            log_json(&json!({
                "stage": "partial_fit",
                "step": state.n_steps,
                "inertia": inertia / batch.len() as f64,
                "diff": diff / batch.len() as f64
            }));
        }
        if compute_labels {
            let (l, i) = labels_inertia(x, &x_squared_norms, &state.centroids);
            state.labels = Some(l);
            state.inertia = Some(i);
        } else {
            state.labels = None;
            state.inertia = None;
        }
        Ok(())
    }

    pub fn predict<D: Dataset + ?Sized>(&self, x: &D) -> Result<Vec<usize>> {
        let c = self.centroids().ok_or(KMeansError::NotFitted("predict"))?;
        check_n_features(c.n_cols(), x.n_cols())?;
        Ok(labels_inertia(x, &squared_norms(x), c).0)
    }

    pub fn transform<D: Dataset + ?Sized>(&self, x: &D) -> Result<DenseMatrix> {
        let c = self.centroids().ok_or(KMeansError::NotFitted("transform"))?;
        check_n_features(c.n_cols(), x.n_cols())?;
        euclidean_distances(x, c, None, false)
    }
}
