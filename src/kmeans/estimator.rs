use crate::kmeans::distances::{euclidean_distances, squared_norms};
use crate::kmeans::error::{KMeansError, Result};
use crate::kmeans::lloyd::{KMeansOptions, KMeansResult, k_means};
use crate::kmeans::matrix::{Dataset, DenseMatrix};
use crate::kmeans::utilities::{check_n_features, labels_inertia};

/// Batch k-means estimator. Holds the options and, after `fit`, the
/// centroids, labels and inertia of the best restart.
#[derive(Debug, Default)]
pub struct KMeans {
    options: KMeansOptions,
    fitted: Option<KMeansResult>,
}

impl KMeans {
    pub fn new(options: KMeansOptions) -> Self {
        Self {
            options,
            fitted: None,
        }
    }

    pub fn options(&self) -> &KMeansOptions {
        &self.options
    }

    /// Replaces the configuration and drops the fitted state.
    pub fn set_options(&mut self, options: KMeansOptions) {
        self.options = options;
        self.fitted = None;
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn fit<D: Dataset>(&mut self, x: &D) -> Result<&KMeansResult> {
        let res = k_means(x, &self.options)?;
        Ok(&*self.fitted.insert(res))
    }

    pub fn fit_predict<D: Dataset>(&mut self, x: &D) -> Result<Vec<usize>> {
        Ok(self.fit(x)?.labels.clone())
    }

    pub fn predict<D: Dataset + ?Sized>(&self, x: &D) -> Result<Vec<usize>> {
        let c = self.fitted_centroids("predict")?;
        check_n_features(c.n_cols(), x.n_cols())?;
        Ok(labels_inertia(x, &squared_norms(x), c).0)
    }

    /// Euclidean distance of every sample to every centroid (N x K).
    pub fn transform<D: Dataset + ?Sized>(&self, x: &D) -> Result<DenseMatrix> {
        let c = self.fitted_centroids("transform")?;
        check_n_features(c.n_cols(), x.n_cols())?;
        euclidean_distances(x, c, None, false)
    }

    /// Inertia of `x` against the fitted centroids.
    pub fn score<D: Dataset + ?Sized>(&self, x: &D) -> Result<f64> {
        let c = self.fitted_centroids("score")?;
        check_n_features(c.n_cols(), x.n_cols())?;
        Ok(labels_inertia(x, &squared_norms(x), c).1)
    }

    pub fn result(&self) -> Option<&KMeansResult> {
        self.fitted.as_ref()
    }

    pub fn centroids(&self) -> Option<&DenseMatrix> {
        self.fitted.as_ref().map(|f| &f.centroids)
    }

    pub fn labels(&self) -> Option<&[usize]> {
        self.fitted.as_ref().map(|f| f.labels.as_slice())
    }

    pub fn inertia(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.inertia)
    }

    pub fn n_iter(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_iter)
    }

    fn fitted_centroids(&self, op: &'static str) -> Result<&DenseMatrix> {
        self.centroids().ok_or(KMeansError::NotFitted(op))
    }
}
