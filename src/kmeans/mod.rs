pub mod distances;
pub use distances::{euclidean_distances, squared_distances, squared_norms};

pub mod error;
pub use error::{KMeansError, Result};

pub mod estimator;
pub use estimator::KMeans;

pub mod init;
pub use init::{Init, init_centroids, kmeans_plusplus};

pub mod lloyd;
pub use lloyd::{KMeansOptions, KMeansResult, LloydStep, k_means, lloyd_iteration};

pub mod matrix;
pub use matrix::{CsrMatrix, Dataset, DenseMatrix, RowView};

pub mod minibatch;
pub use minibatch::{MiniBatchKMeans, MiniBatchOptions, MiniBatchState, mini_batch_step};

pub mod utilities;
pub use utilities::{feature_means, gen_even_slices, labels_inertia, mean_variance};
