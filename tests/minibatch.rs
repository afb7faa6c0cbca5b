use kclust::kmeans::{
    CsrMatrix, Dataset, DenseMatrix, Init, KMeansError, KMeansOptions, MiniBatchKMeans,
    MiniBatchOptions, k_means, mini_batch_step, squared_norms,
};

mod helpers;
use helpers::{approx_eq, make_blobs, same_partition, square_centers};

fn options(n_clusters: usize, batch_size: usize, seed: u64) -> MiniBatchOptions {
    MiniBatchOptions {
        n_clusters,
        batch_size,
        random_state: Some(seed),
        ..Default::default()
    }
}

#[test]
fn step_moves_centers_to_running_means() {
    let x = DenseMatrix::from_rows(&[vec![2.0, 0.0], vec![4.0, 0.0], vec![10.0, 12.0]]).unwrap();
    let norms = squared_norms(&x);
    let mut centers = DenseMatrix::from_rows(&[vec![0.0, 0.0], vec![10.0, 10.0]]).unwrap();
    let mut counts = vec![1u64, 0];

    let (inertia, diff) = mini_batch_step(&x, &norms, &[0, 1, 2], &mut centers, &mut counts);
    // center 0 already absorbed one sample at the origin
    assert_eq!(centers.to_rows(), vec![vec![2.0, 0.0], vec![10.0, 12.0]]);
    assert_eq!(counts, vec![3, 1]);
    assert!(approx_eq(inertia, 4.0 + 16.0 + 4.0, 1e-9));
    assert!(approx_eq(diff, 4.0 + 4.0, 1e-9));
}

#[test]
fn step_leaves_untouched_centers_alone() {
    let x = DenseMatrix::from_rows(&[vec![1.0], vec![2.0], vec![100.0]]).unwrap();
    let norms = squared_norms(&x);
    let mut centers = DenseMatrix::from_rows(&[vec![0.0], vec![100.0]]).unwrap();
    let mut counts = vec![0u64, 5];
    mini_batch_step(&x, &norms, &[0, 1], &mut centers, &mut counts);
    assert_eq!(centers.row_slice(1), &[100.0]);
    assert_eq!(counts, vec![2, 5]);
    assert!(approx_eq(centers.get(0, 0), 1.5, 1e-12));
}

#[test]
fn close_to_batch_kmeans_on_blobs() {
    let (x, truth) = make_blobs(&square_centers(50.0), 200, 1.0, 21);
    let full = k_means(
        &x,
        &KMeansOptions {
            n_clusters: 4,
            random_state: Some(0),
            ..Default::default()
        },
    )
    .unwrap();

    let mut mb = MiniBatchKMeans::new(MiniBatchOptions {
        init: Init::KMeansPlusPlus,
        ..options(4, 100, 0)
    });
    mb.fit(&x).unwrap();
    let inertia = mb.inertia().unwrap();
    assert!(
        inertia <= full.inertia * 1.1,
        "mini-batch {} vs full {}",
        inertia,
        full.inertia
    );
    assert!(same_partition(mb.labels().unwrap(), &truth));
}

#[test]
fn counts_add_up_to_processed_samples() {
    let (x, _) = make_blobs(&square_centers(20.0), 50, 2.0, 3);
    let mut mb = MiniBatchKMeans::new(options(4, 40, 1));
    mb.fit(&x).unwrap();
    let state = mb.state().unwrap();
    // 200 rows in 5 even batches of 40
    assert!(state.n_steps >= 1);
    let total: u64 = state.counts.iter().sum();
    assert_eq!(total, 40 * state.n_steps as u64);
}

#[test]
fn runs_every_step_without_early_stopping() {
    let (x, _) = make_blobs(&square_centers(20.0), 50, 2.0, 3);
    let mut mb = MiniBatchKMeans::new(MiniBatchOptions {
        max_iter: 5,
        max_no_improvement: None,
        ..options(4, 40, 1)
    });
    mb.fit(&x).unwrap();
    assert_eq!(mb.state().unwrap().n_steps, 5 * 5);
}

fn steps_until_stop(opts: MiniBatchOptions, x: &DenseMatrix) -> usize {
    let mut mb = MiniBatchKMeans::new(opts);
    mb.fit(x).unwrap();
    mb.state().unwrap().n_steps
}

#[test]
fn plateau_of_smoothed_inertia_stops_early() {
    // 1000 rows in 20 batches of 50, budget of 50 passes
    let (x, _) = make_blobs(&square_centers(20.0), 250, 2.0, 27);
    let base = MiniBatchOptions {
        max_iter: 50,
        ..options(4, 50, 8)
    };
    let budget = 50 * 20;
    let unlimited = steps_until_stop(
        MiniBatchOptions {
            max_no_improvement: None,
            ..base.clone()
        },
        &x,
    );
    let patient = steps_until_stop(
        MiniBatchOptions {
            max_no_improvement: Some(3),
            ..base.clone()
        },
        &x,
    );
    let eager = steps_until_stop(
        MiniBatchOptions {
            max_no_improvement: Some(1),
            ..base
        },
        &x,
    );
    assert_eq!(unlimited, budget);
    assert!(patient < unlimited, "Some(3) ran {} steps", patient);
    assert!(eager < patient, "Some(1) ran {} steps, Some(3) {}", eager, patient);
}

#[test]
fn small_center_displacement_stops_early() {
    let (x, _) = make_blobs(&square_centers(20.0), 250, 2.0, 27);
    let steps = steps_until_stop(
        MiniBatchOptions {
            max_iter: 50,
            tol: 1e-3,
            max_no_improvement: None,
            ..options(4, 50, 8)
        },
        &x,
    );
    assert!(steps >= 1 && steps < 50 * 20, "ran {} steps", steps);
}

#[test]
fn batch_larger_than_data_is_a_single_batch() {
    let (x, _) = make_blobs(&square_centers(20.0), 10, 1.0, 3);
    let mut mb = MiniBatchKMeans::new(MiniBatchOptions {
        max_iter: 3,
        max_no_improvement: None,
        ..options(4, 1000, 1)
    });
    mb.fit(&x).unwrap();
    let state = mb.state().unwrap();
    assert_eq!(state.n_steps, 3);
    assert_eq!(state.counts.iter().sum::<u64>(), 3 * 40);
}

#[test]
fn labels_are_optional() {
    let (x, _) = make_blobs(&square_centers(20.0), 20, 1.0, 4);
    let mut mb = MiniBatchKMeans::new(MiniBatchOptions {
        compute_labels: false,
        ..options(4, 16, 2)
    });
    mb.fit(&x).unwrap();
    assert!(mb.labels().is_none());
    assert!(mb.inertia().is_none());
    assert_eq!(mb.centroids().unwrap().n_rows(), 4);
    assert_eq!(mb.predict(&x).unwrap().len(), x.n_rows());
}

#[test]
fn same_seed_same_centroids() {
    let (x, _) = make_blobs(&square_centers(8.0), 60, 2.0, 12);
    let mut a = MiniBatchKMeans::new(options(4, 32, 99));
    let mut b = MiniBatchKMeans::new(options(4, 32, 99));
    a.fit(&x).unwrap();
    b.fit(&x).unwrap();
    assert_eq!(a.centroids(), b.centroids());
    assert_eq!(a.counts(), b.counts());
}

#[test]
fn partial_fit_seeds_from_the_first_batch() {
    let (x, _) = make_blobs(&square_centers(30.0), 10, 1.0, 6);
    let mut mb = MiniBatchKMeans::new(options(4, 10, 5));
    assert!(mb.state().is_none());

    mb.partial_fit(&x).unwrap();
    let first = mb.state().unwrap().clone();
    assert_eq!(first.n_steps, 1);
    assert_eq!(first.counts.iter().sum::<u64>(), 40);
    assert_eq!(first.labels.as_ref().unwrap().len(), 40);

    mb.partial_fit(&x).unwrap();
    let second = mb.state().unwrap();
    assert_eq!(second.n_steps, 2);
    assert_eq!(second.counts.iter().sum::<u64>(), 80);
    for (a, b) in first.counts.iter().zip(&second.counts) {
        assert!(b >= a);
    }
}

#[test]
fn partial_fit_accepts_sparse_batches() {
    let (x, _) = make_blobs(&square_centers(30.0), 10, 1.0, 6);
    let xs = CsrMatrix::from_dense(&x);
    let mut mb = MiniBatchKMeans::new(options(4, 10, 5));
    mb.partial_fit(&xs).unwrap();
    mb.partial_fit(&x).unwrap();
    assert_eq!(mb.state().unwrap().n_steps, 2);
    assert_eq!(mb.predict(&xs).unwrap(), mb.predict(&x).unwrap());
}

#[test]
fn partial_fit_rejects_other_widths() {
    let (x, _) = make_blobs(&square_centers(30.0), 10, 1.0, 6);
    let mut mb = MiniBatchKMeans::new(options(4, 10, 5));
    mb.partial_fit(&x).unwrap();
    let wide = DenseMatrix::zeros(5, 3);
    let err = mb.partial_fit(&wide).unwrap_err();
    assert_eq!(
        err,
        KMeansError::DimensionMismatch {
            expected: 2,
            got: 3
        }
    );
    assert_eq!(mb.state().unwrap().n_steps, 1);
}

#[test]
fn empty_partial_fit_changes_nothing() {
    let mut mb = MiniBatchKMeans::new(options(2, 10, 5));
    mb.partial_fit(&DenseMatrix::zeros(0, 2)).unwrap();
    assert!(mb.state().is_none());

    let x = DenseMatrix::from_rows(&[vec![0.0, 0.0], vec![5.0, 5.0], vec![6.0, 5.0]]).unwrap();
    mb.partial_fit(&x).unwrap();
    let before = mb.state().unwrap().clone();
    mb.partial_fit(&DenseMatrix::zeros(0, 2)).unwrap();
    let after = mb.state().unwrap();
    assert_eq!(after.centroids, before.centroids);
    assert_eq!(after.counts, before.counts);
    assert_eq!(after.n_steps, before.n_steps);
}

#[test]
fn predict_and_transform_need_a_fit() {
    let mb = MiniBatchKMeans::new(options(2, 10, 5));
    let x = DenseMatrix::zeros(3, 2);
    assert!(matches!(mb.predict(&x), Err(KMeansError::NotFitted(_))));
    assert!(matches!(mb.transform(&x), Err(KMeansError::NotFitted(_))));
}

#[test]
fn transform_gives_distances_to_every_center() {
    let (x, _) = make_blobs(&square_centers(30.0), 10, 1.0, 6);
    let mut mb = MiniBatchKMeans::new(options(4, 10, 5));
    mb.fit(&x).unwrap();
    let d = mb.transform(&x).unwrap();
    assert_eq!((d.n_rows(), d.n_cols()), (40, 4));
    let labels = mb.predict(&x).unwrap();
    for (i, row) in d.rows().enumerate() {
        assert!(row.iter().all(|v| *v >= 0.0));
        let min = row.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(row[labels[i]], min);
    }
}

#[test]
fn reconfiguring_forgets_the_fit() {
    let (x, _) = make_blobs(&square_centers(30.0), 10, 1.0, 6);
    let mut mb = MiniBatchKMeans::new(options(4, 10, 5));
    mb.fit(&x).unwrap();
    assert!(mb.centroids().is_some());
    mb.set_options(options(3, 10, 5));
    assert!(mb.state().is_none());
    assert!(matches!(mb.predict(&x), Err(KMeansError::NotFitted(_))));
    assert_eq!(mb.options().n_clusters, 3);
}

#[test]
fn invalid_options_are_rejected() {
    let x = DenseMatrix::zeros(10, 2);
    for opts in [
        options(0, 10, 1),
        options(11, 10, 1),
        options(2, 0, 1),
        MiniBatchOptions {
            max_iter: 0,
            ..options(2, 10, 1)
        },
        MiniBatchOptions {
            max_no_improvement: Some(0),
            ..options(2, 10, 1)
        },
        MiniBatchOptions {
            tol: -0.5,
            ..options(2, 10, 1)
        },
    ] {
        let mut mb = MiniBatchKMeans::new(opts);
        assert!(matches!(mb.fit(&x), Err(KMeansError::Configuration(_))));
    }
}
