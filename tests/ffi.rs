use kclust::{
    Buf, CKMeansOptions, CMiniBatchOptions, free_, kmeans_fit, kmeans_fit_csr, kmeans_predict,
    kmeans_transform, minibatch_kmeans_fit,
};
use std::ptr;

fn empty() -> Buf {
    Buf {
        ptr: ptr::null_mut(),
        len: 0,
    }
}

fn take_bytes(b: Buf) -> Vec<u8> {
    if b.ptr.is_null() {
        return Vec::new();
    }
    let out = unsafe { std::slice::from_raw_parts(b.ptr, b.len) }.to_vec();
    unsafe { free_(b.ptr, b.len) };
    out
}

fn take_f64(b: Buf) -> Vec<f64> {
    take_bytes(b)
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn take_labels(b: Buf) -> Vec<u32> {
    take_bytes(b)
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

fn take_json(b: Buf) -> serde_json::Value {
    serde_json::from_slice(&take_bytes(b)).unwrap()
}

fn kmeans_opts(n_clusters: i32) -> CKMeansOptions {
    CKMeansOptions {
        n_clusters,
        init: 0,
        n_init: 1,
        max_iter: 0,
        tol: 1e-4,
        random_state: 7,
        n_local_trials: 0,
        cores: 1,
        verbose: 0,
    }
}

const X: [f64; 8] = [0.0, 0.0, 0.0, 1.0, 10.0, 0.0, 10.0, 1.0];

#[test]
fn fit_with_explicit_centers() {
    let init = [0.0, 0.0, 10.0, 0.0];
    let opts = kmeans_opts(2);
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe { kmeans_fit(X.as_ptr(), 4, 2, init.as_ptr(), &opts, &mut c, &mut l, &mut j) };
    assert_eq!(rc, 0);
    assert_eq!(take_f64(c), vec![0.0, 0.5, 10.0, 0.5]);
    assert_eq!(take_labels(l), vec![0, 0, 1, 1]);
    let summary = take_json(j);
    assert!((summary["inertia"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    assert_eq!(summary["n_clusters"], 2);
}

#[test]
fn fit_reports_configuration_errors() {
    let opts = kmeans_opts(5);
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe { kmeans_fit(X.as_ptr(), 4, 2, ptr::null(), &opts, &mut c, &mut l, &mut j) };
    assert_eq!(rc, 3);
    assert!(c.ptr.is_null());
}

#[test]
fn null_input_is_invalid() {
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe {
        kmeans_fit(ptr::null(), 4, 2, ptr::null(), ptr::null(), &mut c, &mut l, &mut j)
    };
    assert_eq!(rc, 1);
}

#[test]
fn csr_fit_matches_dense_layout() {
    // same four points, zeros left implicit
    let indptr: [u32; 5] = [0, 0, 1, 2, 4];
    let indices: [u32; 4] = [1, 0, 0, 1];
    let data = [1.0, 10.0, 10.0, 1.0];
    let opts = kmeans_opts(2);
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe {
        kmeans_fit_csr(
            indptr.as_ptr(),
            indices.as_ptr(),
            data.as_ptr(),
            4,
            2,
            4,
            &opts,
            &mut c,
            &mut l,
            &mut j,
        )
    };
    assert_eq!(rc, 0);
    let labels = take_labels(l);
    assert_eq!(labels[0], labels[1]);
    assert_eq!(labels[2], labels[3]);
    assert_ne!(labels[0], labels[2]);
    assert_eq!(take_f64(c).len(), 4);
    let summary = take_json(j);
    assert!((summary["inertia"].as_f64().unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn csr_row_count_overflow_is_invalid() {
    let indptr: [u32; 1] = [0];
    let opts = kmeans_opts(2);
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe {
        kmeans_fit_csr(
            indptr.as_ptr(),
            ptr::null(),
            ptr::null(),
            usize::MAX,
            2,
            0,
            &opts,
            &mut c,
            &mut l,
            &mut j,
        )
    };
    assert_eq!(rc, 1);
    assert!(c.ptr.is_null());
}

#[test]
fn minibatch_fit_returns_counts() {
    let opts = CMiniBatchOptions {
        n_clusters: 2,
        init: 0,
        max_iter: 10,
        batch_size: 2,
        tol: 0.0,
        max_no_improvement: -1,
        compute_labels: 1,
        random_state: 3,
        n_local_trials: 0,
        verbose: 0,
    };
    let (mut c, mut l, mut j) = (empty(), empty(), empty());
    let rc = unsafe { minibatch_kmeans_fit(X.as_ptr(), 4, 2, &opts, &mut c, &mut l, &mut j) };
    assert_eq!(rc, 0);
    assert_eq!(take_f64(c).len(), 4);
    assert_eq!(take_labels(l).len(), 4);
    let summary = take_json(j);
    assert_eq!(summary["n_steps"], 20);
    let total: u64 = summary["counts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .sum();
    assert_eq!(total, 40);
}

#[test]
fn predict_and_transform_against_given_centers() {
    let centers = [0.0, 0.5, 10.0, 0.5];
    let mut l = empty();
    let rc = unsafe { kmeans_predict(X.as_ptr(), 4, 2, centers.as_ptr(), 2, &mut l) };
    assert_eq!(rc, 0);
    assert_eq!(take_labels(l), vec![0, 0, 1, 1]);

    let mut d = empty();
    let rc = unsafe { kmeans_transform(X.as_ptr(), 4, 2, centers.as_ptr(), 2, &mut d) };
    assert_eq!(rc, 0);
    let d = take_f64(d);
    assert_eq!(d.len(), 8);
    assert!((d[0] - 0.5).abs() < 1e-12);
    assert!((d[1] - (100.25f64).sqrt()).abs() < 1e-12);
}
