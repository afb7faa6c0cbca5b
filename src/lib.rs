use core::ffi::c_int;
use serde_json::json;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    ptr, slice,
};

pub mod kmeans;
use kmeans::{
    CsrMatrix, Dataset, DenseMatrix, Init, KMeansError, KMeansOptions, MiniBatchKMeans,
    MiniBatchOptions, euclidean_distances, k_means, labels_inertia, squared_norms,
};

const OK: c_int = 0;
const ERR_INVALID_ARGS: c_int = 1;
const ERR_PANIC: c_int = 2;
const ERR_CONFIG: c_int = 3;
const ERR_PARSE: c_int = 4;
const ERR_DIMENSION: c_int = 5;
const ERR_NOT_FITTED: c_int = 6;
const ERR_INVALID_DATA: c_int = 7;

const INIT_KMEANS_PLUS_PLUS: c_int = 0;
const INIT_RANDOM: c_int = 1;

#[repr(C)]
pub struct Buf {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Non-positive numeric fields fall back to the defaults of `KMeansOptions`;
/// a negative `random_state` leaves the run unseeded.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CKMeansOptions {
    pub n_clusters: c_int,
    pub init: c_int,
    pub n_init: c_int,
    pub max_iter: c_int,
    pub tol: f64,
    pub random_state: i64,
    pub n_local_trials: c_int,
    pub cores: c_int,
    pub verbose: c_int,
}

/// `max_no_improvement`: > 0 sets it, 0 keeps the default, < 0 disables it.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CMiniBatchOptions {
    pub n_clusters: c_int,
    pub init: c_int,
    pub max_iter: c_int,
    pub batch_size: c_int,
    pub tol: f64,
    pub max_no_improvement: c_int,
    pub compute_labels: c_int,
    pub random_state: i64,
    pub n_local_trials: c_int,
    pub verbose: c_int,
}

#[cfg(all(target_arch = "wasm32", not(target_os = "wasi")))]
#[link(wasm_import_module = "env")]
unsafe extern "C" {
    fn js_log(ptr: *const u8, len: usize);
}

#[inline]
pub fn log_json<T: serde::Serialize>(v: &T) {
    if let Ok(s) = serde_json::to_string_pretty(v) {
        #[cfg(all(target_arch = "wasm32", not(target_os = "wasi")))]
        unsafe {
            js_log(s.as_ptr(), s.len());
        }

        #[cfg(not(all(target_arch = "wasm32", not(target_os = "wasi"))))]
        eprintln!("{s}");
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn alloc(size: usize) -> *mut u8 {
    if size == 0 {
        return core::ptr::null_mut();
    }
    let mut v = Vec::<u8>::with_capacity(size);
    let p = v.as_mut_ptr();
    core::mem::forget(v);
    p
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free_(ptr_raw: *mut u8, size: usize) {
    if !ptr_raw.is_null() {
        let _ = unsafe { Vec::<u8>::from_raw_parts(ptr_raw, size, size) };
    }
}

/// Batch k-means on a row-major `n_rows x n_cols` matrix. `init_ptr` may
/// point at `n_clusters x n_cols` initial centers, otherwise the `init`
/// field of the options picks the seeding.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmeans_fit(
    x_ptr: *const f64,
    n_rows: usize,
    n_cols: usize,
    init_ptr: *const f64,
    options: *const CKMeansOptions,
    out_centroids: *mut Buf,
    out_labels: *mut Buf,
    out_json: *mut Buf,
) -> c_int {
    if x_ptr.is_null() || out_centroids.is_null() || out_labels.is_null() || out_json.is_null() {
        return ERR_INVALID_ARGS;
    }
    let res = catch_unwind(AssertUnwindSafe(|| -> Result<(), c_int> {
        let x = dense_from_raw(x_ptr, n_rows, n_cols)?;
        let mut opts = build_kmeans_options(options);
        if !init_ptr.is_null() {
            let centers = dense_from_raw(init_ptr, opts.n_clusters, n_cols)?;
            opts.init = Init::Array(centers);
        }
        let fitted = k_means(&x, &opts).map_err(|e| err_code(&e))?;
        let summary = json!({
            "inertia": fitted.inertia,
            "n_iter": fitted.n_iter,
            "n_clusters": fitted.centroids.n_rows(),
            "n_features": fitted.centroids.n_cols()
        });
        write_fit(out_centroids, out_labels, out_json, &fitted.centroids, &fitted.labels, summary)
    }));
    match res {
        Ok(Ok(())) => OK,
        Ok(Err(code)) => code,
        Err(_) => ERR_PANIC,
    }
}

/// Same as `kmeans_fit` for a CSR matrix with `u32` row offsets and
/// column indices.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmeans_fit_csr(
    indptr_ptr: *const u32,
    indices_ptr: *const u32,
    data_ptr: *const f64,
    n_rows: usize,
    n_cols: usize,
    nnz: usize,
    options: *const CKMeansOptions,
    out_centroids: *mut Buf,
    out_labels: *mut Buf,
    out_json: *mut Buf,
) -> c_int {
    if indptr_ptr.is_null()
        || out_centroids.is_null()
        || out_labels.is_null()
        || out_json.is_null()
        || (nnz > 0 && (indices_ptr.is_null() || data_ptr.is_null()))
    {
        return ERR_INVALID_ARGS;
    }
    let run = || -> Result<(), c_int> {
        let indptr_len = n_rows.checked_add(1).ok_or(ERR_INVALID_ARGS)?;
        let indptr = unsafe { slice::from_raw_parts(indptr_ptr, indptr_len) };
        let (indices, data) = if nnz == 0 {
            (&[][..], &[][..])
        } else {
            (
                unsafe { slice::from_raw_parts(indices_ptr, nnz) },
                unsafe { slice::from_raw_parts(data_ptr, nnz) },
            )
        };
        let x = CsrMatrix::new(
            n_rows,
            n_cols,
            indptr.iter().map(|&v| v as usize).collect(),
            indices.iter().map(|&v| v as usize).collect(),
            data.to_vec(),
        )
        .map_err(|e| err_code(&e))?;
        let opts = build_kmeans_options(options);
        let fitted = k_means(&x, &opts).map_err(|e| err_code(&e))?;
        let summary = json!({
            "inertia": fitted.inertia,
            "n_iter": fitted.n_iter,
            "n_clusters": fitted.centroids.n_rows(),
            "n_features": fitted.centroids.n_cols()
        });
        write_fit(out_centroids, out_labels, out_json, &fitted.centroids, &fitted.labels, summary)
    };
    match catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => OK,
        Ok(Err(code)) => code,
        Err(_) => ERR_PANIC,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn minibatch_kmeans_fit(
    x_ptr: *const f64,
    n_rows: usize,
    n_cols: usize,
    options: *const CMiniBatchOptions,
    out_centroids: *mut Buf,
    out_labels: *mut Buf,
    out_json: *mut Buf,
) -> c_int {
    if x_ptr.is_null() || out_centroids.is_null() || out_labels.is_null() || out_json.is_null() {
        return ERR_INVALID_ARGS;
    }
    let res = catch_unwind(AssertUnwindSafe(|| -> Result<(), c_int> {
        let x = dense_from_raw(x_ptr, n_rows, n_cols)?;
        let mut model = MiniBatchKMeans::new(build_minibatch_options(options));
        model.fit(&x).map_err(|e| err_code(&e))?;
        let state = model.state().ok_or(ERR_NOT_FITTED)?;
        let summary = json!({
            "inertia": state.inertia,
            "n_steps": state.n_steps,
            "counts": state.counts,
            "n_clusters": state.centroids.n_rows(),
            "n_features": state.centroids.n_cols()
        });
        let labels = state.labels.as_deref().unwrap_or(&[]);
        write_fit(out_centroids, out_labels, out_json, &state.centroids, labels, summary)
    }));
    match res {
        Ok(Ok(())) => OK,
        Ok(Err(code)) => code,
        Err(_) => ERR_PANIC,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmeans_predict(
    x_ptr: *const f64,
    n_rows: usize,
    n_cols: usize,
    centers_ptr: *const f64,
    n_clusters: usize,
    out_labels: *mut Buf,
) -> c_int {
    if x_ptr.is_null() || centers_ptr.is_null() || out_labels.is_null() || n_clusters == 0 {
        return ERR_INVALID_ARGS;
    }
    let res = catch_unwind(AssertUnwindSafe(|| -> Result<(), c_int> {
        let x = dense_from_raw(x_ptr, n_rows, n_cols)?;
        let centers = dense_from_raw(centers_ptr, n_clusters, n_cols)?;
        let (labels, _) = labels_inertia(&x, &squared_norms(&x), &centers);
        write_buf(out_labels, labels_to_u8_box(&labels));
        Ok(())
    }));
    match res {
        Ok(Ok(())) => OK,
        Ok(Err(code)) => code,
        Err(_) => ERR_PANIC,
    }
}

/// Writes the `n_rows x n_clusters` Euclidean distance matrix as f64 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kmeans_transform(
    x_ptr: *const f64,
    n_rows: usize,
    n_cols: usize,
    centers_ptr: *const f64,
    n_clusters: usize,
    out_dist: *mut Buf,
) -> c_int {
    if x_ptr.is_null() || centers_ptr.is_null() || out_dist.is_null() || n_clusters == 0 {
        return ERR_INVALID_ARGS;
    }
    let res = catch_unwind(AssertUnwindSafe(|| -> Result<(), c_int> {
        let x = dense_from_raw(x_ptr, n_rows, n_cols)?;
        let centers = dense_from_raw(centers_ptr, n_clusters, n_cols)?;
        let dist = euclidean_distances(&x, &centers, None, false).map_err(|e| err_code(&e))?;
        write_buf(out_dist, f64_slice_to_u8_box(dist.as_slice()));
        Ok(())
    }));
    match res {
        Ok(Ok(())) => OK,
        Ok(Err(code)) => code,
        Err(_) => ERR_PANIC,
    }
}

fn err_code(e: &KMeansError) -> c_int {
    match e {
        KMeansError::Configuration(_) => ERR_CONFIG,
        KMeansError::DimensionMismatch { .. } => ERR_DIMENSION,
        KMeansError::NotFitted(_) => ERR_NOT_FITTED,
        KMeansError::InvalidData(_) => ERR_INVALID_DATA,
    }
}

fn dense_from_raw(p: *const f64, n_rows: usize, n_cols: usize) -> Result<DenseMatrix, c_int> {
    let len = n_rows.checked_mul(n_cols).ok_or(ERR_INVALID_ARGS)?;
    let vals = unsafe { slice::from_raw_parts(p, len) };
    DenseMatrix::new(n_rows, n_cols, vals.to_vec()).map_err(|e| err_code(&e))
}

fn write_fit(
    out_centroids: *mut Buf,
    out_labels: *mut Buf,
    out_json: *mut Buf,
    centroids: &DenseMatrix,
    labels: &[usize],
    summary: serde_json::Value,
) -> Result<(), c_int> {
    let s = serde_json::to_string(&summary).map_err(|_| ERR_PARSE)?;
    write_buf(out_centroids, f64_slice_to_u8_box(centroids.as_slice()));
    write_buf(out_labels, labels_to_u8_box(labels));
    write_buf(out_json, s.into_bytes().into_boxed_slice());
    Ok(())
}

fn f64_slice_to_u8_box(v: &[f64]) -> Box<[u8]> {
    let n = v.len() * 8;
    let mut out = Vec::<u8>::with_capacity(n);
    unsafe {
        out.set_len(n);
        ptr::copy_nonoverlapping(v.as_ptr() as *const u8, out.as_mut_ptr(), n);
    }
    out.into_boxed_slice()
}

fn labels_to_u8_box(labels: &[usize]) -> Box<[u8]> {
    let mut out = Vec::<u8>::with_capacity(labels.len() * 4);
    for &l in labels {
        out.extend_from_slice(&(l as u32).to_le_bytes());
    }
    out.into_boxed_slice()
}

#[inline]
fn pos_usize(raw: c_int, def_: usize) -> usize {
    if raw > 0 { raw as usize } else { def_ }
}

#[inline]
fn c_init(raw: c_int, def_: Init) -> Init {
    match raw {
        INIT_KMEANS_PLUS_PLUS => Init::KMeansPlusPlus,
        INIT_RANDOM => Init::Random,
        _ => def_,
    }
}

#[inline]
fn c_seed(raw: i64) -> Option<u64> {
    (raw >= 0).then_some(raw as u64)
}

fn write_buf(out: *mut Buf, bytes: Box<[u8]>) {
    let len = bytes.len();
    let ptr_bytes = Box::into_raw(bytes) as *mut u8;
    unsafe {
        ptr::write_unaligned(
            out,
            Buf {
                ptr: ptr_bytes,
                len,
            },
        )
    };
}

fn build_kmeans_options(options: *const CKMeansOptions) -> KMeansOptions {
    let d = KMeansOptions::default();
    if options.is_null() {
        return d;
    }
    let o = unsafe { *options };
    KMeansOptions {
        n_clusters: pos_usize(o.n_clusters, d.n_clusters),
        init: c_init(o.init, d.init),
        n_init: pos_usize(o.n_init, d.n_init),
        max_iter: pos_usize(o.max_iter, d.max_iter),
        tol: if o.tol.is_finite() && o.tol >= 0.0 {
            o.tol
        } else {
            d.tol
        },
        random_state: c_seed(o.random_state),
        n_local_trials: (o.n_local_trials > 0).then_some(o.n_local_trials as usize),
        cores: pos_usize(o.cores, d.cores),
        verbose: o.verbose != 0,
    }
}

fn build_minibatch_options(options: *const CMiniBatchOptions) -> MiniBatchOptions {
    let d = MiniBatchOptions::default();
    if options.is_null() {
        return d;
    }
    let o = unsafe { *options };
    let max_no_improvement = match o.max_no_improvement {
        v if v > 0 => Some(v as usize),
        0 => d.max_no_improvement,
        _ => None,
    };
    MiniBatchOptions {
        n_clusters: pos_usize(o.n_clusters, d.n_clusters),
        init: c_init(o.init, d.init),
        max_iter: pos_usize(o.max_iter, d.max_iter),
        batch_size: pos_usize(o.batch_size, d.batch_size),
        tol: if o.tol.is_finite() && o.tol >= 0.0 {
            o.tol
        } else {
            d.tol
        },
        max_no_improvement,
        compute_labels: o.compute_labels != 0,
        random_state: c_seed(o.random_state),
        n_local_trials: (o.n_local_trials > 0).then_some(o.n_local_trials as usize),
        verbose: o.verbose != 0,
    }
}
