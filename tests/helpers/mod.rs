// tests/helpers.rs
use kclust::kmeans::DenseMatrix;

#[allow(dead_code)]
/// Deterministic LCG stream of uniform values in [0, 1).
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed | 1)
    }

    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64) * (1.0 / (1u64 << 53) as f64)
    }

    /// Standard normal draw (Box-Muller).
    pub fn next_normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-300);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

#[allow(dead_code)]
/// `per_blob` points around each center with isotropic spread `sigma`.
/// Returns the matrix and the blob index of every row.
pub fn make_blobs(
    centers: &[Vec<f64>],
    per_blob: usize,
    sigma: f64,
    seed: u64,
) -> (DenseMatrix, Vec<usize>) {
    let mut rng = Lcg::new(seed);
    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(centers.len() * per_blob);
    let mut truth = Vec::with_capacity(centers.len() * per_blob);
    for _ in 0..per_blob {
        for (b, c) in centers.iter().enumerate() {
            rows.push(c.iter().map(|v| v + sigma * rng.next_normal()).collect());
            truth.push(b);
        }
    }
    (DenseMatrix::from_rows(&rows).unwrap(), truth)
}

#[allow(dead_code)]
/// Index of the closest entry of `centers` to `p`.
pub fn closest(centers: &[Vec<f64>], p: &[f64]) -> usize {
    let mut best = 0usize;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d: f64 = c.iter().zip(p).map(|(a, b)| (a - b) * (a - b)).sum();
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Check two numbers are close within a simple absolute tolerance.
#[allow(dead_code)]
pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

/// Four corners of a square, far apart.
#[allow(dead_code)]
pub fn square_centers(side: f64) -> Vec<Vec<f64>> {
    vec![
        vec![0.0, 0.0],
        vec![side, 0.0],
        vec![0.0, side],
        vec![side, side],
    ]
}

/// Same labels up to a renaming of the clusters.
#[allow(dead_code)]
pub fn same_partition(a: &[usize], b: &[usize]) -> bool {
    use std::collections::HashMap;
    if a.len() != b.len() {
        return false;
    }
    let mut fwd: HashMap<usize, usize> = HashMap::new();
    let mut bwd: HashMap<usize, usize> = HashMap::new();
    for (&x, &y) in a.iter().zip(b) {
        if *fwd.entry(x).or_insert(y) != y || *bwd.entry(y).or_insert(x) != x {
            return false;
        }
    }
    true
}
