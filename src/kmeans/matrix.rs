use serde::Serialize;

use crate::kmeans::error::{KMeansError, Result};

/// Borrowed view of one sample, either a dense slice or the non-zero
/// entries of a CSR row (indices sorted ascending).
#[derive(Clone, Copy, Debug)]
pub enum RowView<'a> {
    Dense(&'a [f64]),
    Sparse {
        indices: &'a [usize],
        values: &'a [f64],
    },
}

impl<'a> RowView<'a> {
    #[inline]
    pub fn squared_norm(&self) -> f64 {
        let vs = match *self {
            RowView::Dense(v) => v,
            RowView::Sparse { values, .. } => values,
        };
        vs.iter().map(|v| v * v).sum()
    }

    #[inline]
    pub fn dot_dense(&self, other: &[f64]) -> f64 {
        match *self {
            RowView::Dense(v) => v.iter().zip(other).map(|(a, b)| a * b).sum(),
            RowView::Sparse { indices, values } => indices
                .iter()
                .zip(values)
                .map(|(&j, v)| v * other[j])
                .sum(),
        }
    }

    pub fn dot(&self, other: &RowView<'_>) -> f64 {
        match (*self, *other) {
            (_, RowView::Dense(b)) => self.dot_dense(b),
            (RowView::Dense(a), sparse) => sparse.dot_dense(a),
            (
                RowView::Sparse {
                    indices: ia,
                    values: va,
                },
                RowView::Sparse {
                    indices: ib,
                    values: vb,
                },
            ) => {
                let (mut p, mut q) = (0usize, 0usize);
                let mut s = 0.0;
                while p < ia.len() && q < ib.len() {
                    if ia[p] == ib[q] {
                        s += va[p] * vb[q];
                        p += 1;
                        q += 1;
                    } else if ia[p] < ib[q] {
                        p += 1;
                    } else {
                        q += 1;
                    }
                }
                s
            }
        }
    }

    /// Exact coordinate-wise squared distance to a dense vector.
    pub fn squared_distance_dense(&self, other: &[f64]) -> f64 {
        match *self {
            RowView::Dense(v) => v
                .iter()
                .zip(other)
                .map(|(a, b)| {
                    let d = a - b;
                    d * d
                })
                .sum(),
            RowView::Sparse { indices, values } => {
                let mut s: f64 = other.iter().map(|b| b * b).sum();
                for (&j, &a) in indices.iter().zip(values) {
                    let b = other[j];
                    s += (a - b) * (a - b) - b * b;
                }
                s.max(0.0)
            }
        }
    }

    pub fn squared_distance(&self, other: &RowView<'_>) -> f64 {
        match (*self, *other) {
            (_, RowView::Dense(b)) => self.squared_distance_dense(b),
            (RowView::Dense(a), sparse) => sparse.squared_distance_dense(a),
            (
                RowView::Sparse {
                    indices: ia,
                    values: va,
                },
                RowView::Sparse {
                    indices: ib,
                    values: vb,
                },
            ) => {
                let (mut p, mut q) = (0usize, 0usize);
                let mut s = 0.0;
                while p < ia.len() || q < ib.len() {
                    let d = if q >= ib.len() || (p < ia.len() && ia[p] < ib[q]) {
                        p += 1;
                        va[p - 1]
                    } else if p >= ia.len() || ib[q] < ia[p] {
                        q += 1;
                        vb[q - 1]
                    } else {
                        p += 1;
                        q += 1;
                        va[p - 1] - vb[q - 1]
                    };
                    s += d * d;
                }
                s
            }
        }
    }

    #[inline]
    pub fn add_to(&self, acc: &mut [f64]) {
        match *self {
            RowView::Dense(v) => {
                for (a, x) in acc.iter_mut().zip(v) {
                    *a += x;
                }
            }
            RowView::Sparse { indices, values } => {
                for (&j, x) in indices.iter().zip(values) {
                    acc[j] += x;
                }
            }
        }
    }

    pub fn to_dense(&self, n_cols: usize) -> Vec<f64> {
        match *self {
            RowView::Dense(v) => v.to_vec(),
            RowView::Sparse { indices, values } => {
                let mut out = vec![0.0; n_cols];
                for (&j, &x) in indices.iter().zip(values) {
                    out[j] = x;
                }
                out
            }
        }
    }
}

/// Read-only sample matrix as seen by the clustering code.
pub trait Dataset: Sync {
    fn n_rows(&self) -> usize;

    fn n_cols(&self) -> usize;

    fn row(&self, i: usize) -> RowView<'_>;

    fn is_sparse(&self) -> bool {
        false
    }

    fn squared_norm(&self, i: usize) -> f64 {
        self.row(i).squared_norm()
    }

    fn to_dense(&self) -> DenseMatrix {
        let d = self.n_cols();
        let mut data = Vec::with_capacity(self.n_rows() * d);
        for i in 0..self.n_rows() {
            data.extend(self.row(i).to_dense(d));
        }
        DenseMatrix {
            n_rows: self.n_rows(),
            n_cols: d,
            data,
        }
    }

    /// Owned copy with `means` subtracted from every row, for layouts where
    /// centering keeps the representation. `None` means "iterate as is".
    fn centered(&self, _means: &[f64]) -> Option<DenseMatrix> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DenseMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn new(n_rows: usize, n_cols: usize, data: Vec<f64>) -> Result<Self> {
        if n_rows.checked_mul(n_cols) != Some(data.len()) {
            return Err(KMeansError::InvalidData(format!(
                "buffer of length {} cannot hold a {}x{} matrix",
                data.len(),
                n_rows,
                n_cols
            )));
        }
        Ok(Self {
            n_rows,
            n_cols,
            data,
        })
    }

    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            data: vec![0.0; n_rows * n_cols],
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for (i, r) in rows.iter().enumerate() {
            if r.len() != n_cols {
                return Err(KMeansError::InvalidData(format!(
                    "row {} has {} values, expected {}",
                    i,
                    r.len(),
                    n_cols
                )));
            }
            data.extend_from_slice(r);
        }
        Ok(Self {
            n_rows: rows.len(),
            n_cols,
            data,
        })
    }

    #[inline]
    pub fn row_slice(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n_cols + j]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row_slice(i))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(|r| r.to_vec()).collect()
    }

    pub(crate) fn shift_rows(&mut self, offset: &[f64], sign: f64) {
        for i in 0..self.n_rows {
            for (v, o) in self.row_mut(i).iter_mut().zip(offset) {
                *v += sign * o;
            }
        }
    }
}

impl Dataset for DenseMatrix {
    #[inline]
    fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    fn row(&self, i: usize) -> RowView<'_> {
        RowView::Dense(self.row_slice(i))
    }

    fn to_dense(&self) -> DenseMatrix {
        self.clone()
    }

    fn centered(&self, means: &[f64]) -> Option<DenseMatrix> {
        let mut out = self.clone();
        out.shift_rows(means, -1.0);
        Some(out)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        if n_rows.checked_add(1) != Some(indptr.len()) || indptr[0] != 0 {
            return Err(KMeansError::InvalidData(format!(
                "indptr must have n_rows + 1 = {} entries starting at 0, got {}",
                n_rows.saturating_add(1),
                indptr.len()
            )));
        }
        if indices.len() != data.len() || indptr[n_rows] != data.len() {
            return Err(KMeansError::InvalidData(format!(
                "indptr ends at {} but there are {} indices and {} values",
                indptr[n_rows],
                indices.len(),
                data.len()
            )));
        }
        // whole indptr first, rows are sliced below
        if let Some(i) = indptr.windows(2).position(|w| w[0] > w[1]) {
            return Err(KMeansError::InvalidData(format!(
                "indptr decreases at row {}",
                i
            )));
        }
        for (i, w) in indptr.windows(2).enumerate() {
            let row = &indices[w[0]..w[1]];
            if row.iter().any(|&j| j >= n_cols) {
                return Err(KMeansError::InvalidData(format!(
                    "row {} has a column index >= {}",
                    i, n_cols
                )));
            }
            if row.windows(2).any(|p| p[0] >= p[1]) {
                return Err(KMeansError::InvalidData(format!(
                    "column indices of row {} are not strictly increasing",
                    i
                )));
            }
        }
        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        })
    }

    pub fn from_dense(m: &DenseMatrix) -> Self {
        let mut indptr = Vec::with_capacity(m.n_rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for r in m.rows() {
            for (j, &v) in r.iter().enumerate() {
                if v != 0.0 {
                    indices.push(j);
                    data.push(v);
                }
            }
            indptr.push(data.len());
        }
        Self {
            n_rows: m.n_rows,
            n_cols: m.n_cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }
}

impl Dataset for CsrMatrix {
    #[inline]
    fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    fn row(&self, i: usize) -> RowView<'_> {
        let (a, b) = (self.indptr[i], self.indptr[i + 1]);
        RowView::Sparse {
            indices: &self.indices[a..b],
            values: &self.data[a..b],
        }
    }

    fn is_sparse(&self) -> bool {
        true
    }
}
