#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major `Mat<f64>` with the handful of operations
//! the inference code leans on: products against eigenvector blocks,
//! transposed products, row scaling and column access.

use faer::Mat;

/// A dense matrix wrapper around faer's `Mat<f64>`.
#[derive(Debug, Clone)]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a new dense matrix filled with a constant value.
    pub fn full(nrows: usize, ncols: usize, value: f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, |_, _| value),
        }
    }

    /// Create a matrix from a closure over `(row, col)`.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Create a dense matrix from a flat vec (column-major order).
    pub fn from_col_major(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i]);
        Self { inner }
    }

    /// Create a dense matrix from a flat slice in row-major order.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Create a matrix from a list of equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let nrows = rows.len();
        let ncols = rows.first().map_or(0, |r| r.len());
        assert!(rows.iter().all(|r| r.len() == ncols));
        let inner = Mat::from_fn(nrows, ncols, |i, j| rows[i][j]);
        Self { inner }
    }

    /// Create an identity matrix of size n x n.
    pub fn identity(n: usize) -> Self {
        let inner = Mat::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
        Self { inner }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    /// Get element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner[(row, col)]
    }

    /// Set element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner[(row, col)] = value;
    }

    /// Get a reference to the underlying faer matrix.
    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// Matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            for i in 0..n {
                result[i] += self.inner[(i, j)] * vj;
            }
        }
        result
    }

    /// Transposed matrix-vector product: self' * v.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; self.ncols()];
        for j in 0..self.ncols() {
            let mut s = 0.0;
            for i in 0..n {
                s += self.inner[(i, j)] * v[i];
            }
            result[j] = s;
        }
        result
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        let result = &self.inner * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Transposed product: self' * other.
    pub fn t_mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        let result = self.inner.transpose() * &other.inner;
        DenseMatrix { inner: result }
    }

    /// Transpose.
    pub fn transpose(&self) -> DenseMatrix {
        let inner = self.inner.transpose().to_owned();
        DenseMatrix { inner }
    }

    /// Extract column as a Vec<f64>.
    pub fn col(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.inner[(i, j)]).collect()
    }

    /// Extract row as a Vec<f64>.
    pub fn row(&self, i: usize) -> Vec<f64> {
        (0..self.ncols()).map(|j| self.inner[(i, j)]).collect()
    }

    /// Set an entire column from a slice.
    pub fn set_col(&mut self, j: usize, data: &[f64]) {
        assert_eq!(data.len(), self.nrows());
        for i in 0..self.nrows() {
            self.inner[(i, j)] = data[i];
        }
    }

    /// Keep only the listed columns, in the given order.
    pub fn select_cols(&self, cols: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), cols.len(), |i, k| self.inner[(i, cols[k])]);
        DenseMatrix { inner }
    }

    /// Keep only the listed rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(rows.len(), self.ncols(), |k, j| self.inner[(rows[k], j)]);
        DenseMatrix { inner }
    }

    /// Horizontal concatenation: [self, other].
    pub fn hstack(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        let p = self.ncols();
        let inner = Mat::from_fn(self.nrows(), p + other.ncols(), |i, j| {
            if j < p {
                self.inner[(i, j)]
            } else {
                other.inner[(i, j - p)]
            }
        });
        DenseMatrix { inner }
    }

    /// diag(w) * self, scaling row i by w[i].
    pub fn scale_rows(&self, w: &[f64]) -> DenseMatrix {
        assert_eq!(w.len(), self.nrows());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| w[i] * self.inner[(i, j)]);
        DenseMatrix { inner }
    }

    /// self * diag(w), scaling column j by w[j].
    pub fn scale_cols(&self, w: &[f64]) -> DenseMatrix {
        assert_eq!(w.len(), self.ncols());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| self.inner[(i, j)] * w[j]);
        DenseMatrix { inner }
    }

    /// Scalar multiplication.
    pub fn scale(&self, s: f64) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| self.inner[(i, j)] * s);
        DenseMatrix { inner }
    }

    /// Element-wise addition: self + other.
    pub fn add(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| {
            self.inner[(i, j)] + other.inner[(i, j)]
        });
        DenseMatrix { inner }
    }

    /// Add `value` to every diagonal entry in place.
    pub fn add_to_diag(&mut self, value: f64) {
        let n = self.nrows().min(self.ncols());
        for i in 0..n {
            self.inner[(i, i)] += value;
        }
    }

    /// Diagonal of a square matrix.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.inner[(i, i)]).collect()
    }

    /// Largest absolute entry (0 for an empty matrix).
    pub fn max_abs(&self) -> f64 {
        let mut m: f64 = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                m = m.max(self.inner[(i, j)].abs());
            }
        }
        m
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                if !self.inner[(i, j)].is_finite() {
                    return false;
                }
            }
        }
        true
    }

    /// Dot product of two slices.
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

}

impl std::fmt::Display for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.nrows() {
            for j in 0..self.ncols() {
                if j > 0 {
                    write!(f, "\t")?;
                }
                write!(f, "{:.6}", self.inner[(i, j)])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let m = DenseMatrix::zeros(3, 4);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 4);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn test_mat_vec_and_transpose_product() {
        let a = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.mat_vec(&[1.0, 0.0, -1.0]), vec![-2.0, -2.0]);
        assert_eq!(a.t_mat_vec(&[1.0, 1.0]), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_mat_mul() {
        let a = DenseMatrix::from_row_major(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DenseMatrix::from_row_major(3, 2, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.mat_mul(&b);
        assert_eq!(c.nrows(), 2);
        assert_eq!(c.ncols(), 2);
        assert!((c.get(0, 0) - 58.0).abs() < 1e-10);
        assert!((c.get(0, 1) - 64.0).abs() < 1e-10);
        assert!((c.get(1, 0) - 139.0).abs() < 1e-10);
        assert!((c.get(1, 1) - 154.0).abs() < 1e-10);
    }

    #[test]
    fn test_t_mat_mul_matches_explicit_transpose() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DenseMatrix::from_row_major(3, 2, &[0.5, -1.0, 2.0, 0.0, 1.0, 1.0]);
        let fast = a.t_mat_mul(&b);
        let slow = a.transpose().mat_mul(&b);
        for i in 0..2 {
            for j in 0..2 {
                assert!((fast.get(i, j) - slow.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_hstack_and_select() {
        let a = DenseMatrix::from_row_major(2, 1, &[1.0, 2.0]);
        let b = DenseMatrix::from_row_major(2, 2, &[3.0, 4.0, 5.0, 6.0]);
        let c = a.hstack(&b);
        assert_eq!(c.row(1), vec![2.0, 5.0, 6.0]);
        assert_eq!(c.select_cols(&[2, 0]).col(0), vec![4.0, 6.0]);
        assert_eq!(c.select_rows(&[1]).row(0), vec![2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_row_scaling() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let s = a.scale_rows(&[2.0, 0.5]);
        assert_eq!(s.row(0), vec![2.0, 4.0]);
        assert_eq!(s.row(1), vec![1.5, 2.0]);
    }

    #[test]
    fn test_is_finite() {
        let mut a = DenseMatrix::identity(2);
        assert!(a.is_finite());
        a.set(1, 0, f64::NAN);
        assert!(!a.is_finite());
    }
}
