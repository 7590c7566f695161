#![allow(clippy::needless_range_loop)]
//! Matrix decompositions and solvers.
//!
//! Cholesky (hand-rolled, with triangular solves and log-determinant),
//! modified Gram-Schmidt QR for least squares, and faer-backed
//! symmetric eigendecomposition and thin SVD.

use crate::dense::DenseMatrix;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinalgError {
    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Singular matrix encountered")]
    SingularMatrix,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Decomposition failed: {0}")]
    Decomposition(String),
}

/// Result of a Cholesky decomposition.
#[derive(Debug, Clone)]
pub struct CholeskyDecomp {
    /// Lower triangular factor L such that A = L * L'.
    pub l: DenseMatrix,
}

impl CholeskyDecomp {
    /// Compute the Cholesky decomposition of a symmetric positive definite matrix.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let n = a.nrows();
        if n != a.ncols() {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: a.ncols(),
            });
        }
        let mut l = DenseMatrix::zeros(n, n);

        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l.get(j, k) * l.get(j, k);
            }
            let diag = a.get(j, j) - sum;
            if !(diag > 0.0) || !diag.is_finite() {
                return Err(LinalgError::NotPositiveDefinite);
            }
            l.set(j, j, diag.sqrt());

            for i in (j + 1)..n {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l.get(i, k) * l.get(j, k);
                }
                l.set(i, j, (a.get(i, j) - sum) / l.get(j, j));
            }
        }

        Ok(CholeskyDecomp { l })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Solve L * y = b.
    pub fn forward_solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(b.len(), n);
        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut sum = 0.0;
            for j in 0..i {
                sum += self.l.get(i, j) * y[j];
            }
            y[i] = (b[i] - sum) / self.l.get(i, i);
        }
        y
    }

    /// Solve L' * x = y.
    pub fn backward_solve(&self, y: &[f64]) -> Vec<f64> {
        let n = self.l.nrows();
        assert_eq!(y.len(), n);
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.l.get(j, i) * x[j];
            }
            x[i] = (y[i] - sum) / self.l.get(i, i);
        }
        x
    }

    /// Solve L * L' * x = b.
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let y = self.forward_solve(b);
        self.backward_solve(&y)
    }

    /// Solve L * Y = B column by column.
    pub fn forward_solve_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        assert_eq!(b.nrows(), self.dim());
        let mut out = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            let col = self.forward_solve(&b.col(j));
            out.set_col(j, &col);
        }
        out
    }

    /// Solve L * L' * X = B column by column.
    pub fn solve_mat(&self, b: &DenseMatrix) -> DenseMatrix {
        assert_eq!(b.nrows(), self.dim());
        let mut out = DenseMatrix::zeros(b.nrows(), b.ncols());
        for j in 0..b.ncols() {
            let col = self.solve(&b.col(j));
            out.set_col(j, &col);
        }
        out
    }

    /// Sum of log diagonal entries of L, i.e. half of log|A|.
    pub fn half_log_det(&self) -> f64 {
        self.l.diag().iter().map(|d| d.ln()).sum()
    }

    /// Compute the inverse of the original matrix A^{-1} = (L L')^{-1}.
    pub fn inverse(&self) -> DenseMatrix {
        self.solve_mat(&DenseMatrix::identity(self.dim()))
    }
}

/// Result of a QR decomposition: A = Q * R.
pub struct QrDecomp {
    pub q: DenseMatrix,
    pub r: DenseMatrix,
}

impl QrDecomp {
    /// Compute the thin QR decomposition of an m x n matrix (m >= n).
    /// Uses modified Gram-Schmidt.
    pub fn new(a: &DenseMatrix) -> Result<Self, LinalgError> {
        let m = a.nrows();
        let n = a.ncols();
        if m < n {
            return Err(LinalgError::DimensionMismatch {
                expected: n,
                got: m,
            });
        }

        let mut q = DenseMatrix::zeros(m, n);
        let mut r = DenseMatrix::zeros(n, n);
        let mut cols: Vec<Vec<f64>> = (0..n).map(|j| a.col(j)).collect();
        let scale = a.max_abs().max(1.0);

        for j in 0..n {
            for i in 0..j {
                let q_col = q.col(i);
                let rij = DenseMatrix::dot(&q_col, &cols[j]);
                r.set(i, j, rij);
                for k in 0..m {
                    cols[j][k] -= rij * q_col[k];
                }
            }

            let norm = DenseMatrix::dot(&cols[j], &cols[j]).sqrt();
            if norm < 1e-12 * scale {
                return Err(LinalgError::SingularMatrix);
            }
            r.set(j, j, norm);
            for k in 0..m {
                q.set(k, j, cols[j][k] / norm);
            }
        }

        Ok(QrDecomp { q, r })
    }

    /// Solve R * x = Q' * b (least squares).
    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let n = self.r.nrows();
        let qtb = self.q.t_mat_vec(b);

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = 0.0;
            for j in (i + 1)..n {
                sum += self.r.get(i, j) * x[j];
            }
            x[i] = (qtb[i] - sum) / self.r.get(i, i);
        }
        x
    }
}

/// Least-squares solution of A x ~ b.
pub fn lstsq(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    if a.nrows() != b.len() {
        return Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            got: b.len(),
        });
    }
    Ok(QrDecomp::new(a)?.solve(b))
}

/// Eigendecomposition of a symmetric matrix, A = U diag(values) U'.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    /// Eigenvalues in ascending order.
    pub values: Vec<f64>,
    /// Eigenvectors, one per column, matching `values`.
    pub vectors: DenseMatrix,
}

/// Compute all eigenpairs of a symmetric matrix.
pub fn symmetric_eigen(a: &DenseMatrix) -> Result<SymmetricEigen, LinalgError> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(LinalgError::DimensionMismatch {
            expected: n,
            got: a.ncols(),
        });
    }
    let evd = a
        .as_faer()
        .self_adjoint_eigen(faer::Side::Lower)
        .map_err(|e| LinalgError::Decomposition(format!("{e:?}")))?;
    let s = evd.S().column_vector();
    let u = evd.U();
    let values: Vec<f64> = (0..n).map(|i| s[i]).collect();
    let vectors = DenseMatrix::from_fn(n, n, |i, j| u[(i, j)]);
    Ok(SymmetricEigen { values, vectors })
}

/// Thin singular value decomposition, A = U diag(s) V'.
#[derive(Debug, Clone)]
pub struct ThinSvd {
    /// Left singular vectors (n x k).
    pub u: DenseMatrix,
    /// Singular values in descending order.
    pub s: Vec<f64>,
    /// Right singular vectors (p x k).
    pub v: DenseMatrix,
}

/// Compute the thin SVD of a dense matrix.
pub fn thin_svd(a: &DenseMatrix) -> Result<ThinSvd, LinalgError> {
    let k = a.nrows().min(a.ncols());
    if k == 0 {
        return Ok(ThinSvd {
            u: DenseMatrix::zeros(a.nrows(), 0),
            s: Vec::new(),
            v: DenseMatrix::zeros(a.ncols(), 0),
        });
    }
    let svd = a
        .as_faer()
        .thin_svd()
        .map_err(|e| LinalgError::Decomposition(format!("{e:?}")))?;
    let s = svd.S().column_vector();
    let (u, v) = (svd.U(), svd.V());
    Ok(ThinSvd {
        u: DenseMatrix::from_fn(a.nrows(), k, |i, j| u[(i, j)]),
        s: (0..k).map(|i| s[i]).collect(),
        v: DenseMatrix::from_fn(a.ncols(), k, |i, j| v[(i, j)]),
    })
}

/// Solve a symmetric positive definite system A*x = b using Cholesky.
pub fn solve_spd(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.solve(b))
}

/// Compute the inverse of a symmetric positive definite matrix.
pub fn inverse_spd(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let chol = CholeskyDecomp::new(a)?;
    Ok(chol.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cholesky() {
        // A = [[4, 2], [2, 3]]
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        // L = [[2, 0], [1, sqrt(2)]]
        assert_abs_diff_eq!(chol.l.get(0, 0), 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(chol.l.get(1, 0), 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(chol.l.get(1, 1), 2.0f64.sqrt(), epsilon = 1e-10);
        assert_abs_diff_eq!(chol.half_log_det(), 0.5 * 8.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_cholesky_solve() {
        let a = DenseMatrix::from_row_major(3, 3, &[4.0, 2.0, 1.0, 2.0, 5.0, 3.0, 1.0, 3.0, 6.0]);
        let b = vec![1.0, 2.0, 3.0];
        let chol = CholeskyDecomp::new(&a).unwrap();
        let x = chol.solve(&b);
        let ax = a.mat_vec(&x);
        for i in 0..3 {
            assert!(
                (ax[i] - b[i]).abs() < 1e-10,
                "ax[{}]={} != b[{}]={}",
                i,
                ax[i],
                i,
                b[i]
            );
        }
    }

    #[test]
    fn test_forward_solve_mat() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let chol = CholeskyDecomp::new(&a).unwrap();
        let b = DenseMatrix::from_row_major(2, 2, &[1.0, 0.0, 2.0, 1.0]);
        let y = chol.forward_solve_mat(&b);
        let back = chol.l.mat_mul(&y);
        for i in 0..2 {
            for j in 0..2 {
                assert!((back.get(i, j) - b.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_cholesky_not_pd() {
        let a = DenseMatrix::from_row_major(2, 2, &[1.0, 3.0, 3.0, 1.0]);
        assert!(matches!(
            CholeskyDecomp::new(&a),
            Err(LinalgError::NotPositiveDefinite)
        ));
    }

    #[test]
    fn test_qr_solve() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let b = vec![1.0, 2.0, 2.0];
        let x = lstsq(&a, &b).unwrap();
        // Normal equations: A'Ax = A'b
        let atax = a.t_mat_mul(&a).mat_vec(&x);
        let atb = a.t_mat_vec(&b);
        for i in 0..2 {
            assert!((atax[i] - atb[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_qr_rank_deficient() {
        let a = DenseMatrix::from_row_major(3, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(QrDecomp::new(&a).is_err());
    }

    #[test]
    fn test_symmetric_eigen_reconstructs() {
        let a = DenseMatrix::from_row_major(3, 3, &[2.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 4.0]);
        let eig = symmetric_eigen(&a).unwrap();
        assert!(eig.values.windows(2).all(|w| w[0] <= w[1]));
        let rebuilt = eig
            .vectors
            .scale_cols(&eig.values)
            .mat_mul(&eig.vectors.transpose());
        for i in 0..3 {
            for j in 0..3 {
                assert!((rebuilt.get(i, j) - a.get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_thin_svd_reconstructs() {
        let a = DenseMatrix::from_row_major(4, 2, &[1.0, 0.5, 2.0, -1.0, 0.0, 3.0, 1.0, 1.0]);
        let svd = thin_svd(&a).unwrap();
        assert_eq!(svd.s.len(), 2);
        assert!(svd.s[0] >= svd.s[1]);
        let rebuilt = svd.u.scale_cols(&svd.s).mat_mul(&svd.v.transpose());
        for i in 0..4 {
            for j in 0..2 {
                assert!((rebuilt.get(i, j) - a.get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_inverse_spd() {
        let a = DenseMatrix::from_row_major(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let inv = inverse_spd(&a).unwrap();
        let prod = a.mat_mul(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (prod.get(i, j) - expected).abs() < 1e-10,
                    "A*A^{{-1}}[{},{}] = {}, expected {}",
                    i,
                    j,
                    prod.get(i, j),
                    expected
                );
            }
        }
    }
}
