//! Rank-r factorization of the EP site precisions.
//!
//! With `K = s2b Q S Q' + s2e I` and site precisions `tau`, the joint
//! precision involves `(K + diag(1/tau))^{-1}`. Writing
//! `A = tau / (1 + tau s2e)` and `C = 1 / (1 + tau s2e)`, Woodbury gives
//!
//! ```text
//! (K + diag(1/tau))^{-1} = A - A Q B^{-1} Q' A,   B = Q' diag(A) Q + diag(1/(s2b S))
//! ```
//!
//! so only the r x r matrix B is ever factored.

use lim_linalg::{CholeskyDecomp, DenseMatrix};

use crate::error::{InferenceError, Result};

#[derive(Debug, Clone)]
pub struct SiteFactor {
    /// `tau / (1 + tau s2e)`.
    pub a: Vec<f64>,
    /// `1 / (1 + tau s2e)`.
    pub c: Vec<f64>,
    /// Cholesky factor of B.
    pub chol: CholeskyDecomp,
    /// Diagonal of `Q B^{-1} Q'`.
    pub q: Vec<f64>,
}

impl SiteFactor {
    pub fn new(
        q0: &DenseMatrix,
        s0: &[f64],
        site_tau: &[f64],
        sigma2_b: f64,
        sigma2_e: f64,
    ) -> Result<Self> {
        if !(sigma2_b > 0.0) || !sigma2_b.is_finite() {
            return Err(InferenceError::InvalidHyperparameter {
                name: "sigma2_b",
                value: sigma2_b,
            });
        }
        let a: Vec<f64> = site_tau.iter().map(|t| t / (1.0 + t * sigma2_e)).collect();
        let c: Vec<f64> = site_tau.iter().map(|t| 1.0 / (1.0 + t * sigma2_e)).collect();

        let mut b = q0.t_mat_mul(&q0.scale_rows(&a));
        for (k, s) in s0.iter().enumerate() {
            let v = b.get(k, k) + 1.0 / (sigma2_b * s);
            b.set(k, k, v);
        }
        let chol = CholeskyDecomp::new(&b)?;

        // q_i = || L^{-1} Q_i' ||^2
        let w = chol.forward_solve_mat(&q0.transpose());
        let mut q = vec![0.0; q0.nrows()];
        for (i, qi) in q.iter_mut().enumerate() {
            let mut s = 0.0;
            for k in 0..w.nrows() {
                let x = w.get(k, i);
                s += x * x;
            }
            *qi = s;
        }

        Ok(Self { a, c, chol, q })
    }

    /// `Q B^{-1} Q' x`.
    pub fn qbiqt(&self, q0: &DenseMatrix, x: &[f64]) -> Vec<f64> {
        q0.mat_vec(&self.chol.solve(&q0.t_mat_vec(x)))
    }

    /// `Q B^{-1} Q' X` for every column of X.
    pub fn qbiqt_mat(&self, q0: &DenseMatrix, x: &DenseMatrix) -> DenseMatrix {
        q0.mat_mul(&self.chol.solve_mat(&q0.t_mat_mul(x)))
    }

    /// `E x = A x - A Q B^{-1} Q' A x`, i.e. `(K + diag(1/tau))^{-1} x`.
    pub fn precision_apply(&self, q0: &DenseMatrix, x: &[f64]) -> Vec<f64> {
        let ax: Vec<f64> = self.a.iter().zip(x).map(|(a, v)| a * v).collect();
        let inner = self.qbiqt(q0, &ax);
        ax.iter()
            .zip(inner.iter().zip(self.a.iter()))
            .map(|(ax, (w, a))| ax - a * w)
            .collect()
    }

    /// `sum log diag L`, half the log-determinant of B.
    pub fn half_log_det(&self) -> f64 {
        self.chol.half_log_det()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lim_linalg::decomposition::inverse_spd;

    #[test]
    fn test_precision_apply_matches_dense_inverse() {
        let q0 = DenseMatrix::from_row_major(3, 2, &[0.6, 0.0, 0.8, 0.0, 0.0, 1.0]);
        let s0 = [2.0, 0.5];
        let tau = [0.7, 1.3, 2.2];
        let (s2b, s2e) = (1.4, 0.3);
        let f = SiteFactor::new(&q0, &s0, &tau, s2b, s2e).unwrap();

        let mut dense = q0.scale_cols(&s0).mat_mul(&q0.transpose()).scale(s2b);
        for i in 0..3 {
            let v = dense.get(i, i) + s2e + 1.0 / tau[i];
            dense.set(i, i, v);
        }
        let inv = inverse_spd(&dense).unwrap();
        let x = [0.3, -1.0, 0.5];
        let fast = f.precision_apply(&q0, &x);
        let slow = inv.mat_vec(&x);
        for i in 0..3 {
            assert!((fast[i] - slow[i]).abs() < 1e-12);
        }

        // q_i is the diagonal of Q B^{-1} Q'
        let e0 = f.qbiqt(&q0, &[1.0, 0.0, 0.0]);
        assert!((e0[0] - f.q[0]).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_genetic_variance() {
        let q0 = DenseMatrix::identity(2);
        let err = SiteFactor::new(&q0, &[1.0, 1.0], &[1.0, 1.0], 0.0, 1.0).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidHyperparameter { .. }));
    }
}
