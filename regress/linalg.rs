//! Symmetric eigen-decomposition helpers.
//!
//! The information matrices accumulated by the engines are symmetric positive
//! semi-definite by construction, but they are frequently singular (collinear
//! features, an all-zero column, a single row). Every inverse in this crate is
//! therefore a pseudo-inverse taken from the eigen-decomposition, with the
//! near-zero part of the spectrum dropped.

use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};

/// Eigenpairs of a symmetric matrix, decomposed from its lower triangle.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub eigenvalues: Array1<f64>,
    /// Column `j` is the eigenvector for `eigenvalues[j]`.
    pub eigenvectors: Array2<f64>,
}

impl SymmetricEigen {
    /// Decomposes `matrix`, reading only its lower triangle. Matrices that
    /// were accumulated lower-triangle-only are therefore valid input.
    pub fn new(matrix: &Array2<f64>) -> Result<Self, LinalgError> {
        let (eigenvalues, eigenvectors) = matrix.eigh(UPLO::Lower)?;
        Ok(Self {
            eigenvalues,
            eigenvectors,
        })
    }

    pub fn max_eigenvalue(&self) -> f64 {
        self.eigenvalues
            .iter()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v))
    }

    pub fn min_eigenvalue(&self) -> f64 {
        self.eigenvalues
            .iter()
            .fold(f64::INFINITY, |acc, &v| acc.min(v))
    }

    /// Eigenvalues at or below this threshold are treated as zero.
    pub fn rank_tolerance(&self) -> f64 {
        let n = self.eigenvalues.len() as f64;
        (n * self.max_eigenvalue() * f64::EPSILON).max(0.0)
    }

    /// Number of eigenvalues kept by the pseudo-inverse.
    pub fn rank(&self) -> usize {
        let tol = self.rank_tolerance();
        self.eigenvalues.iter().filter(|&&v| v > tol).count()
    }

    /// Moore-Penrose pseudo-inverse `V diag(1/lambda) V'` over the retained
    /// spectrum.
    pub fn pseudo_inverse(&self) -> Array2<f64> {
        let tol = self.rank_tolerance();
        let inverted = self
            .eigenvalues
            .mapv(|v| if v > tol { 1.0 / v } else { 0.0 });
        let scaled = &self.eigenvectors * &inverted.insert_axis(Axis(0));
        scaled.dot(&self.eigenvectors.t())
    }

    /// Ratio of the largest to the smallest eigenvalue.
    ///
    /// Slightly negative eigenvalues from round-off are read as zero, which
    /// makes the ratio infinite. A matrix without a positive eigenvalue also
    /// reports infinity.
    pub fn condition_number(&self) -> f64 {
        let numerator = self.max_eigenvalue();
        let denominator = self.min_eigenvalue().max(0.0);
        if numerator <= 0.0 {
            return f64::INFINITY;
        }
        numerator / denominator
    }
}
