//! Heteroscedasticity-robust (sandwich) variance for a fitted logistic model.
//!
//! The coefficient vector is fixed and supplied with every observation. One
//! pass accumulates the "bread" information matrix `X'AX` and the "meat"
//! outer product of per-observation score vectors; the variance is
//! `bread^+ * meat * bread^+`.

use crate::diagnostics::RobustVarianceResult;
use crate::linalg::SymmetricEigen;
use crate::state::{
    DiagnosticState, FitStatus, RegressionError, TransitionState, add_outer, add_outer_lower,
    all_finite, ensure_row_width, label_sign, matrix_finite, same_values, sigma,
    width_is_representable, zero_matrix,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobustState {
    pub iteration: u32,
    pub width_of_x: usize,
    pub coef: Array1<f64>,

    pub num_rows: u64,
    /// Lower triangle only.
    pub x_transp_ax: Array2<f64>,
    pub meat: Array2<f64>,
    pub status: FitStatus,

    /// Sandwich variance, filled by `finalize`.
    pub variance: Array2<f64>,
}

impl RobustState {
    pub fn with_coef(coef: Array1<f64>) -> Self {
        let width_of_x = coef.len();
        Self {
            iteration: 0,
            width_of_x,
            coef,
            num_rows: 0,
            x_transp_ax: zero_matrix(width_of_x),
            meat: zero_matrix(width_of_x),
            status: FitStatus::InProcess,
            variance: Array2::zeros((0, 0)),
        }
    }

    pub fn reset(&mut self) {
        self.num_rows = 0;
        self.x_transp_ax.fill(0.0);
        self.meat.fill(0.0);
    }

    fn terminate(mut self, reason: &str) -> Self {
        log::error!("Robust variance computation terminated: {}", reason);
        self.status = FitStatus::Terminated;
        self.variance = Array2::from_elem((self.width_of_x, self.width_of_x), f64::NAN);
        self.iteration += 1;
        self
    }
}

impl TransitionState for RobustState {
    type Output = RobustVarianceResult;

    fn width_of_x(&self) -> usize {
        self.width_of_x
    }

    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn status(&self) -> FitStatus {
        self.status
    }

    fn set_status(&mut self, status: FitStatus) {
        self.status = status;
    }

    fn ensure_compatible(&self, other: &Self) -> Result<(), RegressionError> {
        if !same_values(self.coef.view(), other.coef.view()) {
            return Err(RegressionError::CoefficientMismatch);
        }
        Ok(())
    }

    fn absorb(&mut self, other: &Self) {
        self.num_rows += other.num_rows;
        self.x_transp_ax += &other.x_transp_ax;
        self.meat += &other.meat;
        self.status = self.status.escalate(other.status);
    }

    fn finalize(mut self) -> Option<Self> {
        if self.num_rows == 0 {
            return None;
        }
        if self.status.is_terminated() {
            return Some(self.terminate("a transition step flagged non-finite input"));
        }
        if !matrix_finite(&self.x_transp_ax) || !matrix_finite(&self.meat) {
            return Some(self.terminate(
                "over- or underflow in intermediate calculation; input data is likely of poor numerical condition",
            ));
        }

        let bread = match SymmetricEigen::new(&self.x_transp_ax) {
            Ok(eigen) => eigen.pseudo_inverse(),
            Err(err) => {
                let reason = format!("eigendecomposition of X'AX failed: {err}");
                return Some(self.terminate(&reason));
            }
        };
        self.variance = bread.dot(&self.meat).dot(&bread);
        self.iteration += 1;
        Some(self)
    }

    fn result(&self) -> Result<Option<RobustVarianceResult>, RegressionError> {
        if self.num_rows == 0 {
            return Ok(None);
        }
        if self.iteration == 0 {
            return Err(RegressionError::NotFinalized);
        }
        Ok(Some(RobustVarianceResult::from_variance_diagonal(
            self.coef.view(),
            self.variance.diag(),
            self.status,
        )))
    }
}

impl DiagnosticState for RobustState {
    fn transition(
        &mut self,
        label: bool,
        x: ArrayView1<'_, f64>,
        coef: ArrayView1<'_, f64>,
    ) -> Result<(), RegressionError> {
        if coef.len() != x.len() {
            return Err(RegressionError::CoefficientWidthMismatch {
                expected: x.len(),
                found: coef.len(),
            });
        }
        if self.num_rows == 0 {
            if !width_is_representable(x.len()) {
                self.status = FitStatus::Terminated;
                return Ok(());
            }
            *self = Self::with_coef(coef.to_owned());
        } else {
            ensure_row_width(self.width_of_x, x)?;
        }

        self.num_rows += 1;
        if self.status.is_terminated() {
            return Ok(());
        }
        if !all_finite(x) || !all_finite(coef) {
            log::error!(
                "Design matrix or coefficients are not finite (row {}).",
                self.num_rows
            );
            self.status = FitStatus::Terminated;
            return Ok(());
        }

        let y = label_sign(label);
        let xc = x.dot(&coef);

        // Score vector g = sigma(-y x'c) y x, so g g' = s^2 x x'.
        let score_scale = sigma(-y * xc) * y;
        add_outer(&mut self.meat, x, score_scale * score_scale);

        let a = sigma(xc) * sigma(-xc);
        add_outer_lower(&mut self.x_transp_ax, x, a);
        Ok(())
    }
}
