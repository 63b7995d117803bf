//! Iteratively-reweighted least squares for logistic regression.
//!
//! One pass accumulates `X'AX` and the weighted working response `X'Az`; the
//! final step is the closed-form Newton update `c = (X'AX)^+ X'Az`.

use crate::diagnostics::LogisticFitResult;
use crate::linalg::SymmetricEigen;
use crate::state::{
    FitStatus, IterativeState, RegressionError, TransitionState, add_outer, all_finite,
    ensure_row_width, label_sign, log_loss, matrix_finite, sigma, width_is_representable,
    zero_matrix, zero_vector,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Inter- and intra-iteration state of the IRLS method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrlsState {
    pub width_of_x: usize,
    pub coef: Array1<f64>,

    pub num_rows: u64,
    pub x_transp_az: Array1<f64>,
    pub x_transp_ax: Array2<f64>,
    pub log_likelihood: f64,
    pub status: FitStatus,

    /// Diagonal of `(X'AX)^+` and its condition number, computed once by
    /// `finalize` so that `result` does not decompose the matrix again.
    pub inverse_diagonal: Array1<f64>,
    pub condition_no: f64,
}

impl IrlsState {
    pub fn with_width(width_of_x: usize) -> Self {
        Self {
            width_of_x,
            coef: zero_vector(width_of_x),
            num_rows: 0,
            x_transp_az: zero_vector(width_of_x),
            x_transp_ax: zero_matrix(width_of_x),
            log_likelihood: 0.0,
            status: FitStatus::InProcess,
            inverse_diagonal: Array1::zeros(0),
            condition_no: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.num_rows = 0;
        self.x_transp_az.fill(0.0);
        self.x_transp_ax.fill(0.0);
        self.log_likelihood = 0.0;
        self.status = FitStatus::InProcess;
        self.inverse_diagonal = Array1::zeros(0);
        self.condition_no = 0.0;
    }

    fn terminate(mut self, reason: &str) -> Self {
        log::error!("IRLS step terminated: {}", reason);
        self.status = FitStatus::Terminated;
        self
    }

    fn has_cached_inverse(&self) -> bool {
        self.inverse_diagonal.len() == self.width_of_x
    }
}

impl TransitionState for IrlsState {
    type Output = LogisticFitResult;

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

    fn absorb(&mut self, other: &Self) {
        self.num_rows += other.num_rows;
        self.x_transp_az += &other.x_transp_az;
        self.x_transp_ax += &other.x_transp_ax;
        self.log_likelihood += other.log_likelihood;
        self.status = self.status.escalate(other.status);
    }

    fn finalize(mut self) -> Option<Self> {
        if self.num_rows == 0 {
            return None;
        }
        if self.status.is_terminated() {
            return Some(self);
        }
        // A non-finite matrix can send LAPACK into an endless loop, so check
        // before decomposing.
        if !matrix_finite(&self.x_transp_ax)
            || !all_finite(self.x_transp_az.view())
            || !self.log_likelihood.is_finite()
        {
            return Some(self.terminate(
                "over- or underflow in intermediate calculation; input data is likely of poor numerical condition",
            ));
        }

        let eigen = match SymmetricEigen::new(&self.x_transp_ax) {
            Ok(eigen) => eigen,
            Err(err) => {
                let reason = format!("eigendecomposition of X'AX failed: {err}");
                return Some(self.terminate(&reason));
            }
        };
        let inverse = eigen.pseudo_inverse();
        let coef = inverse.dot(&self.x_transp_az);

        if !all_finite(coef.view()) {
            return Some(self.terminate(
                "over- or underflow in Newton step while updating coefficients; input data is likely of poor numerical condition",
            ));
        }

        self.coef = coef;
        self.inverse_diagonal = inverse.diag().to_owned();
        self.condition_no = eigen.condition_number();
        log::debug!(
            "IRLS step over {} rows: log-likelihood {:.6}, condition number {:.3e}",
            self.num_rows,
            self.log_likelihood,
            self.condition_no
        );
        Some(self)
    }

    fn result(&self) -> Result<Option<LogisticFitResult>, RegressionError> {
        if self.num_rows == 0 {
            return Ok(None);
        }
        if self.has_cached_inverse() {
            return Ok(Some(LogisticFitResult::from_statistics(
                self.coef.view(),
                self.inverse_diagonal.view(),
                self.log_likelihood,
                self.condition_no,
                self.status,
            )));
        }

        // Terminated before the Newton step; fall back to decomposing here
        // unless the matrix itself overflowed.
        if !matrix_finite(&self.x_transp_ax) {
            return Ok(Some(LogisticFitResult::without_variance(
                self.coef.view(),
                self.log_likelihood,
                self.status,
            )));
        }
        let eigen = SymmetricEigen::new(&self.x_transp_ax)?;
        let inverse = eigen.pseudo_inverse();
        Ok(Some(LogisticFitResult::from_statistics(
            self.coef.view(),
            inverse.diag(),
            self.log_likelihood,
            eigen.condition_number(),
            self.status,
        )))
    }
}

impl IterativeState for IrlsState {
    fn transition(
        &mut self,
        label: bool,
        x: ArrayView1<'_, f64>,
        prior: Option<&Self>,
    ) -> Result<(), RegressionError> {
        if self.num_rows == 0 {
            if !width_is_representable(x.len()) {
                self.status = FitStatus::Terminated;
                return Ok(());
            }
            match prior {
                Some(previous) => {
                    ensure_row_width(previous.width_of_x, x)?;
                    *self = previous.clone();
                    self.reset();
                }
                None => *self = Self::with_width(x.len()),
            }
        } else {
            ensure_row_width(self.width_of_x, x)?;
        }

        self.num_rows += 1;
        if self.status.is_terminated() {
            return Ok(());
        }
        if !all_finite(x) {
            log::error!("Design matrix is not finite (row {}).", self.num_rows);
            self.status = FitStatus::Terminated;
            return Ok(());
        }

        let y = label_sign(label);
        let xc = x.dot(&self.coef);
        let a = sigma(xc) * sigma(-xc);

        // z = x'c + sigma(-y x'c) y / a. Accumulating a*z keeps a near-zero
        // weight from overflowing the working response.
        let az = xc * a + sigma(-y * xc) * y;

        self.x_transp_az.scaled_add(az, &x);
        add_outer(&mut self.x_transp_ax, x, a);
        self.log_likelihood -= log_loss(y, xc);
        Ok(())
    }

    fn coef(&self) -> ArrayView1<'_, f64> {
        self.coef.view()
    }

    fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::merge;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn fold(rows: &[(bool, Array1<f64>)], prior: Option<&IrlsState>) -> IrlsState {
        let mut state = IrlsState::default();
        for (label, x) in rows {
            state.transition(*label, x.view(), prior).unwrap();
        }
        state
    }

    #[test]
    fn two_row_newton_step() {
        let rows = vec![(true, array![1.0, 0.0]), (false, array![0.0, 1.0])];
        let state = fold(&rows, None);
        assert_eq!(state.num_rows, 2);
        // At c = 0: a = 1/4, az = y/2.
        assert_abs_diff_eq!(state.x_transp_az[0], 0.5);
        assert_abs_diff_eq!(state.x_transp_az[1], -0.5);
        assert_abs_diff_eq!(state.x_transp_ax[[0, 0]], 0.25);
        assert_abs_diff_eq!(state.x_transp_ax[[0, 1]], 0.0);

        let finalized = state.finalize().unwrap();
        assert!(finalized.coef.iter().all(|c| c.is_finite()));
        assert_abs_diff_eq!(finalized.coef[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(finalized.coef[1], -2.0, epsilon = 1e-12);

        let result = finalized.result().unwrap().unwrap();
        assert!(result.std_err.iter().all(|s| *s >= 0.0));
        assert_abs_diff_eq!(result.std_err[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.condition_no, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.log_likelihood, -2.0 * (2.0_f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn singular_information_uses_pseudo_inverse() {
        // Duplicate columns make X'AX rank one.
        let rows = vec![
            (true, array![1.0, 1.0]),
            (false, array![2.0, 2.0]),
            (true, array![-1.0, -1.0]),
        ];
        let finalized = fold(&rows, None).finalize().unwrap();
        assert_eq!(finalized.status, FitStatus::InProcess);
        assert!(finalized.coef.iter().all(|c| c.is_finite()));
        // The minimum-norm solution splits the effect evenly.
        assert_abs_diff_eq!(finalized.coef[0], finalized.coef[1], epsilon = 1e-10);
        assert!(finalized.condition_no > 1e12);
    }

    #[test]
    fn merge_is_commutative() {
        let rows = vec![
            (true, array![1.0, 0.3]),
            (false, array![1.0, -0.7]),
            (true, array![1.0, 1.1]),
        ];
        let a = fold(&rows[..1], None);
        let b = fold(&rows[1..], None);
        let ab = merge(a.clone(), b.clone()).unwrap();
        let ba = merge(b, a).unwrap();
        assert_eq!(ab.num_rows, ba.num_rows);
        assert_abs_diff_eq!(ab.log_likelihood, ba.log_likelihood, epsilon = 1e-12);
        for (x, y) in ab.x_transp_az.iter().zip(ba.x_transp_az.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn non_finite_information_terminates_finalize() {
        let mut state = fold(&[(true, array![1.0, 0.5])], None);
        state.x_transp_ax[[1, 1]] = f64::INFINITY;
        let finalized = state.finalize().unwrap();
        assert_eq!(finalized.status, FitStatus::Terminated);
        assert_eq!(finalized.coef, array![0.0, 0.0]);
    }

    #[test]
    fn overflowed_information_is_reported_without_decomposing() {
        let mut state = fold(&[(true, array![1.0, 0.5])], None);
        state.x_transp_ax[[1, 1]] = f64::INFINITY;
        let finalized = state.finalize().unwrap();

        let result = finalized.result().unwrap().unwrap();
        assert_eq!(result.status, FitStatus::Terminated);
        assert_eq!(result.coef, array![0.0, 0.0]);
        assert!(result.std_err.iter().all(|v| v.is_nan()));
        assert!(result.condition_no.is_nan());
    }

    #[test]
    fn non_finite_log_likelihood_terminates_finalize() {
        let mut state = fold(&[(true, array![1.0, 0.5]), (false, array![1.0, -0.5])], None);
        state.log_likelihood = f64::NEG_INFINITY;
        let finalized = state.finalize().unwrap();
        assert_eq!(finalized.status, FitStatus::Terminated);
        assert!(finalized.inverse_diagonal.is_empty());
    }

    #[test]
    fn empty_state_is_no_data() {
        assert!(IrlsState::default().finalize().is_none());
        assert!(IrlsState::default().result().unwrap().is_none());
    }
}
