//! Conjugate-gradient logistic regression.
//!
//! Each pass over the data accumulates the gradient of the log-likelihood and
//! the information matrix `X'AX` at the current coefficients. The final step
//! picks a Hestenes-Stiefel conjugate direction (with a Powell restart) and
//! moves along it by the Newton step length measured with `X'AX`.

use crate::diagnostics::LogisticFitResult;
use crate::linalg::SymmetricEigen;
use crate::state::{
    FitStatus, IterativeState, RegressionError, TransitionState, add_outer, all_finite,
    ensure_row_width, label_sign, log_loss, matrix_finite, sigma, width_is_representable,
    zero_matrix, zero_vector,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Smallest positive subnormal double; the Powell restart threshold.
const DENORM_MIN: f64 = f64::from_bits(1);

/// Inter- and intra-iteration state of the conjugate-gradient method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CgState {
    // Inter-iteration fields, written by `finalize`.
    pub iteration: u32,
    pub width_of_x: usize,
    pub coef: Array1<f64>,
    pub dir: Array1<f64>,
    pub grad: Array1<f64>,
    pub beta: f64,

    // Intra-iteration fields, written by `transition` and `absorb`.
    pub num_rows: u64,
    pub grad_new: Array1<f64>,
    pub x_transp_ax: Array2<f64>,
    pub log_likelihood: f64,
    pub status: FitStatus,
}

impl CgState {
    /// Zero state of the given width, as seen on the first row of a fit.
    pub fn with_width(width_of_x: usize) -> Self {
        Self {
            iteration: 0,
            width_of_x,
            coef: zero_vector(width_of_x),
            dir: zero_vector(width_of_x),
            grad: zero_vector(width_of_x),
            beta: 0.0,
            num_rows: 0,
            grad_new: zero_vector(width_of_x),
            x_transp_ax: zero_matrix(width_of_x),
            log_likelihood: 0.0,
            status: FitStatus::InProcess,
        }
    }

    /// Clears the intra-iteration fields.
    pub fn reset(&mut self) {
        self.num_rows = 0;
        self.x_transp_ax.fill(0.0);
        self.grad_new.fill(0.0);
        self.log_likelihood = 0.0;
        self.status = FitStatus::InProcess;
    }

    fn terminate(mut self, reason: &str) -> Self {
        log::error!(
            "Conjugate-gradient iteration {} terminated: {}",
            self.iteration,
            reason
        );
        self.status = FitStatus::Terminated;
        self
    }

    /// Hestenes-Stiefel direction with a Powell restart whenever the
    /// Polak-Ribiere quotient is not positive.
    fn update_direction(&mut self) {
        if self.iteration == 0 {
            self.dir = self.grad_new.clone();
            self.grad = self.grad_new.clone();
            return;
        }

        let grad_change = &self.grad_new - &self.grad;
        let numerator = self.grad_new.dot(&grad_change);
        self.beta = numerator / self.dir.dot(&grad_change);

        // A vanishing previous gradient makes the quotient NaN; restart then too.
        let quotient = numerator / self.grad.dot(&self.grad);
        if quotient.is_nan() || quotient <= DENORM_MIN {
            log::debug!("Powell restart at iteration {}", self.iteration);
            self.beta = 0.0;
        }

        self.dir = &self.grad_new - &(&self.dir * self.beta);
        self.grad = self.grad_new.clone();
    }
}

impl TransitionState for CgState {
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
        self.grad_new += &other.grad_new;
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
        if !all_finite(self.grad_new.view())
            || !matrix_finite(&self.x_transp_ax)
            || !self.log_likelihood.is_finite()
        {
            return Some(self.terminate(
                "over- or underflow in intermediate calculation; input data is likely of poor numerical condition",
            ));
        }

        self.update_direction();

        // alpha = g'd / d'(X'AX)d; c <- c + alpha d. A zero direction means
        // the gradient vanished and c is already stationary.
        let step = if self.dir.dot(&self.dir) == 0.0 {
            0.0
        } else {
            let curvature = self.dir.dot(&self.x_transp_ax.dot(&self.dir));
            self.grad.dot(&self.dir) / curvature
        };
        let mut coef = self.coef.clone();
        coef.scaled_add(step, &self.dir);

        if !all_finite(coef.view()) {
            return Some(self.terminate(
                "over- or underflow while updating coefficients; input data is likely of poor numerical condition",
            ));
        }

        self.coef = coef;
        self.iteration += 1;
        Some(self)
    }

    fn result(&self) -> Result<Option<LogisticFitResult>, RegressionError> {
        if self.num_rows == 0 {
            return Ok(None);
        }
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

impl IterativeState for CgState {
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
        self.grad_new.scaled_add(sigma(-y * xc) * y, &x);

        // a_i = sigma(x_i c) sigma(-x_i c)
        let a = sigma(xc) * sigma(-xc);
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
