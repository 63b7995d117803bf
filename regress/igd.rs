//! Incremental gradient descent for logistic regression.
//!
//! Every observation moves the coefficients immediately by one stochastic
//! gradient step. Partitions run their own trajectories, and merging two
//! partials averages their coefficients weighted by row count, so after any
//! sequence of merges the coefficient vector is the row-weighted mean of the
//! per-partition models.

use crate::diagnostics::LogisticFitResult;
use crate::linalg::SymmetricEigen;
use crate::state::{
    FitStatus, IterativeState, RegressionError, TransitionState, add_outer, all_finite,
    ensure_row_width, label_sign, log_loss, matrix_finite, sigma, width_is_representable,
    zero_matrix, zero_vector,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Step size restored at the start of every epoch.
pub const IGD_STEPSIZE: f64 = 0.01;

/// Starting value of every coefficient on the first epoch of a fit. An
/// all-zero start would give every partition the same degenerate first step.
pub const IGD_INITIAL_COEF: f64 = 0.1;

/// Inter- and intra-iteration state of the incremental-gradient method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgdState {
    pub width_of_x: usize,
    pub stepsize: f64,
    pub coef: Array1<f64>,

    pub num_rows: u64,
    pub x_transp_ax: Array2<f64>,
    pub log_likelihood: f64,
    pub status: FitStatus,
}

impl IgdState {
    pub fn with_width(width_of_x: usize) -> Self {
        Self {
            width_of_x,
            stepsize: IGD_STEPSIZE,
            coef: zero_vector(width_of_x),
            num_rows: 0,
            x_transp_ax: zero_matrix(width_of_x),
            log_likelihood: 0.0,
            status: FitStatus::InProcess,
        }
    }

    /// State of the first row of the first epoch: every coefficient seeded
    /// with [`IGD_INITIAL_COEF`].
    pub fn seeded(width_of_x: usize) -> Self {
        let mut state = Self::with_width(width_of_x);
        state.coef.fill(IGD_INITIAL_COEF);
        state
    }

    pub fn reset(&mut self) {
        self.stepsize = IGD_STEPSIZE;
        self.num_rows = 0;
        self.x_transp_ax.fill(0.0);
        self.log_likelihood = 0.0;
        self.status = FitStatus::InProcess;
    }
}

impl TransitionState for IgdState {
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
        let total = self.num_rows as f64 + other.num_rows as f64;
        let left_weight = self.num_rows as f64 / total;
        let right_weight = other.num_rows as f64 / total;

        self.coef *= left_weight;
        self.coef.scaled_add(right_weight, &other.coef);

        self.num_rows += other.num_rows;
        self.x_transp_ax += &other.x_transp_ax;
        self.log_likelihood += other.log_likelihood;
        self.status = self.status.adopt_terminated(other.status);
    }

    /// There is no closed-form step; the epoch's averaged coefficients are the
    /// update. Only the finiteness of the model and of the statistics
    /// gathered at the prior epoch's model is checked.
    fn finalize(mut self) -> Option<Self> {
        if self.num_rows == 0 {
            return None;
        }
        if !all_finite(self.coef.view())
            || !matrix_finite(&self.x_transp_ax)
            || !self.log_likelihood.is_finite()
        {
            log::error!(
                "Over- or underflow in incremental-gradient iteration. Input data is likely of poor numerical condition."
            );
            self.status = FitStatus::Terminated;
        }
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

impl IterativeState for IgdState {
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
                None => *self = Self::seeded(x.len()),
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

        // The information matrix and log-likelihood describe the previous
        // epoch's model, not the moving per-row coefficients.
        if let Some(previous) = prior {
            let previous_xc = x.dot(&previous.coef);
            let a = sigma(previous_xc) * sigma(-previous_xc);
            add_outer(&mut self.x_transp_ax, x, a);
            self.log_likelihood -= log_loss(y, previous_xc);
        }

        let xc = x.dot(&self.coef);
        let scale = self.stepsize * sigma(-xc * y) * y;
        self.coef.scaled_add(scale, &x);
        Ok(())
    }

    fn coef(&self) -> ArrayView1<'_, f64> {
        self.coef.view()
    }

    fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
}
