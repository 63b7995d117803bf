//! Average marginal effects of a fitted logistic model.
//!
//! The effect of coefficient `j` is `c_j` times the mean logistic density
//! `G(x'c) (1 - G(x'c))` over the data. Standard errors come from the delta
//! method evaluated at the mean feature vector.

use crate::diagnostics::MarginalEffectsResult;
use crate::linalg::SymmetricEigen;
use crate::state::{
    DiagnosticState, FitStatus, RegressionError, TransitionState, add_outer, all_finite,
    ensure_row_width, matrix_finite, same_values, sigma, width_is_representable, zero_matrix,
    zero_vector,
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarginalState {
    pub iteration: u32,
    pub width_of_x: usize,
    pub coef: Array1<f64>,

    pub num_rows: u64,
    /// Running sum of `G(x'c) (1 - G(x'c))`.
    pub marginal_effects_per_observation: f64,
    /// Running sum of the feature rows; divided by `num_rows` at finalize.
    pub x_bar: Array1<f64>,
    pub x_transp_ax: Array2<f64>,
    pub status: FitStatus,

    /// Delta-method covariance of the marginal effects, filled by `finalize`.
    pub std_err_matrix: Array2<f64>,
}

impl MarginalState {
    pub fn with_coef(coef: Array1<f64>) -> Self {
        let width_of_x = coef.len();
        Self {
            iteration: 0,
            width_of_x,
            coef,
            num_rows: 0,
            marginal_effects_per_observation: 0.0,
            x_bar: zero_vector(width_of_x),
            x_transp_ax: zero_matrix(width_of_x),
            status: FitStatus::InProcess,
            std_err_matrix: Array2::zeros((0, 0)),
        }
    }

    pub fn reset(&mut self) {
        self.num_rows = 0;
        self.marginal_effects_per_observation = 0.0;
        self.x_bar.fill(0.0);
        self.x_transp_ax.fill(0.0);
    }

    fn terminate(mut self, reason: &str) -> Self {
        log::error!("Marginal effects computation terminated: {}", reason);
        self.status = FitStatus::Terminated;
        self.std_err_matrix = Array2::from_elem((self.width_of_x, self.width_of_x), f64::NAN);
        self.iteration += 1;
        self
    }

    /// `d(marginal effects) / d(coef)` at the mean row, scaled by `1 / p(1-p)`:
    /// `I + (1 - 2p) c x_bar' / n`.
    fn delta_matrix(&self, p: f64) -> Array2<f64> {
        let n = self.num_rows as f64;
        let scale = (1.0 - 2.0 * p) / n;
        let coef = self.coef.view().insert_axis(Axis(1));
        let x_bar = self.x_bar.view().insert_axis(Axis(0));
        let mut delta = coef.dot(&x_bar) * scale;
        for i in 0..self.width_of_x {
            delta[[i, i]] += 1.0;
        }
        delta
    }
}

impl TransitionState for MarginalState {
    type Output = MarginalEffectsResult;

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
        self.marginal_effects_per_observation += other.marginal_effects_per_observation;
        self.x_bar += &other.x_bar;
        self.x_transp_ax += &other.x_transp_ax;
        self.status = self.status.escalate(other.status);
    }

    fn finalize(mut self) -> Option<Self> {
        if self.num_rows == 0 {
            return None;
        }
        if self.status.is_terminated() {
            return Some(self.terminate("a transition step flagged non-finite input"));
        }
        if !matrix_finite(&self.x_transp_ax)
            || !all_finite(self.x_bar.view())
            || !self.marginal_effects_per_observation.is_finite()
        {
            return Some(self.terminate(
                "over- or underflow in intermediate calculation; input data is likely of poor numerical condition",
            ));
        }

        let variance = match SymmetricEigen::new(&self.x_transp_ax) {
            Ok(eigen) => eigen.pseudo_inverse(),
            Err(err) => {
                let reason = format!("eigendecomposition of X'AX failed: {err}");
                return Some(self.terminate(&reason));
            }
        };

        let mean_xc = self.coef.dot(&self.x_bar) / self.num_rows as f64;
        let p = sigma(mean_xc);
        let density = p * (1.0 - p);
        let delta = self.delta_matrix(p);

        self.std_err_matrix = delta.dot(&variance).dot(&delta.t()) * (density * density);
        self.iteration += 1;
        Some(self)
    }

    fn result(&self) -> Result<Option<MarginalEffectsResult>, RegressionError> {
        if self.num_rows == 0 {
            return Ok(None);
        }
        if self.iteration == 0 {
            return Err(RegressionError::NotFinalized);
        }
        let mean_density = self.marginal_effects_per_observation / self.num_rows as f64;
        Ok(Some(MarginalEffectsResult::from_statistics(
            self.coef.view(),
            self.std_err_matrix.diag(),
            mean_density,
            self.num_rows,
            self.status,
        )))
    }
}

impl DiagnosticState for MarginalState {
    /// The label does not enter the marginal effects.
    fn transition(
        &mut self,
        _: bool,
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

        let xc = x.dot(&coef);
        let g = sigma(xc);
        self.marginal_effects_per_observation += g * (1.0 - g);
        self.x_bar += &x;

        let a = sigma(xc) * sigma(-xc);
        add_outer(&mut self.x_transp_ax, x, a);
        Ok(())
    }
}
