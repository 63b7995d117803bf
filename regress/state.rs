//! # Transition-State Scaffolding
//!
//! Every estimator in this crate is expressed as an aggregate over a stream of
//! `(label, features)` observations. The aggregate is split into four pieces
//! that a driver invokes in a fixed order:
//!
//! - `transition`: folds one observation into a partial state.
//! - `merge`: combines two partial states. Associative and commutative up to
//!   floating-point reassociation, with the empty state as identity.
//! - `finalize`: turns one iteration's sufficient statistics into the
//!   inter-iteration fields that seed the next pass.
//! - `result`: converts a terminal state into the diagnostic output.
//!
//! This module owns the pieces shared by all five engines: the status tag and
//! its two merge rules, the error type, the traits the driver is written
//! against, and the small numeric helpers used while accumulating.

use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::error::LinalgError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest feature count a state can carry. Wider rows terminate the fit.
pub const MAX_WIDTH_OF_X: usize = u16::MAX as usize;

/// Lifecycle tag carried by every state.
///
/// The numeric codes are part of the output contract: `0` in process,
/// `1` completed, `2` terminated.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum FitStatus {
    #[default]
    InProcess = 0,
    Completed = 1,
    Terminated = 2,
}

impl FitStatus {
    /// The integer code reported in output tuples.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FitStatus::InProcess),
            1 => Some(FitStatus::Completed),
            2 => Some(FitStatus::Terminated),
            _ => None,
        }
    }

    pub fn is_terminated(self) -> bool {
        self == FitStatus::Terminated
    }

    /// Merge rule used by the CG, IRLS, robust-variance and marginal-effects
    /// states: the larger status wins.
    pub fn escalate(self, other: FitStatus) -> FitStatus {
        self.max(other)
    }

    /// Merge rule used by the incremental-gradient state: the other side's
    /// status is adopted only when it is `Terminated`.
    pub fn adopt_terminated(self, other: FitStatus) -> FitStatus {
        if other.is_terminated() { other } else { self }
    }
}

/// Errors raised by the state algebra.
///
/// Width and method disagreements are configuration errors: the driver has
/// combined states that never belonged to the same fit, and there is no
/// recovery path. Numerical trouble is not reported here; it is signalled
/// through `FitStatus::Terminated` instead.
#[derive(Error, Debug)]
pub enum RegressionError {
    #[error(
        "Internal error: incompatible transition states (widthOfX {left} vs {right}). The states do not belong to the same fit."
    )]
    IncompatibleStates { left: usize, right: usize },

    #[error("Observation has {found} features, but the state was initialized with {expected}.")]
    RowWidthMismatch { expected: usize, found: usize },

    #[error(
        "Coefficient vector has {found} entries, but the observation has {expected} features."
    )]
    CoefficientWidthMismatch { expected: usize, found: usize },

    #[error(
        "Internal error: diagnostic partials were accumulated at different coefficient vectors."
    )]
    CoefficientMismatch,

    #[error("Eigendecomposition of the information matrix failed: {0}")]
    Eigendecomposition(#[from] LinalgError),

    #[error("The diagnostic state has not been finalized; call finalize before result.")]
    NotFinalized,

    #[error("The aggregate saw no observations.")]
    NoData,
}

// =============================================================================
// Driver-facing traits
// =============================================================================

/// Operations shared by every per-method state.
pub trait TransitionState: Clone + Default {
    /// Diagnostic tuple produced by `result`.
    type Output;

    fn width_of_x(&self) -> usize;

    fn num_rows(&self) -> u64;

    fn status(&self) -> FitStatus;

    fn set_status(&mut self, status: FitStatus);

    /// Folds a non-empty partial of identical width into `self`.
    ///
    /// Callers go through [`merge`], which handles the identity element and
    /// the width check before delegating here.
    fn absorb(&mut self, other: &Self);

    /// Method-specific agreement checks run by [`merge`] after the width
    /// check. States whose partials never depend on caller input accept
    /// everything.
    fn ensure_compatible(&self, _: &Self) -> Result<(), RegressionError> {
        Ok(())
    }

    /// Turns one iteration's statistics into the next inter-iteration state.
    /// Returns `None` when no observation was folded.
    fn finalize(self) -> Option<Self>;

    /// Builds the diagnostic tuple. `Ok(None)` when no observation was folded.
    fn result(&self) -> Result<Option<Self::Output>, RegressionError>;
}

/// States that iterate towards a coefficient estimate (CG, IRLS, IGD).
pub trait IterativeState: TransitionState {
    /// Folds one observation. `prior` is the previous iteration's finalized
    /// state, or `None` on the first iteration of a fit.
    fn transition(
        &mut self,
        label: bool,
        x: ArrayView1<'_, f64>,
        prior: Option<&Self>,
    ) -> Result<(), RegressionError>;

    fn coef(&self) -> ArrayView1<'_, f64>;

    fn log_likelihood(&self) -> f64;

    /// Log-likelihood gap between two consecutive finalized states.
    fn distance(&self, other: &Self) -> f64 {
        (self.log_likelihood() - other.log_likelihood()).abs()
    }

    /// Called by the driver once the distance falls under its tolerance.
    fn mark_completed(&mut self) {
        if !self.status().is_terminated() {
            self.set_status(FitStatus::Completed);
        }
    }
}

/// One-pass post-fit states driven by an already converged coefficient vector.
pub trait DiagnosticState: TransitionState {
    fn transition(
        &mut self,
        label: bool,
        x: ArrayView1<'_, f64>,
        coef: ArrayView1<'_, f64>,
    ) -> Result<(), RegressionError>;
}

/// Combines two partial states of the same method.
///
/// A state with `num_rows == 0` is the identity and the other side is returned
/// untouched. Two non-empty states of different width are a fatal
/// configuration error.
pub fn merge<S: TransitionState>(left: S, right: S) -> Result<S, RegressionError> {
    if left.num_rows() == 0 {
        return Ok(right);
    }
    if right.num_rows() == 0 {
        return Ok(left);
    }
    if left.width_of_x() != right.width_of_x() {
        return Err(RegressionError::IncompatibleStates {
            left: left.width_of_x(),
            right: right.width_of_x(),
        });
    }
    left.ensure_compatible(&right)?;
    let mut merged = left;
    merged.absorb(&right);
    Ok(merged)
}

// =============================================================================
// Accumulation helpers
// =============================================================================

/// Logistic function.
#[inline]
pub fn sigma(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps the boolean label to `+1` / `-1`.
#[inline]
pub(crate) fn label_sign(label: bool) -> f64 {
    if label { 1.0 } else { -1.0 }
}

/// `ln(1 + exp(-y * x'c))`, the negated per-row log-likelihood, evaluated
/// without overflowing for large `|x'c|`.
#[inline]
pub(crate) fn log_loss(y: f64, xc: f64) -> f64 {
    let t = -y * xc;
    t.max(0.0) + (-t.abs()).exp().ln_1p()
}

/// Element-wise equality that treats two `NaN`s as equal.
pub(crate) fn same_values(left: ArrayView1<'_, f64>, right: ArrayView1<'_, f64>) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(a, b)| a == b || (a.is_nan() && b.is_nan()))
}

/// `target += weight * x x'` over the full matrix.
pub(crate) fn add_outer(target: &mut Array2<f64>, x: ArrayView1<'_, f64>, weight: f64) {
    for (mut row, &xi) in target.rows_mut().into_iter().zip(x.iter()) {
        row.scaled_add(weight * xi, &x);
    }
}

/// `target += weight * x x'` over the lower triangle only.
pub(crate) fn add_outer_lower(target: &mut Array2<f64>, x: ArrayView1<'_, f64>, weight: f64) {
    for (i, &xi) in x.iter().enumerate() {
        let scaled = weight * xi;
        for (j, &xj) in x.iter().take(i + 1).enumerate() {
            target[[i, j]] += scaled * xj;
        }
    }
}

pub(crate) fn all_finite(values: ArrayView1<'_, f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

pub(crate) fn matrix_finite(values: &Array2<f64>) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Checks the width of the first row of a fit. Logs and returns `false` when
/// it cannot be represented.
pub(crate) fn width_is_representable(width: usize) -> bool {
    if width > MAX_WIDTH_OF_X {
        log::error!(
            "Number of independent variables cannot be larger than {}. Got {}.",
            MAX_WIDTH_OF_X,
            width
        );
        return false;
    }
    true
}

pub(crate) fn ensure_row_width(expected: usize, x: ArrayView1<'_, f64>) -> Result<(), RegressionError> {
    if x.len() != expected {
        return Err(RegressionError::RowWidthMismatch {
            expected,
            found: x.len(),
        });
    }
    Ok(())
}

pub(crate) fn zero_vector(width: usize) -> Array1<f64> {
    Array1::zeros(width)
}

pub(crate) fn zero_matrix(width: usize) -> Array2<f64> {
    Array2::zeros((width, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn status_codes_round_trip() {
        for status in [
            FitStatus::InProcess,
            FitStatus::Completed,
            FitStatus::Terminated,
        ] {
            assert_eq!(FitStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(FitStatus::from_code(3), None);
    }

    #[test]
    fn escalate_keeps_the_larger_status() {
        use FitStatus::*;
        assert_eq!(InProcess.escalate(Completed), Completed);
        assert_eq!(Completed.escalate(InProcess), Completed);
        assert_eq!(Completed.escalate(Terminated), Terminated);
        assert_eq!(Terminated.escalate(InProcess), Terminated);
    }

    #[test]
    fn adopt_terminated_ignores_non_terminal_statuses() {
        use FitStatus::*;
        // Unlike `escalate`, a completed right-hand side is not adopted.
        assert_eq!(InProcess.adopt_terminated(Completed), InProcess);
        assert_eq!(Completed.adopt_terminated(InProcess), Completed);
        assert_eq!(InProcess.adopt_terminated(Terminated), Terminated);
        assert_eq!(Terminated.adopt_terminated(InProcess), Terminated);
    }

    #[test]
    fn outer_product_accumulation_is_symmetric() {
        let mut full = Array2::zeros((3, 3));
        let mut lower = Array2::zeros((3, 3));
        let x = array![1.0, -2.0, 0.5];
        add_outer(&mut full, x.view(), 0.25);
        add_outer_lower(&mut lower, x.view(), 0.25);

        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(full[[i, j]], full[[j, i]]);
                let expected = if j <= i { full[[i, j]] } else { 0.0 };
                assert_abs_diff_eq!(lower[[i, j]], expected);
            }
        }
        assert_abs_diff_eq!(full[[1, 2]], 0.25 * -2.0 * 0.5);
    }

    #[test]
    fn log_loss_matches_the_direct_formula() {
        for &(y, xc) in &[(1.0_f64, 0.3_f64), (-1.0, 2.0), (1.0, -4.0)] {
            let direct = (1.0_f64 + (-y * xc).exp()).ln();
            assert_abs_diff_eq!(log_loss(y, xc), direct, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(sigma(0.0), 0.5);
    }

    #[test]
    fn log_loss_stays_finite_for_confident_mistakes() {
        // exp(800) overflows, the loss itself is just 800.
        assert_abs_diff_eq!(log_loss(1.0, -800.0), 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(log_loss(-1.0, 800.0), 800.0, epsilon = 1e-9);
        assert_abs_diff_eq!(log_loss(1.0, 800.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn same_values_treats_nan_as_equal() {
        assert!(same_values(array![1.0, f64::NAN].view(), array![1.0, f64::NAN].view()));
        assert!(!same_values(array![1.0, 2.0].view(), array![1.0, 2.5].view()));
        assert!(!same_values(array![1.0].view(), array![1.0, 2.0].view()));
    }

    #[test]
    fn width_ceiling_is_u16_max() {
        assert!(width_is_representable(MAX_WIDTH_OF_X));
        assert!(!width_is_representable(MAX_WIDTH_OF_X + 1));
    }
}
