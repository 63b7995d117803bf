// =============================================================================
// Diagnostic Output
// =============================================================================
//
// Output tuples for the three fitting engines and the two post-fit engines,
// together with the shared builder that turns a coefficient vector and the
// diagonal of the (pseudo-)inverse information matrix into standard errors,
// Wald statistics, p-values and odds ratios.
//
// =============================================================================

use crate::state::FitStatus;
use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

/// Coefficients and Wald diagnostics of a logistic-regression fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticFitResult {
    pub coef: Array1<f64>,
    pub log_likelihood: f64,
    pub std_err: Array1<f64>,
    pub wald_z_stats: Array1<f64>,
    pub wald_p_values: Array1<f64>,
    pub odds_ratios: Array1<f64>,
    pub condition_no: f64,
    pub status: FitStatus,
}

impl LogisticFitResult {
    /// Shared result builder for the CG, IRLS and IGD engines.
    ///
    /// `inverse_diagonal` is the diagonal of the pseudo-inverse of `X'AX`,
    /// i.e. the asymptotic variance of each coefficient.
    pub fn from_statistics(
        coef: ArrayView1<'_, f64>,
        inverse_diagonal: ArrayView1<'_, f64>,
        log_likelihood: f64,
        condition_no: f64,
        status: FitStatus,
    ) -> Self {
        let std_err = inverse_diagonal.mapv(f64::sqrt);
        let wald_z_stats = ratio(coef, std_err.view());
        let wald_p_values = wald_z_stats.mapv(normal_two_sided_p_value);
        let odds_ratios = coef.mapv(f64::exp);
        Self {
            coef: coef.to_owned(),
            log_likelihood,
            std_err,
            wald_z_stats,
            wald_p_values,
            odds_ratios,
            condition_no,
            status,
        }
    }

    /// Tuple for a state whose information matrix over- or underflowed. The
    /// coefficients are reported as they stand; every variance-derived
    /// column and the condition number are `NaN`.
    pub fn without_variance(coef: ArrayView1<'_, f64>, log_likelihood: f64, status: FitStatus) -> Self {
        let unavailable = Array1::from_elem(coef.len(), f64::NAN);
        Self::from_statistics(coef, unavailable.view(), log_likelihood, f64::NAN, status)
    }
}

/// Sandwich-variance diagnostics for a fixed coefficient vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustVarianceResult {
    pub coef: Array1<f64>,
    pub std_err: Array1<f64>,
    pub wald_z_stats: Array1<f64>,
    pub wald_p_values: Array1<f64>,
    pub status: FitStatus,
}

impl RobustVarianceResult {
    pub fn from_variance_diagonal(
        coef: ArrayView1<'_, f64>,
        variance_diagonal: ArrayView1<'_, f64>,
        status: FitStatus,
    ) -> Self {
        let std_err = variance_diagonal.mapv(f64::sqrt);
        let wald_z_stats = ratio(coef, std_err.view());
        let wald_p_values = wald_z_stats.mapv(normal_two_sided_p_value);
        Self {
            coef: coef.to_owned(),
            std_err,
            wald_z_stats,
            wald_p_values,
            status,
        }
    }
}

/// Average marginal effects and their delta-method diagnostics.
///
/// `p_values` is `None` whenever the row count does not exceed the number of
/// coefficients, because the Student-t reference distribution has no degrees
/// of freedom left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalEffectsResult {
    pub marginal_effects: Array1<f64>,
    pub coef: Array1<f64>,
    pub std_err: Array1<f64>,
    pub t_stats: Array1<f64>,
    pub p_values: Option<Array1<f64>>,
    pub status: FitStatus,
}

impl MarginalEffectsResult {
    pub fn from_statistics(
        coef: ArrayView1<'_, f64>,
        std_err_diagonal: ArrayView1<'_, f64>,
        mean_density: f64,
        num_rows: u64,
        status: FitStatus,
    ) -> Self {
        let marginal_effects = coef.mapv(|c| c * mean_density);
        let std_err = std_err_diagonal.mapv(f64::sqrt);
        let t_stats = ratio(marginal_effects.view(), std_err.view());

        let width = coef.len() as u64;
        let p_values = (num_rows > width).then(|| {
            let df = (num_rows - width) as f64;
            t_stats.mapv(|t| students_t_two_sided_p_value(t, df))
        });

        Self {
            marginal_effects,
            coef: coef.to_owned(),
            std_err,
            t_stats,
            p_values,
            status,
        }
    }
}

fn ratio(numerator: ArrayView1<'_, f64>, denominator: ArrayView1<'_, f64>) -> Array1<f64> {
    Zip::from(numerator)
        .and(denominator)
        .map_collect(|&n, &d| n / d)
}

// =============================================================================
// P-Value Calculation
// =============================================================================

/// Two-sided p-value of a z-statistic under the standard normal.
///
/// An infinite statistic yields `0`; `NaN` propagates.
pub fn normal_two_sided_p_value(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => 2.0 * normal.cdf(-z.abs()),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value of a t-statistic with `df` degrees of freedom.
pub fn students_t_two_sided_p_value(t: f64, df: f64) -> f64 {
    if t.is_nan() || !(df > 0.0) {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * dist.sf(t.abs()),
        Err(_) => f64::NAN,
    }
}
