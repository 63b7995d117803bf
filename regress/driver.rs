// =============================================================================
// Reference Driver
// =============================================================================
//
// Runs the transition / merge / finalize / result contract over an in-memory,
// pre-partitioned data set. Each iteration folds every partition on the rayon
// pool, reduces the partials with `merge`, and finalizes the total. The loop
// stops on convergence, termination, or the iteration cap.
//
// =============================================================================

use crate::diagnostics::{MarginalEffectsResult, RobustVarianceResult};
use crate::marginal::MarginalState;
use crate::robust::RobustState;
use crate::state::{
    DiagnosticState, FitStatus, IterativeState, RegressionError, TransitionState, merge,
};
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One labelled row of the design matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub label: bool,
    pub features: Array1<f64>,
}

impl Observation {
    pub fn new(label: bool, features: Array1<f64>) -> Self {
        Self { label, features }
    }
}

/// Stopping rule of the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// The fit is completed once the log-likelihood gap between two
    /// consecutive iterations is at or below this value.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-4,
        }
    }
}

/// Terminal state of a fit and what the driver observed on the way there.
#[derive(Debug, Clone)]
pub struct FitReport<S: TransitionState> {
    pub state: S,
    /// `None` when the fit terminated before a single row could be counted.
    pub output: Option<S::Output>,
    pub iterations: usize,
    /// Distance between each pair of consecutive finalized states.
    pub distances: Vec<f64>,
}

impl<S: TransitionState> FitReport<S> {
    pub fn status(&self) -> FitStatus {
        self.state.status()
    }

    pub fn converged(&self) -> bool {
        self.status() == FitStatus::Completed
    }
}

/// Folds one partition sequentially into a fresh partial state.
pub fn fold_partition<S: IterativeState>(
    rows: &[Observation],
    prior: Option<&S>,
) -> Result<S, RegressionError> {
    let mut state = S::default();
    for row in rows {
        state.transition(row.label, row.features.view(), prior)?;
    }
    Ok(state)
}

/// Runs one pass over all partitions and returns the merged, not yet
/// finalized, state.
pub fn run_iteration<S>(partitions: &[Vec<Observation>], prior: Option<&S>) -> Result<S, RegressionError>
where
    S: IterativeState + Send + Sync,
{
    let partials = partitions
        .par_iter()
        .map(|rows| fold_partition::<S>(rows, prior))
        .collect::<Result<Vec<S>, RegressionError>>()?;
    reduce_partials(partials)
}

/// Merges partials left to right. A terminated partial without rows is the
/// merge identity and would vanish, so its status is carried over explicitly.
fn reduce_partials<S: TransitionState>(partials: Vec<S>) -> Result<S, RegressionError> {
    let mut lost_termination = false;
    let mut total = S::default();
    for (index, partial) in partials.into_iter().enumerate() {
        if partial.num_rows() == 0 && partial.status().is_terminated() {
            log::warn!(
                "Partition {} terminated before folding any row; stopping the fit.",
                index
            );
            lost_termination = true;
        }
        total = merge(total, partial)?;
    }
    if lost_termination {
        total.set_status(FitStatus::Terminated);
    }
    Ok(total)
}

/// Iterates `S` until convergence, termination, or `options.max_iterations`.
///
/// Returns [`RegressionError::NoData`] when the partitions hold no rows.
pub fn fit<S>(partitions: &[Vec<Observation>], options: &FitOptions) -> Result<FitReport<S>, RegressionError>
where
    S: IterativeState + Send + Sync,
{
    let mut prior: Option<S> = None;
    let mut distances = Vec::new();
    let mut iterations = 0;

    let state = loop {
        let merged = run_iteration(partitions, prior.as_ref())?;
        iterations += 1;

        if merged.num_rows() == 0 {
            if merged.status().is_terminated() {
                return Ok(FitReport {
                    state: merged,
                    output: None,
                    iterations,
                    distances,
                });
            }
            return Err(RegressionError::NoData);
        }
        let Some(mut current) = merged.finalize() else {
            return Err(RegressionError::NoData);
        };

        if current.status().is_terminated() {
            log::warn!("Fit terminated at iteration {}.", iterations);
            break current;
        }

        if let Some(previous) = prior.as_ref() {
            let distance = current.distance(previous);
            log::info!(
                "Iteration {}: log-likelihood {:.6}, distance {:.3e}",
                iterations,
                current.log_likelihood(),
                distance
            );
            distances.push(distance);
            if distance <= options.tolerance {
                current.mark_completed();
                break current;
            }
        } else {
            log::info!(
                "Iteration {}: log-likelihood {:.6}",
                iterations,
                current.log_likelihood()
            );
        }

        if iterations >= options.max_iterations {
            log::warn!(
                "Fit did not converge within {} iterations; reporting the last state.",
                options.max_iterations
            );
            break current;
        }
        prior = Some(current);
    };

    let output = state.result()?;
    Ok(FitReport {
        state,
        output,
        iterations,
        distances,
    })
}

/// One pass of a diagnostic engine for a fixed coefficient vector.
pub fn run_diagnostic<S>(
    partitions: &[Vec<Observation>],
    coef: ArrayView1<'_, f64>,
) -> Result<Option<S::Output>, RegressionError>
where
    S: DiagnosticState + Send + Sync,
{
    let partials = partitions
        .par_iter()
        .map(|rows| -> Result<S, RegressionError> {
            let mut state = S::default();
            for row in rows {
                state.transition(row.label, row.features.view(), coef)?;
            }
            Ok(state)
        })
        .collect::<Result<Vec<S>, RegressionError>>()?;

    let merged = reduce_partials(partials)?;
    if merged.num_rows() == 0 {
        if merged.status().is_terminated() {
            return Ok(None);
        }
        return Err(RegressionError::NoData);
    }
    match merged.finalize() {
        Some(state) => state.result(),
        None => Err(RegressionError::NoData),
    }
}

pub fn robust_variance(
    partitions: &[Vec<Observation>],
    coef: ArrayView1<'_, f64>,
) -> Result<Option<RobustVarianceResult>, RegressionError> {
    run_diagnostic::<RobustState>(partitions, coef)
}

pub fn marginal_effects(
    partitions: &[Vec<Observation>],
    coef: ArrayView1<'_, f64>,
) -> Result<Option<MarginalEffectsResult>, RegressionError> {
    run_diagnostic::<MarginalState>(partitions, coef)
}
