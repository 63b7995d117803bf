#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod cg;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod driver;
pub mod igd;
pub mod irls;
pub mod linalg;
pub mod marginal;
pub mod robust;
pub mod state;

pub use cg::CgState;
pub use config::{ConfigError, Method, RegressionConfig};
pub use data::{DataError, load_observations, partition_round_robin};
pub use diagnostics::{LogisticFitResult, MarginalEffectsResult, RobustVarianceResult};
pub use driver::{FitOptions, FitReport, Observation, fit, marginal_effects, robust_variance};
pub use igd::IgdState;
pub use irls::IrlsState;
pub use marginal::MarginalState;
pub use robust::RobustState;
pub use state::{
    DiagnosticState, FitStatus, IterativeState, RegressionError, TransitionState, merge,
};
