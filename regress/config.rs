//! Run configuration, persisted as TOML.

use crate::driver::FitOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Fitting engine selected for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Cg,
    #[default]
    Irls,
    Igd,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Cg => "conjugate gradient",
            Method::Irls => "IRLS",
            Method::Igd => "incremental gradient descent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub method: Method,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Number of round-robin partitions folded in parallel.
    pub partitions: usize,
    /// Run the sandwich-variance pass after the fit.
    pub robust: bool,
    /// Run the marginal-effects pass after the fit.
    pub marginal: bool,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        let options = FitOptions::default();
        Self {
            method: Method::default(),
            max_iterations: options.max_iterations,
            tolerance: options.tolerance,
            partitions: 1,
            robust: false,
            marginal: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl RegressionConfig {
    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.partitions == 0 {
            return Err(ConfigError::Invalid(
                "partitions must be at least 1".to_string(),
            ));
        }
        if !(self.tolerance >= 0.0) || !self.tolerance.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a finite non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a config. Missing keys take their default value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}
