//! Optimizer configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{OptimizeError, Result};
use crate::extract::ExtractOptions;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// How far a solver value may stray from 0 or 1 and still read as binary
    pub integrality_tolerance: f64,

    /// Report device commitments of clusters that end up hosting no app.
    /// Turn off to drop them from the decisions.
    pub keep_idle_commitments: bool,

    /// Let the solver backend print its own progress log
    pub solver_log: bool,

    /// Directory of reference documents
    pub manifests_dir: PathBuf,

    /// Placed between rendered documents in the response output
    pub document_separator: String,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            integrality_tolerance: 1e-6,
            keep_idle_commitments: true,
            solver_log: false,
            manifests_dir: PathBuf::from("manifests"),
            document_separator: "\n---\n".to_string(),
        }
    }
}

impl OptimizerConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Self::from_toml(&text)?
            }
            None => OptimizerConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            tolerance: self.integrality_tolerance,
            keep_idle_commitments: self.keep_idle_commitments,
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| OptimizeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.integrality_tolerance > 0.0 && self.integrality_tolerance < 0.5) {
            return Err(OptimizeError::Config(format!(
                "integrality_tolerance must be in (0, 0.5), got {}",
                self.integrality_tolerance
            )));
        }
        Ok(())
    }
}
