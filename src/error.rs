//! Optimizer error types.

use thiserror::Error;

/// Errors that abort an optimization run.
///
/// Non-optimal solver statuses are not errors; they travel as
/// [`SolveStatus`](crate::solver::SolveStatus) values.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("invalid optimization request: {0}")]
    InvalidRequest(#[source] serde_yaml::Error),

    #[error("{kind} not found: {name}")]
    MissingReference { kind: &'static str, name: String },

    #[error("invalid {kind} {name}: {reason}")]
    InvalidReference {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid score name format {format:?}: {reason}")]
    InvalidScoreFormat { format: String, reason: String },

    #[error("no preference score for app {app} on cluster {cluster} with device {device}")]
    IncompleteObjective {
        app: String,
        cluster: String,
        device: String,
    },

    #[error("solver returned non-binary value {value} for {variable}")]
    IntegralityViolation { variable: String, value: f64 },

    #[error("solver solution violates constraint {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("solver returned {actual} values for {expected} variables")]
    SolutionShape { expected: usize, actual: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OptimizeError {
    /// Whether the caller's request or reference data is at fault, as opposed
    /// to a failure inside the optimizer or its solver.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OptimizeError::InvalidRequest(_)
                | OptimizeError::MissingReference { .. }
                | OptimizeError::InvalidReference { .. }
                | OptimizeError::InvalidScoreFormat { .. }
                | OptimizeError::IncompleteObjective { .. }
                | OptimizeError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_data_problems_as_client_errors() {
        let missing = OptimizeError::MissingReference {
            kind: "policy",
            name: "gpu-policy".to_string(),
        };
        assert!(missing.is_client_error());
        assert_eq!(missing.to_string(), "policy not found: gpu-policy");

        let incomplete = OptimizeError::IncompleteObjective {
            app: "App1".to_string(),
            cluster: "ClusterA".to_string(),
            device: "gpu-large".to_string(),
        };
        assert!(incomplete.is_client_error());
    }

    #[test]
    fn classifies_solver_mismatch_as_server_error() {
        let err = OptimizeError::IntegralityViolation {
            variable: "x[App1,ClusterA]".to_string(),
            value: 0.5,
        };
        assert!(!err.is_client_error());
        assert!(!OptimizeError::SolutionShape { expected: 3, actual: 2 }.is_client_error());
    }
}
