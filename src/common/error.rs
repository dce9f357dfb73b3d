//! Error types for mpc_path_tracking

use thiserror::Error;

/// Main error type for the MPC path tracker
#[derive(Debug, Error)]
pub enum MpcError {
    /// Invalid horizon, timestep or tuning constant. Fatal at start-up.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// The optimizer stopped before reaching a feasible optimum
    #[error("Solver did not converge ({status}) after {iterations} iterations")]
    SolverNonConvergence {
        status: String,
        iterations: usize,
    },
    /// NaN/Inf in the inputs or in the solver output
    #[error("Numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    /// Any other failure reported by the optimizer
    #[error("Solver error: {0}")]
    SolverError(String),
    /// Invalid argument to a helper
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Malformed configuration file
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Visualization error
    #[error("Visualization error: {0}")]
    VisualizationError(String),
}

impl MpcError {
    /// Per-cycle numeric failures the caller can recover from, e.g. by
    /// holding the previous command or braking.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MpcError::SolverNonConvergence { .. }
                | MpcError::NumericDegeneracy(_)
                | MpcError::SolverError(_)
        )
    }
}

/// Result type alias for MPC operations
pub type MpcResult<T> = Result<T, MpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MpcError::ConfigurationError("horizon must be at least 2".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: horizon must be at least 2"
        );

        let err = MpcError::SolverNonConvergence {
            status: "NotConvergedOutOfTime".to_string(),
            iterations: 3,
        };
        assert_eq!(
            format!("{}", err),
            "Solver did not converge (NotConvergedOutOfTime) after 3 iterations"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MpcError = io_err.into();
        assert!(matches!(err, MpcError::IoError(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(MpcError::NumericDegeneracy("nan".to_string()).is_recoverable());
        assert!(MpcError::SolverError("cost".to_string()).is_recoverable());
        assert!(!MpcError::ConfigurationError("dt".to_string()).is_recoverable());
    }
}
