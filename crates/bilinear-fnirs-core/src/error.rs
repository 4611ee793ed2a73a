//! Simulation Error Types
//!
//! Error taxonomy for the forward model using `thiserror`. Every stage is a
//! one-shot deterministic computation, so errors propagate straight to the
//! caller; nothing here is retried or recovered.

use thiserror::Error;

/// Stage of the forward model that reported a numerical problem
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Bilinear neural state integration
    Neurodynamics,
    /// Balloon-model integration
    Hemodynamics,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Neurodynamics => "neurodynamics",
            Self::Hemodynamics => "hemodynamics",
        };
        f.write_str(name)
    }
}

/// Forward model error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Two arrays that must agree on a dimension do not
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// What was being checked (e.g. "B input slices")
        what: &'static str,
        /// Expected extent
        expected: String,
        /// Actual extent
        actual: String,
    },

    /// A configuration value is outside its valid domain
    #[error("Invalid configuration for {parameter}: {reason}")]
    InvalidConfig {
        /// Parameter name
        parameter: &'static str,
        /// Reason
        reason: String,
    },

    /// A state variable left the regime where the model equations are defined
    #[error("Numerical degeneracy in {stage} at region {region}, step {step}: {reason}")]
    NumericalDegeneracy {
        /// Stage that detected the problem
        stage: Stage,
        /// Affected region
        region: usize,
        /// Time step index
        step: usize,
        /// Offending variable and value
        reason: String,
    },

    /// The absorption matrix cannot be inverted
    #[error("Absorption matrix is singular (det={determinant:e})")]
    SingularAbsorption {
        /// Computed determinant
        determinant: f64,
    },
}

impl SimulationError {
    /// Shorthand for a shape mismatch over two displayable extents
    pub(crate) fn shape(
        what: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Shorthand for an invalid configuration value
    pub(crate) fn config(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result type for forward model operations
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Reject a value that is not a finite, strictly positive number.
pub(crate) fn require_positive(parameter: &'static str, value: f64) -> SimulationResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimulationError::config(
            parameter,
            format!("must be finite and > 0, got {value}"),
        ))
    }
}

/// Reject a value that is negative or not finite.
pub(crate) fn require_non_negative(parameter: &'static str, value: f64) -> SimulationResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimulationError::config(
            parameter,
            format!("must be finite and >= 0, got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimulationError::shape("B input slices", 2, 3);
        assert_eq!(
            err.to_string(),
            "Shape mismatch in B input slices: expected 2, got 3"
        );

        let err = SimulationError::NumericalDegeneracy {
            stage: Stage::Hemodynamics,
            region: 1,
            step: 42,
            reason: "V = -0.1".to_string(),
        };
        assert!(err.to_string().contains("hemodynamics"));
        assert!(err.to_string().contains("step 42"));
        assert_eq!(Stage::Neurodynamics.to_string(), "neurodynamics");
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("frequency", 10.0).is_ok());
        assert!(matches!(
            require_positive("frequency", 0.0),
            Err(SimulationError::InvalidConfig { parameter: "frequency", .. })
        ));
        assert!(require_positive("frequency", f64::NAN).is_err());
        assert!(require_non_negative("rest", 0.0).is_ok());
        assert!(require_non_negative("rest", -1.0).is_err());
    }
}
