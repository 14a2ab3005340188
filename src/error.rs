use std::fmt;

/// Error types for the optimizer
#[derive(Debug, Clone, PartialEq)]
pub enum MinimizerError {
    FunctionEvaluationError(String),
    InfeasibleStartingPoint,
    InvalidBounds(String),
    InvalidDimension,
    InvalidParameters(String),
    InvalidStepSize,
    LinearAlgebraError(String),
    NumericalError(String),
}

impl MinimizerError {
    /// True for problems detected before the first evaluation is spent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MinimizerError::InfeasibleStartingPoint
                | MinimizerError::InvalidBounds(_)
                | MinimizerError::InvalidDimension
                | MinimizerError::InvalidParameters(_)
                | MinimizerError::InvalidStepSize
        )
    }

    /// True for degeneracies of the search distribution the engine may recover from.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            MinimizerError::LinearAlgebraError(_) | MinimizerError::NumericalError(_)
        )
    }
}

impl fmt::Display for MinimizerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MinimizerError::FunctionEvaluationError(msg) => {
                write!(f, "Function evaluation failed: {}", msg)
            }
            MinimizerError::InfeasibleStartingPoint => {
                write!(f, "Starting point violates bounds")
            }
            MinimizerError::InvalidBounds(msg) => write!(f, "Invalid bounds: {}", msg),
            MinimizerError::InvalidDimension => write!(f, "Invalid dimension or empty vector"),
            MinimizerError::InvalidParameters(msg) => {
                write!(f, "Invalid parameters: {}", msg)
            }
            MinimizerError::InvalidStepSize => {
                write!(f, "Step size must be positive and finite")
            }
            MinimizerError::LinearAlgebraError(msg) => write!(f, "Linear algebra error: {}", msg),
            MinimizerError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
        }
    }
}

impl std::error::Error for MinimizerError {}
