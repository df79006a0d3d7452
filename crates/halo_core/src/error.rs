//! Error types shared across the crate.

use thiserror::Error;

use crate::corrector::{CorrectionFailure, CorrectionFormula};

/// Failures raised by the adaptive integrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("invalid integration input: {0}")]
    InvalidInput(String),
    #[error("step size fell below the minimum ({h:e}) at t = {t}")]
    StepSizeTooSmall { t: f64, h: f64 },
    #[error("exceeded the step budget of {0} steps")]
    MaxStepsExceeded(u64),
    #[error("non-finite state encountered at t = {t}")]
    NonFiniteState { t: f64 },
}

impl IntegrationError {
    /// Integration time at which the solver gave up, when known.
    pub fn time(&self) -> Option<f64> {
        match self {
            IntegrationError::StepSizeTooSmall { t, .. } | IntegrationError::NonFiniteState { t } => {
                Some(*t)
            }
            IntegrationError::InvalidInput(_) | IntegrationError::MaxStepsExceeded(_) => None,
        }
    }
}

/// Errors surfaced by the halo orbit and manifold pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HaloError {
    #[error("mass parameter must lie in (0, 0.5], got {0}")]
    InvalidMassParameter(f64),
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    #[error("corrector did not converge ({reason}); last residual {residual:e}")]
    NotConverged {
        reason: CorrectionFailure,
        residual: f64,
    },
    #[error("singular correction matrix for {formula} target; wrong formula for this configuration")]
    SingularCorrection { formula: CorrectionFormula },
    #[error("orbit is not periodic: full-period return error {error:e}")]
    NotPeriodic { error: f64 },
    #[error("no real eigenstructure in monodromy matrix; orbit likely not periodic")]
    NoRealEigenstructure,
    #[error("family table I/O failed: {0}")]
    Table(String),
}

pub type Result<T> = std::result::Result<T, HaloError>;

impl HaloError {
    /// True when the correction matrix was singular, which means the caller
    /// paired a formula with the wrong configuration rather than hitting an
    /// ordinary convergence failure.
    pub fn is_formula_fault(&self) -> bool {
        matches!(self, HaloError::SingularCorrection { .. })
    }
}
