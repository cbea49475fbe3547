//! Error types for the Maestro engine

use crate::lock::ExecutionPhase;
use crate::types::{SolverOutcome, ValidationResult};

use ethers::types::{Address, U256};
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid calls bundle: {0}")]
    InvalidCallsBundle(String),

    #[error("verification failed: {0}")]
    VerificationFailed(ValidationResult),

    #[error("pre-ops hook failed: {reason}")]
    PreOpsFailed { reason: String },

    #[error("user operation failed: {reason}")]
    UserOpFailed { reason: String },

    #[error("solver simulation failed: {0}")]
    SolverSimulationFailed(SolverOutcome),

    #[error("post-ops hook failed: {reason}")]
    PostOpsFailed { reason: String },

    #[error("no solver fulfilled a required auction")]
    UnfulfilledRequirement,

    #[error("execution environment mismatch: expected {expected}, got {got}")]
    EnvironmentMismatch { expected: Address, got: Address },

    #[error("unauthorized reentry by {caller} during {phase}")]
    UnauthorizedReentry {
        caller: Address,
        phase: ExecutionPhase,
    },

    #[error("value allocation failed: {reason}")]
    AllocationFailed { reason: String },

    #[error("insufficient escrow for {account}: have {have}, need {need}")]
    InsufficientEscrow {
        account: Address,
        have: U256,
        need: U256,
    },

    #[error("escrow for {account} is locked by an active call")]
    EscrowLocked { account: Address },

    #[error("invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition {
        from: ExecutionPhase,
        to: ExecutionPhase,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable error class name for metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::InvalidCallsBundle(_) => "invalid_calls_bundle",
            EngineError::VerificationFailed(_) => "verification_failed",
            EngineError::PreOpsFailed { .. } => "pre_ops_failed",
            EngineError::UserOpFailed { .. } => "user_op_failed",
            EngineError::SolverSimulationFailed(_) => "solver_simulation_failed",
            EngineError::PostOpsFailed { .. } => "post_ops_failed",
            EngineError::UnfulfilledRequirement => "unfulfilled_requirement",
            EngineError::EnvironmentMismatch { .. } => "environment_mismatch",
            EngineError::UnauthorizedReentry { .. } => "unauthorized_reentry",
            EngineError::AllocationFailed { .. } => "allocation_failed",
            EngineError::InsufficientEscrow { .. } => "insufficient_escrow",
            EngineError::EscrowLocked { .. } => "escrow_locked",
            EngineError::InvalidPhaseTransition { .. } => "invalid_phase_transition",
            EngineError::Config(_) => "config",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Check if the error aborts the call regardless of call configuration
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::UnauthorizedReentry { .. }
                | EngineError::InvalidPhaseTransition { .. }
                | EngineError::Internal(_)
        )
    }

    /// Normalize an error for the caller.
    ///
    /// Simulation callers receive granular, phase-specific diagnostics to
    /// support off-chain dry-running. Production callers receive the coarser
    /// classification so per-solver diagnostics cannot be used to selectively
    /// grief candidates.
    pub fn for_caller(self, simulation: bool) -> Self {
        if simulation {
            return self;
        }
        match self {
            EngineError::VerificationFailed(reason) => {
                EngineError::InvalidCallsBundle(reason.name().to_string())
            }
            EngineError::SolverSimulationFailed(_) => EngineError::UnfulfilledRequirement,
            other => other,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
