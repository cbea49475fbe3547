//! External collaborator seams: dapp control hooks, verifier, execution
//! backend, and the control registry.
//!
//! The engine consumes a fixed capability interface from each collaborator.
//! Hook implementations are pluggable and report failures as plain
//! `anyhow` errors; the engine maps those onto its own taxonomy at each
//! phase boundary.

use crate::engine::CallContext;
use crate::environment::EnvironmentHandle;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    CallConfig, DAppOperation, ExecutionReceipt, SolverOperation, UserOperation, ValidationResult,
};

use dashmap::DashMap;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::info;

/// DApp-specific control logic. All hook methods are present on every
/// implementation; the engine invokes each only when the parallel
/// [`CallConfig`] flag is set.
pub trait DAppControl: Send + Sync {
    /// Optional setup phase before the user operation
    fn pre_ops(&self, ctx: &mut CallContext, user_op: &UserOperation) -> anyhow::Result<Bytes>;

    /// Optional per-candidate setup under the solver auction phase
    fn pre_solver(
        &self,
        ctx: &mut CallContext,
        solver_op: &SolverOperation,
        return_data: &Bytes,
    ) -> anyhow::Result<()>;

    /// Optional per-candidate verification after solver execution
    fn post_solver(
        &self,
        ctx: &mut CallContext,
        solver_op: &SolverOperation,
        return_data: &Bytes,
    ) -> anyhow::Result<()>;

    /// Optional final phase; `solved` reports whether any solver won, and a
    /// fallback baseline action may run here when it did not
    fn post_ops(&self, ctx: &mut CallContext, solved: bool, return_data: &Bytes)
        -> anyhow::Result<()>;

    /// Token the dapp expects bids in for this user operation
    fn bid_format(&self, user_op: &UserOperation) -> Address;

    /// Declared bid for a candidate; non-mutating dry query used by ex-post
    /// bid-finding. Zero marks the candidate ineligible.
    fn bid_value(&self, solver_op: &SolverOperation) -> U256;

    /// Distribute the winning bid. Invoked at most once per call.
    fn allocate_value(
        &self,
        ctx: &mut CallContext,
        bid_token: Address,
        bid_amount: U256,
        return_data: &Bytes,
    ) -> anyhow::Result<()>;
}

/// Pre-flight bundle validation (signatures, nonces, deadlines). External to
/// the engine; invalid bundles abort before any state mutation.
#[cfg_attr(test, mockall::automock)]
pub trait Verifier: Send + Sync {
    fn validate(
        &self,
        config: &CallConfig,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
        attached_value: U256,
        caller: Address,
        simulation: bool,
    ) -> (H256, ValidationResult);
}

/// Executes opaque operation payloads inside an isolated environment.
/// Every execution either fully completes or fully aborts before returning.
pub trait ExecutionBackend: Send + Sync {
    fn execute_user(
        &self,
        env: &EnvironmentHandle,
        user_op: &UserOperation,
        gas_allowance: u64,
    ) -> ExecutionReceipt;

    fn execute_solver(
        &self,
        env: &EnvironmentHandle,
        solver_op: &SolverOperation,
        gas_allowance: u64,
    ) -> ExecutionReceipt;
}

/// A registered dapp control and its frozen call configuration
#[derive(Clone)]
pub struct RegisteredControl {
    pub control: Arc<dyn DAppControl>,
    pub config: CallConfig,
}

/// Registry of dapp controls. A control's [`CallConfig`] is set once at
/// registration and read-only afterward.
#[derive(Default)]
pub struct ControlRegistry {
    controls: DashMap<Address, RegisteredControl>,
}

impl ControlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        address: Address,
        control: Arc<dyn DAppControl>,
        config: CallConfig,
    ) -> EngineResult<()> {
        if self.controls.contains_key(&address) {
            return Err(EngineError::Config(format!(
                "control {address:?} is already registered"
            )));
        }
        self.controls
            .insert(address, RegisteredControl { control, config });
        info!(control = ?address, "registered dapp control");
        Ok(())
    }

    pub fn get(&self, address: Address) -> EngineResult<RegisteredControl> {
        self.controls
            .get(&address)
            .map(|c| c.clone())
            .ok_or_else(|| {
                EngineError::InvalidCallsBundle(format!("unknown dapp control {address:?}"))
            })
    }

    pub fn config_of(&self, address: Address) -> Option<CallConfig> {
        self.controls.get(&address).map(|c| c.config)
    }
}

/// Map a hook failure onto the engine taxonomy, letting an embedded fatal
/// engine error (unauthorized re-entry foremost) pass through unchanged.
pub(crate) fn hook_error(err: anyhow::Error, map: impl FnOnce(String) -> EngineError) -> EngineError {
    match err.downcast::<EngineError>() {
        Ok(engine_err) if engine_err.is_fatal() => engine_err,
        Ok(engine_err) => map(engine_err.to_string()),
        Err(other) => map(other.to_string()),
    }
}
