//! Execution orchestrator
//!
//! `AuctionEngine` is the public entry point for one atomic, multi-party
//! call: verifier pre-flight, phase sequencing (pre-ops, user op, solver
//! auction, allocation, post-ops), settlement, and unconditional lock
//! release. Failure anywhere after value receipt refunds the caller.

pub mod context;

pub use context::CallContext;

use crate::auction::AuctionRunner;
use crate::config::EngineConfig;
use crate::control::{
    hook_error, ControlRegistry, DAppControl, ExecutionBackend, RegisteredControl, Verifier,
};
use crate::environment::{EnvironmentFactory, EnvironmentHandle};
use crate::error::{EngineError, EngineResult};
use crate::escrow::EscrowLedger;
use crate::events::{EngineEvent, EventSink, TracingSink};
use crate::lock::{ExecutionPhase, Lock};
use crate::metrics;
use crate::settlement;
use crate::types::{
    CallConfig, CallOutcome, DAppOperation, GasMeter, SolverOperation, UserOperation,
};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::{Address, Bytes, U256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Orchestrates atomic intent auctions against isolated environments
pub struct AuctionEngine {
    /// Engine configuration
    config: EngineConfig,
    /// Pre-flight bundle validation
    verifier: Arc<dyn Verifier>,
    /// Opaque payload execution
    backend: Arc<dyn ExecutionBackend>,
    /// Registered dapp controls with frozen call configurations
    controls: ControlRegistry,
    /// Memoized execution environments
    environments: EnvironmentFactory,
    /// Custodied balances, mutated only during settlement
    ledger: Mutex<EscrowLedger>,
    /// Environments with a call in flight
    active: DashMap<Address, Uuid>,
    /// Identities party to an active call (refcounted; blocks withdrawal)
    active_parties: DashMap<Address, u32>,
    /// Observability sink
    events: Arc<dyn EventSink>,
}

impl AuctionEngine {
    pub fn new(
        config: EngineConfig,
        verifier: Arc<dyn Verifier>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            config,
            verifier,
            backend,
            controls: ControlRegistry::new(),
            environments: EnvironmentFactory::new(),
            ledger: Mutex::new(EscrowLedger::new()),
            active: DashMap::new(),
            active_parties: DashMap::new(),
            events: Arc::new(TracingSink),
        }
    }

    /// Replace the default tracing event sink
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Register a dapp control. Its call configuration is frozen here.
    pub fn register_control(
        &self,
        address: Address,
        control: Arc<dyn DAppControl>,
        config: CallConfig,
    ) -> EngineResult<()> {
        self.controls.register(address, control, config)
    }

    /// Resolve (creating on first use) the isolated environment for a
    /// (user, dapp control) pair
    pub fn create_execution_environment(
        &self,
        user: Address,
        control: Address,
    ) -> EngineResult<EnvironmentHandle> {
        let registered = self.controls.get(control)?;
        Ok(self
            .environments
            .get_or_create(user, control, &registered.config))
    }

    /// Bond value into escrow
    pub fn deposit(&self, account: Address, amount: U256) {
        let mut ledger = self.ledger.lock().expect("ledger poisoned");
        ledger.deposit(account, amount);
        metrics::record_escrow_total(ledger.total().min(U256::from(u128::MAX)).as_u128() as f64);
    }

    /// Withdraw bonded value. Refused while the account is party to an
    /// active call.
    pub fn withdraw(&self, account: Address, amount: U256) -> EngineResult<()> {
        if self.active_parties.get(&account).map(|c| *c > 0) == Some(true) {
            return Err(EngineError::EscrowLocked { account });
        }
        let mut ledger = self.ledger.lock().expect("ledger poisoned");
        ledger.withdraw(account, amount)
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.ledger
            .lock()
            .expect("ledger poisoned")
            .balance_of(account)
    }

    /// True while the environment has a call in flight
    pub fn environment_active(&self, env: Address) -> bool {
        self.active.contains_key(&env)
    }

    /// Execute one orchestrated call.
    ///
    /// Returns whether the auction was won and the winning index, along with
    /// settlement accounting. `attached_value` is custodied for the duration
    /// of the call; on failure after receipt it is refunded to `caller`.
    pub fn run(
        &self,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
        attached_value: U256,
        caller: Address,
        simulation: bool,
    ) -> EngineResult<CallOutcome> {
        self.run_inner(user_op, solver_ops, dapp_op, attached_value, caller, simulation)
            .map_err(|err| err.for_caller(simulation))
    }

    fn run_inner(
        &self,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        dapp_op: &DAppOperation,
        attached_value: U256,
        caller: Address,
        simulation: bool,
    ) -> EngineResult<CallOutcome> {
        let call_id = Uuid::new_v4();

        let registered = self.controls.get(user_op.control)?;
        let call_config = registered.config;

        // bundle admission, before any state mutation
        if dapp_op.control != user_op.control {
            return Err(EngineError::EnvironmentMismatch {
                expected: user_op.control,
                got: dapp_op.control,
            });
        }
        if !call_config.accepts_auctioneer(dapp_op.from, user_op.from, solver_ops) {
            return Err(EngineError::InvalidCallsBundle(
                "untrusted auctioneer".to_string(),
            ));
        }
        if solver_ops.is_empty() && !call_config.allow_zero_solvers {
            return Err(EngineError::InvalidCallsBundle(
                "zero solver operations".to_string(),
            ));
        }
        if solver_ops.len() > self.config.max_solvers_per_call {
            return Err(EngineError::InvalidCallsBundle(format!(
                "solver count {} exceeds maximum {}",
                solver_ops.len(),
                self.config.max_solvers_per_call
            )));
        }

        let env = self
            .environments
            .get_or_create(user_op.from, user_op.control, &call_config);

        let (bundle_hash, verdict) = self.verifier.validate(
            &call_config,
            user_op,
            solver_ops,
            dapp_op,
            attached_value,
            caller,
            simulation,
        );
        if !verdict.is_valid() {
            return Err(EngineError::VerificationFailed(verdict));
        }

        debug!(
            %call_id,
            bundle = %hex::encode(bundle_hash),
            environment = ?env.address,
            solvers = solver_ops.len(),
            simulation,
            "bundle admitted"
        );

        // engine-level re-entrancy guard: the environment must be idle
        match self.active.entry(env.address) {
            Entry::Occupied(_) => {
                return Err(EngineError::UnauthorizedReentry {
                    caller,
                    phase: ExecutionPhase::Unlocked,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(call_id);
            }
        }
        self.retain_parties(caller, user_op, solver_ops);

        let result = self.execute_call(
            call_id,
            &registered,
            &env,
            user_op,
            solver_ops,
            attached_value,
            caller,
            simulation,
        );

        // unconditional release, every path
        self.active.remove(&env.address);
        self.release_parties(caller, user_op, solver_ops);

        match result {
            Ok(outcome) => {
                self.events.emit(EngineEvent::CallResult {
                    call_id,
                    caller,
                    user: user_op.from,
                    winner: outcome.winner,
                    auction_won: outcome.auction_won,
                    timestamp: Utc::now(),
                });
                info!(
                    %call_id,
                    auction_won = outcome.auction_won,
                    winner = ?outcome.winner,
                    gas_used = outcome.gas_used,
                    "call complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                {
                    let mut ledger = self.ledger.lock().expect("ledger poisoned");
                    settlement::refund_on_failure(&mut ledger, caller, attached_value);
                }
                metrics::record_call_failure(err.name());
                self.events.emit(EngineEvent::CallResult {
                    call_id,
                    caller,
                    user: user_op.from,
                    winner: None,
                    auction_won: false,
                    timestamp: Utc::now(),
                });
                debug!(%call_id, error = %err, "call failed");
                Err(err)
            }
        }
    }

    /// Phase sequencer. Runs with the environment guard held; every error
    /// path propagates up to `run_inner` which refunds and releases.
    #[allow(clippy::too_many_arguments)]
    fn execute_call(
        &self,
        call_id: Uuid,
        registered: &RegisteredControl,
        env: &EnvironmentHandle,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
        attached_value: U256,
        caller: Address,
        simulation: bool,
    ) -> EngineResult<CallOutcome> {
        let call_config = registered.config;

        // upfront compute-budget snapshot; saturates so absurd declared gas
        // limits cannot overflow the meter
        let budget = solver_ops
            .iter()
            .map(|s| s.gas.min(self.config.max_solver_gas))
            .fold(user_op.gas, u64::saturating_add);

        let lock = Lock::new(
            env.address,
            caller,
            &call_config,
            simulation,
            solver_ops.len(),
        );
        let mut ctx = CallContext::new(
            call_id,
            env.clone(),
            caller,
            attached_value,
            lock,
            GasMeter::new(budget),
        );

        let mut return_data = Bytes::default();

        // pre-ops (optional)
        if ctx.lock.begin(&call_config)? == ExecutionPhase::PreOps {
            ctx.lock.set_owner(user_op.control);
            let mark = ctx.staging.checkpoint();
            match registered.control.pre_ops(&mut ctx, user_op) {
                Ok(data) => return_data = data,
                Err(err) => {
                    ctx.staging.rollback_to(mark);
                    return Err(hook_error(err, |reason| EngineError::PreOpsFailed {
                        reason,
                    }));
                }
            }
            ctx.lock.advance(&call_config, true)?;
        }

        // user operation (required)
        ctx.lock.set_owner(user_op.from);
        let allowance = user_op.gas.min(ctx.gas.remaining());
        let receipt = self.backend.execute_user(env, user_op, allowance);
        ctx.gas.charge(receipt.gas_used.min(allowance));
        if !receipt.success {
            return Err(EngineError::UserOpFailed {
                reason: receipt
                    .revert_reason
                    .unwrap_or_else(|| "execution reverted".to_string()),
            });
        }
        if call_config.track_user_return_data {
            return_data = concat_bytes(&return_data, &receipt.return_data);
        }
        ctx.lock.advance(&call_config, true)?;

        // solver auction
        let runner = AuctionRunner {
            control: registered.control.as_ref(),
            backend: self.backend.as_ref(),
            call_config: &call_config,
            engine_config: &self.config,
            events: self.events.as_ref(),
        };
        let result = runner.run(&mut ctx, user_op, solver_ops, &return_data)?;

        if !result.solved() && call_config.require_fulfillment {
            // granular outcome for simulation callers; coarsened for
            // production callers at the public boundary
            return Err(match result.last_outcome {
                Some(outcome) => EngineError::SolverSimulationFailed(outcome),
                None => EngineError::UnfulfilledRequirement,
            });
        }

        // leave the auction (and allocation, when a solver won)
        let next = ctx.lock.advance(&call_config, result.solved())?;

        // post-ops (optional), with the was-solved flag
        if next == ExecutionPhase::PostOps {
            ctx.lock.set_owner(user_op.control);
            let mark = ctx.staging.checkpoint();
            if let Err(err) =
                registered
                    .control
                    .post_ops(&mut ctx, result.solved(), &result.return_data)
            {
                ctx.staging.rollback_to(mark);
                return Err(hook_error(err, |reason| EngineError::PostOpsFailed {
                    reason,
                }));
            }
            ctx.lock.advance(&call_config, result.solved())?;
        }

        // settlement: the only escrow mutation, exactly once
        let settled = {
            let mut ledger = self.ledger.lock().expect("ledger poisoned");
            settlement::settle(&mut ledger, &ctx, &result, user_op.max_fee_per_gas, &self.config)?
        };

        ctx.lock.release();
        debug_assert!(ctx.lock.is_unlocked());

        Ok(CallOutcome {
            call_id,
            auction_won: result.solved(),
            winning_index: result.winning_index,
            winner: result.winner,
            gas_used: ctx.gas.used(),
            refund: settled.refund,
        })
    }

    fn retain_parties(
        &self,
        caller: Address,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
    ) {
        for party in call_parties(caller, user_op, solver_ops) {
            *self.active_parties.entry(party).or_insert(0) += 1;
        }
    }

    fn release_parties(
        &self,
        caller: Address,
        user_op: &UserOperation,
        solver_ops: &[SolverOperation],
    ) {
        for party in call_parties(caller, user_op, solver_ops) {
            if let Entry::Occupied(mut slot) = self.active_parties.entry(party) {
                if *slot.get() <= 1 {
                    slot.remove();
                } else {
                    *slot.get_mut() -= 1;
                }
            }
        }
    }
}

fn call_parties(
    caller: Address,
    user_op: &UserOperation,
    solver_ops: &[SolverOperation],
) -> Vec<Address> {
    let mut parties = Vec::with_capacity(solver_ops.len() + 2);
    parties.push(caller);
    parties.push(user_op.from);
    parties.extend(solver_ops.iter().map(|s| s.from));
    parties
}

fn concat_bytes(a: &Bytes, b: &Bytes) -> Bytes {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    let mut combined = a.to_vec();
    combined.extend_from_slice(b);
    Bytes::from(combined)
}
