//! Call context threaded through every phase
//!
//! The context owns the phase lock, the gas meter, and the staged value
//! transfers for one orchestrated call. Hooks receive it mutably; every
//! privileged mutation checks the lock's current owner first, which is the
//! re-entrancy guard.

use crate::environment::EnvironmentHandle;
use crate::error::EngineResult;
use crate::escrow::{Party, StagedTransfer, ValueStaging};
use crate::lock::{ExecutionPhase, Lock};
use crate::types::GasMeter;

use ethers::types::{Address, U256};
use uuid::Uuid;

pub struct CallContext {
    call_id: Uuid,
    env: EnvironmentHandle,
    caller: Address,
    attached_value: U256,
    pub(crate) lock: Lock,
    pub(crate) gas: GasMeter,
    pub(crate) staging: ValueStaging,
}

impl CallContext {
    pub(crate) fn new(
        call_id: Uuid,
        env: EnvironmentHandle,
        caller: Address,
        attached_value: U256,
        lock: Lock,
        gas: GasMeter,
    ) -> Self {
        Self {
            call_id,
            env,
            caller,
            attached_value,
            lock,
            gas,
            staging: ValueStaging::new(),
        }
    }

    pub fn call_id(&self) -> Uuid {
        self.call_id
    }

    pub fn environment(&self) -> &EnvironmentHandle {
        &self.env
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn attached_value(&self) -> U256 {
        self.attached_value
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.lock.phase()
    }

    pub fn winner(&self) -> Option<Address> {
        self.lock.winner()
    }

    pub fn is_simulation(&self) -> bool {
        self.lock.is_simulation()
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas.remaining()
    }

    pub fn gas_used(&self) -> u64 {
        self.gas.used()
    }

    /// Attached value not yet claimed by staged transfers
    pub fn pot_remaining(&self) -> U256 {
        self.attached_value
            .saturating_sub(self.staging.pot_debits())
    }

    /// Stage a transfer out of the call pot (the attached value).
    ///
    /// `actor` must be the identity currently authorized for the phase;
    /// anything else is an unauthorized re-entry and fails the call.
    pub fn stage_pot_transfer(
        &mut self,
        actor: Address,
        to: Address,
        amount: U256,
    ) -> EngineResult<()> {
        self.lock.authorize(actor)?;
        self.staging.push(StagedTransfer {
            from: Party::CallPot,
            to,
            amount,
        });
        Ok(())
    }

    /// Stage a transfer from the acting identity's own escrow balance.
    ///
    /// Hooks can only spend the balance of the identity they act as; the
    /// debit itself is check-applied at settlement.
    pub fn stage_escrow_transfer(
        &mut self,
        actor: Address,
        to: Address,
        amount: U256,
    ) -> EngineResult<()> {
        self.lock.authorize(actor)?;
        self.staging.push(StagedTransfer {
            from: Party::Account(actor),
            to,
            amount,
        });
        Ok(())
    }
}
