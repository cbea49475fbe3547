//! Escrow ledger and staged value transfers
//!
//! Balances are mutated only during settlement, once per call. Hooks stage
//! transfers into a [`ValueStaging`] list during the call; settlement applies
//! the whole list all-or-nothing with conservation enforcement.

use crate::error::{EngineError, EngineResult};

use ethers::types::{Address, U256};
use std::collections::HashMap;
use tracing::debug;

/// Source of a staged transfer: either the call-scoped pot holding the
/// attached value, or a custodied escrow account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    CallPot,
    Account(Address),
}

/// One staged value movement, recorded during a phase and applied at
/// settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedTransfer {
    pub from: Party,
    pub to: Address,
    pub amount: U256,
}

/// Call-scoped list of staged transfers with checkpoint/rollback, the
/// all-or-nothing mechanism wrapped around each phase and solver attempt.
#[derive(Debug, Default)]
pub struct ValueStaging {
    entries: Vec<StagedTransfer>,
}

impl ValueStaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transfer: StagedTransfer) {
        self.entries.push(transfer);
    }

    /// Mark the current staging position
    pub fn checkpoint(&self) -> usize {
        self.entries.len()
    }

    /// Discard everything staged after `mark`
    pub fn rollback_to(&mut self, mark: usize) {
        self.entries.truncate(mark);
    }

    pub fn entries(&self) -> &[StagedTransfer] {
        &self.entries
    }

    /// Total staged against the call pot
    pub fn pot_debits(&self) -> U256 {
        self.entries
            .iter()
            .filter(|t| t.from == Party::CallPot)
            .fold(U256::zero(), |acc, t| acc.saturating_add(t.amount))
    }
}

/// Custodied value balances, settled at the end of each call.
#[derive(Debug, Default, Clone)]
pub struct EscrowLedger {
    balances: HashMap<Address, U256>,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    /// Sum of all custodied balances
    pub fn total(&self) -> U256 {
        self.balances
            .values()
            .fold(U256::zero(), |acc, v| acc.saturating_add(*v))
    }

    pub fn credit(&mut self, account: Address, amount: U256) {
        let entry = self.balances.entry(account).or_default();
        *entry = entry.saturating_add(amount);
    }

    /// Checked debit; fails without mutating on insufficient balance
    pub fn debit(&mut self, account: Address, amount: U256) -> EngineResult<()> {
        let have = self.balance_of(account);
        let remaining = have
            .checked_sub(amount)
            .ok_or(EngineError::InsufficientEscrow {
                account,
                have,
                need: amount,
            })?;
        self.balances.insert(account, remaining);
        Ok(())
    }

    /// Bond value into escrow
    pub fn deposit(&mut self, account: Address, amount: U256) {
        self.credit(account, amount);
        debug!(account = ?account, amount = %amount, "escrow deposit");
    }

    /// Withdraw bonded value
    pub fn withdraw(&mut self, account: Address, amount: U256) -> EngineResult<()> {
        self.debit(account, amount)?;
        debug!(account = ?account, amount = %amount, "escrow withdrawal");
        Ok(())
    }

    /// Apply a staged transfer list all-or-nothing.
    ///
    /// `pot` is the attached value received for this call. Every transfer is
    /// validated against a scratch copy first, so a failing list leaves the
    /// ledger untouched. Returns the pot remainder, which the caller is
    /// refunded. Net disbursement can never exceed value received plus the
    /// paying party's pre-existing escrow: pot debits are capped by `pot` and
    /// account debits are checked.
    pub fn apply(&mut self, staged: &[StagedTransfer], pot: U256) -> EngineResult<U256> {
        let mut scratch = self.clone();
        let mut pot_remaining = pot;

        for transfer in staged {
            match transfer.from {
                Party::CallPot => {
                    pot_remaining = pot_remaining.checked_sub(transfer.amount).ok_or(
                        EngineError::InsufficientEscrow {
                            account: transfer.to,
                            have: pot_remaining,
                            need: transfer.amount,
                        },
                    )?;
                }
                Party::Account(from) => {
                    scratch.debit(from, transfer.amount)?;
                }
            }
            scratch.credit(transfer.to, transfer.amount);
        }

        *self = scratch;
        Ok(pot_remaining)
    }
}
